pub mod fixtures;

#[cfg(test)]
mod captioning_api_tests;
