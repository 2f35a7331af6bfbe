pub mod captioning;
