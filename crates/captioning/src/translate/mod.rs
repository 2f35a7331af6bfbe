pub mod cache;
pub mod router;

pub use cache::{CachedTranslator, TranslatorCache};
pub use router::TranslationRouter;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TranslationError;

/// A (source, target) language pair identifying one translator handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// One configured display destination for translated captions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub target_language: String,
    pub output_slot_index: usize,
}

/// Requests collapsed by target language, so identical targets issue one
/// translation call whose result fans out to every slot in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationGroup {
    pub target_language: String,
    pub output_slot_indices: Vec<usize>,
}

/// Collapses requests by target language, preserving first-seen target order
/// and request order within each group.
pub fn group_targets(requests: &[TranslationRequest]) -> Vec<TranslationGroup> {
    let mut groups: Vec<TranslationGroup> = Vec::new();
    for request in requests {
        match groups
            .iter_mut()
            .find(|g| g.target_language == request.target_language)
        {
            Some(group) => group.output_slot_indices.push(request.output_slot_index),
            None => groups.push(TranslationGroup {
                target_language: request.target_language.clone(),
                output_slot_indices: vec![request.output_slot_index],
            }),
        }
    }
    groups
}

/// Availability of a language pair with the external engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    /// The engine must download the language model first; progress is
    /// streamed while `create` runs.
    NeedsDownload,
    Unsupported,
}

/// Progress of a translator model download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub pair: LanguagePair,
    pub loaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// A live translation resource bound to one language pair.
#[async_trait]
pub trait TranslatorHandle: Send + Sync + 'static {
    async fn translate(&self, text: &str) -> Result<String, TranslationError>;

    /// Releases the underlying engine resource. Called by the cache sweep and
    /// on teardown; the handle is dropped afterwards.
    async fn release(&self);
}

/// An opaque external translation engine.
#[async_trait]
pub trait TranslationEngine: Send + Sync + 'static {
    async fn check_availability(
        &self,
        pair: &LanguagePair,
    ) -> Result<Availability, TranslationError>;

    /// Creates a translator for the pair, downloading the model first when
    /// needed. Download progress is reported on `progress`.
    async fn create(
        &self,
        pair: &LanguagePair,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<Box<dyn TranslatorHandle>, TranslationError>;
}

/// Ranked language guess from the external detector.
#[derive(Debug, Clone)]
pub struct LanguageGuess {
    pub language: String,
    pub confidence: f32,
}

/// Single-shot language detection for utterances recognized with the "auto"
/// speech language.
#[async_trait]
pub trait LanguageDetector: Send + Sync + 'static {
    /// Detects the language of `text`, best guess first.
    async fn detect(&self, text: &str) -> anyhow::Result<Vec<LanguageGuess>>;

    /// Releases detector resources on pipeline teardown.
    async fn release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(lang: &str, slot: usize) -> TranslationRequest {
        TranslationRequest {
            target_language: lang.to_string(),
            output_slot_index: slot,
        }
    }

    #[test]
    fn identical_targets_collapse_into_one_group() {
        let groups = group_targets(&[request("en", 0), request("en", 1), request("fr", 2)]);
        assert_eq!(
            groups,
            vec![
                TranslationGroup {
                    target_language: "en".to_string(),
                    output_slot_indices: vec![0, 1],
                },
                TranslationGroup {
                    target_language: "fr".to_string(),
                    output_slot_indices: vec![2],
                },
            ]
        );
    }

    #[test]
    fn grouping_preserves_first_seen_order() {
        let groups = group_targets(&[request("fr", 2), request("en", 0), request("fr", 1)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].target_language, "fr");
        assert_eq!(groups[0].output_slot_indices, vec![2, 1]);
        assert_eq!(groups[1].target_language, "en");
    }

    #[test]
    fn no_requests_means_no_groups() {
        assert!(group_targets(&[]).is_empty());
    }
}
