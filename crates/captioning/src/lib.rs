pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod handover;
pub mod pipeline;
pub mod relay;
pub mod slot;
pub mod speech;
pub mod testing;
pub mod translate;

mod task;

pub use config::{CaptioningConfig, TranslationConfig, TtsRelayConfig};
pub use error::{CaptioningError, PermissionError, TranslationError};
pub use pipeline::{CaptionPipeline, PipelineEngines, PipelineStatus};
pub use speech::{EngineErrorCode, SessionEvent, SessionOptions, SpeechEngine, SpeechSession};
pub use translate::{LanguagePair, TranslationRequest};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A caption emitted when the recognizer produces an interim or final result.
///
/// Final captions carry a fresh v4 id that all of their translations reuse;
/// interim captions use the fixed sentinel `Uuid::nil()`. Ids are never reused
/// across utterances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionEvent {
    pub id: Uuid,
    pub text: String,
    pub is_interim: bool,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// BCP-47 speech language the recognizer was configured with.
    pub language: String,
    /// How many `caption_translation` events renderers should expect for this
    /// caption. Advisory: a target that later fails availability delivers less.
    pub expected_translations: usize,
}

/// One translated rendition of a final caption, addressed to one output slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionTranslation {
    /// Id of the final caption this translation belongs to.
    pub id: Uuid,
    pub translation: String,
    pub source_language: String,
    pub target_language: String,
    pub output_slot_index: usize,
}

/// Events published on the outbound channel consumed by overlay renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Caption(CaptionEvent),
    CaptionTranslation(CaptionTranslation),
}

impl OutboundEvent {
    /// Caption id carried by the event.
    pub fn caption_id(&self) -> Uuid {
        match self {
            OutboundEvent::Caption(c) => c.id,
            OutboundEvent::CaptionTranslation(t) => t.id,
        }
    }
}
