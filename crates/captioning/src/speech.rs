use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::PermissionError;

/// Options for one recognition session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// BCP-47 speech language, e.g. "en-US".
    pub language: String,
    /// Whether the engine should emit interim (provisional) results.
    pub interim_results: bool,
}

/// Error codes reported by a recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineErrorCode {
    /// The session was cancelled mid-flight. Expected noise on the standby
    /// slot during handover; suppressed there.
    Aborted,
    NoSpeech,
    AudioCapture,
    Network,
    NotAllowed,
    LanguageNotSupported,
    Other,
}

impl EngineErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorCode::Aborted => "session aborted",
            EngineErrorCode::NoSpeech => "no speech detected",
            EngineErrorCode::AudioCapture => "audio capture failed",
            EngineErrorCode::Network => "recognition network error",
            EngineErrorCode::NotAllowed => "recognition not allowed",
            EngineErrorCode::LanguageNotSupported => "speech language not supported",
            EngineErrorCode::Other => "recognition error",
        }
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by a live recognition session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A recognition result. Interim results are provisional and will be
    /// superseded; a final result marks an utterance boundary.
    Result { text: String, is_final: bool },
    /// An engine fault. The engine usually follows up with `End`.
    Error(EngineErrorCode),
    /// The session terminated, naturally or after an error. No further
    /// events follow on this channel.
    End,
}

/// Control handle for one live session. Owned exclusively by its slot.
#[async_trait]
pub trait SpeechSession: Send + 'static {
    /// Asks the engine to stop listening. Pending results may still arrive
    /// on the event channel before `End`.
    async fn stop(&mut self);
}

/// An opaque, session-based speech-recognition engine.
///
/// The pipeline only ever sees this trait; vendor engines are wrapped behind
/// it and injected, which also keeps them mockable (see [`crate::testing`]).
#[async_trait]
pub trait SpeechEngine: Send + Sync + 'static {
    /// Starts a recognition session, resolving once the engine acknowledges
    /// capture.
    ///
    /// Permission failures are fatal to capture and are never retried by the
    /// pipeline. Transient start faults instead surface as an immediate
    /// [`SessionEvent::Error`] + [`SessionEvent::End`] on the event channel.
    async fn start(
        &self,
        options: SessionOptions,
    ) -> Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>), PermissionError>;

    /// Human-readable engine name.
    fn name(&self) -> &str;
}
