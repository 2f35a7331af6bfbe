use thiserror::Error;

/// Errors surfaced by the pipeline's control surface (start/stop).
#[derive(Debug, Error)]
pub enum CaptioningError {
    #[error("invalid captioning config: {0}")]
    Config(String),

    #[error("captioning is already running")]
    AlreadyRunning,

    #[error("captioning is not running")]
    NotRunning,

    #[error("captioning controller exited unexpectedly")]
    ControllerExited,

    #[error(transparent)]
    Permission(#[from] PermissionError),
}

/// Capture-permission failures.
///
/// Fatal to starting capture: surfaced immediately to the operator and never
/// retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("microphone access denied")]
    Denied,

    #[error("no capture device found")]
    DeviceNotFound,

    #[error("capture device is busy")]
    DeviceBusy,
}

/// Per-target translation failures.
///
/// Always isolated: logged per language pair, never aborting the caption or
/// sibling translation calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("language pair {src}->{target} is not supported")]
    Unavailable { src: String, target: String },

    #[error("translation network error: {0}")]
    Network(String),

    #[error("failed to create translator: {0}")]
    CreateFailed(String),
}
