use serde::{Deserialize, Serialize};

use crate::error::CaptioningError;
use crate::relay::TtsVoice;
use crate::translate::TranslationRequest;

/// Upper bound on configured (target language, output slot) pairs.
pub const MAX_TRANSLATION_TARGETS: usize = 3;

/// Speech language value that defers the translation source to the detector.
pub const AUTO_LANGUAGE: &str = "auto";

/// Configuration for the live captioning pipeline.
///
/// Supplied by the settings surface; read-only to this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptioningConfig {
    /// BCP-47 speech recognition language, e.g. "en-US". The special value
    /// "auto" defers the translation source language to the detector.
    pub speech_language: String,
    /// Forced-finalization delay after an interim result with no follow-up
    /// activity, in milliseconds. 0 disables the short-pause heuristic.
    pub short_pause_ms: u64,
    /// Minimum interval between dispatched interim captions.
    pub interim_throttle_ms: u64,
    /// Keep a pre-warmed standby recognition slot for gapless handover.
    pub dual_instance: bool,
    /// Delay before restarting the active slot after a failure or an end
    /// with no warm standby.
    pub restart_delay_ms: u64,
    /// Mask flagged vocabulary before publishing.
    pub filter_enabled: bool,
    /// Text-to-speech relay; `None` disables the side channel.
    pub tts_relay: Option<TtsRelayConfig>,
    pub translation: TranslationConfig,
}

impl Default for CaptioningConfig {
    fn default() -> Self {
        Self {
            speech_language: "en-US".to_string(),
            short_pause_ms: 2000,
            interim_throttle_ms: 250,
            dual_instance: true,
            restart_delay_ms: 300,
            filter_enabled: true,
            tts_relay: None,
            translation: TranslationConfig::default(),
        }
    }
}

impl CaptioningConfig {
    /// Validates operator-supplied values before the pipeline starts.
    pub fn validate(&self) -> Result<(), CaptioningError> {
        if self.speech_language.is_empty() {
            return Err(CaptioningError::Config(
                "speech_language must not be empty".to_string(),
            ));
        }
        let targets = &self.translation.targets;
        if targets.len() > MAX_TRANSLATION_TARGETS {
            return Err(CaptioningError::Config(format!(
                "at most {} translation targets are supported, got {}",
                MAX_TRANSLATION_TARGETS,
                targets.len()
            )));
        }
        for target in targets {
            if target.output_slot_index >= MAX_TRANSLATION_TARGETS {
                return Err(CaptioningError::Config(format!(
                    "output slot index {} is out of range",
                    target.output_slot_index
                )));
            }
            if target.target_language.is_empty() {
                return Err(CaptioningError::Config(
                    "translation target language must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the translation router should be wired up at all.
    pub fn translation_active(&self) -> bool {
        self.translation.enabled && !self.translation.targets.is_empty()
    }
}

/// Text-to-speech relay endpoint and voice parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsRelayConfig {
    /// `host:port` of the relay socket.
    pub endpoint: String,
    #[serde(default)]
    pub voice: TtsVoice,
}

/// Translation fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub enabled: bool,
    /// Source language used when the speech language is "auto" and detection
    /// fails or returns nothing.
    pub fallback_source: String,
    /// Up to [`MAX_TRANSLATION_TARGETS`] (target language, output slot) pairs.
    pub targets: Vec<TranslationRequest>,
    /// Minimum interval between translate calls on one language pair.
    pub min_call_interval_ms: u64,
    /// Idle time after which a cached translator is destroyed by the sweep.
    pub idle_ttl_secs: u64,
    /// Period of the idle sweep.
    pub sweep_interval_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fallback_source: "en".to_string(),
            targets: Vec::new(),
            min_call_interval_ms: 500,
            idle_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(lang: &str, slot: usize) -> TranslationRequest {
        TranslationRequest {
            target_language: lang.to_string(),
            output_slot_index: slot,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CaptioningConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_more_than_three_targets() {
        let mut config = CaptioningConfig::default();
        config.translation.targets = vec![
            target("en", 0),
            target("fr", 1),
            target("de", 2),
            target("es", 0),
        ];
        assert!(matches!(
            config.validate(),
            Err(CaptioningError::Config(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_output_slot() {
        let mut config = CaptioningConfig::default();
        config.translation.targets = vec![target("en", 3)];
        assert!(matches!(
            config.validate(),
            Err(CaptioningError::Config(_))
        ));
    }

    #[test]
    fn translation_active_requires_flag_and_targets() {
        let mut config = CaptioningConfig::default();
        assert!(!config.translation_active());
        config.translation.enabled = true;
        assert!(!config.translation_active());
        config.translation.targets = vec![target("fr", 0)];
        assert!(config.translation_active());
    }
}
