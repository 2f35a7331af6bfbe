use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{AUTO_LANGUAGE, TranslationConfig};
use crate::pipeline::PipelineStatus;
use crate::translate::{
    LanguageDetector, LanguagePair, TranslationGroup, TranslatorCache, group_targets,
};
use crate::{CaptionTranslation, OutboundEvent};

/// Fans finalized utterances out to the configured translation targets.
///
/// Requests are grouped by target language at construction, so each final
/// caption issues exactly one translate call per distinct target and the
/// result is republished to every output slot in the group.
pub struct TranslationRouter {
    cache: Arc<TranslatorCache>,
    detector: Arc<dyn LanguageDetector>,
    /// Primary subtag of the speech language, or the "auto" sentinel.
    source_language: String,
    fallback_source: String,
    groups: Vec<TranslationGroup>,
    events: broadcast::Sender<OutboundEvent>,
    status: watch::Receiver<PipelineStatus>,
}

impl TranslationRouter {
    pub fn new(
        cache: Arc<TranslatorCache>,
        detector: Arc<dyn LanguageDetector>,
        speech_language: &str,
        config: &TranslationConfig,
        events: broadcast::Sender<OutboundEvent>,
        status: watch::Receiver<PipelineStatus>,
    ) -> Self {
        let source_language = if speech_language.eq_ignore_ascii_case(AUTO_LANGUAGE) {
            AUTO_LANGUAGE.to_string()
        } else {
            primary_subtag(speech_language).to_string()
        };
        Self {
            cache,
            detector,
            source_language,
            fallback_source: config.fallback_source.clone(),
            groups: group_targets(&config.targets),
            events,
            status,
        }
    }

    /// Translation events renderers should expect per final caption.
    pub fn expected_translations(&self) -> usize {
        self.groups.len()
    }

    /// Fans one finalized utterance out to every translation group.
    ///
    /// Returns immediately; the caption event must already be published so
    /// it precedes every translation. Groups complete independently and in
    /// any order.
    pub fn dispatch(self: &Arc<Self>, id: Uuid, text: String) {
        if self.groups.is_empty() {
            return;
        }
        let router = Arc::clone(self);
        tokio::spawn(async move {
            // Single-shot per utterance, before grouping fan-out.
            let source = router.resolve_source(&text).await;
            for group in router.groups.clone() {
                let router = Arc::clone(&router);
                let source = source.clone();
                let text = text.clone();
                tokio::spawn(async move {
                    router.translate_group(&group, &source, id, &text).await;
                });
            }
        });
    }

    /// Effective source language for one utterance.
    async fn resolve_source(&self, text: &str) -> String {
        if self.source_language != AUTO_LANGUAGE {
            return self.source_language.clone();
        }
        match self.detector.detect(text).await {
            Ok(guesses) => match guesses.first() {
                Some(top) => {
                    debug!(
                        language = %top.language,
                        confidence = top.confidence,
                        "Detected source language"
                    );
                    top.language.clone()
                }
                None => {
                    debug!(fallback = %self.fallback_source, "Detector returned no guesses");
                    self.fallback_source.clone()
                }
            },
            Err(e) => {
                warn!(%e, fallback = %self.fallback_source, "Language detection failed");
                self.fallback_source.clone()
            }
        }
    }

    async fn translate_group(
        &self,
        group: &TranslationGroup,
        source: &str,
        id: Uuid,
        text: &str,
    ) {
        let pair = LanguagePair::new(source, group.target_language.clone());

        let entry = match self.cache.get(&pair, None).await {
            Ok(entry) => entry,
            Err(e) => {
                // Isolated: siblings and the caption itself are unaffected.
                warn!(pair = %pair, %e, "Translator unavailable");
                return;
            }
        };

        let translation = match self.cache.translate(&entry, text).await {
            Ok(translation) => translation,
            Err(e) => {
                warn!(pair = %pair, %e, "Translation failed");
                return;
            }
        };

        let translation = translation.trim();
        if translation.is_empty() || translation == text.trim() {
            debug!(pair = %pair, "Empty or unchanged translation dropped");
            return;
        }
        if !self.pipeline_running() {
            debug!(pair = %pair, "Result arrived after pipeline stop, dropped");
            return;
        }

        for output_slot_index in &group.output_slot_indices {
            let event = OutboundEvent::CaptionTranslation(CaptionTranslation {
                id,
                translation: translation.to_string(),
                source_language: source.to_string(),
                target_language: group.target_language.clone(),
                output_slot_index: *output_slot_index,
            });
            if self.events.send(event).is_err() {
                debug!("No outbound subscribers for translation");
            }
        }
    }

    fn pipeline_running(&self) -> bool {
        matches!(*self.status.borrow(), PipelineStatus::Running)
    }
}

/// Primary subtag of a BCP-47 tag: "en-US" -> "en".
fn primary_subtag(language: &str) -> &str {
    language.split('-').next().unwrap_or(language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TranslationRequest;
    use crate::testing::{MockLanguageDetector, MockTranslationEngine};
    use std::time::Duration;

    fn requests(pairs: &[(&str, usize)]) -> Vec<TranslationRequest> {
        pairs
            .iter()
            .map(|(language, slot)| TranslationRequest {
                target_language: language.to_string(),
                output_slot_index: *slot,
            })
            .collect()
    }

    struct Fixture {
        engine: Arc<MockTranslationEngine>,
        detector: Arc<MockLanguageDetector>,
        router: Arc<TranslationRouter>,
        events: broadcast::Receiver<OutboundEvent>,
        _status: watch::Sender<PipelineStatus>,
    }

    fn fixture(speech_language: &str, targets: Vec<TranslationRequest>) -> Fixture {
        let engine = MockTranslationEngine::new();
        let detector = MockLanguageDetector::new();
        let config = TranslationConfig {
            enabled: true,
            targets,
            min_call_interval_ms: 0,
            ..TranslationConfig::default()
        };
        let cache = TranslatorCache::new(engine.clone(), &config);
        let (events_tx, events_rx) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(PipelineStatus::Running);
        let router = Arc::new(TranslationRouter::new(
            cache,
            detector.clone(),
            speech_language,
            &config,
            events_tx,
            status_rx,
        ));
        Fixture {
            engine,
            detector,
            router,
            events: events_rx,
            _status: status_tx,
        }
    }

    async fn collect_translations(
        events: &mut broadcast::Receiver<OutboundEvent>,
        count: usize,
    ) -> Vec<CaptionTranslation> {
        let mut translations = Vec::new();
        for _ in 0..count {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("timed out waiting for translation")
                .expect("event channel closed");
            match event {
                OutboundEvent::CaptionTranslation(t) => translations.push(t),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        translations
    }

    #[tokio::test]
    async fn duplicate_targets_issue_one_call_republished_to_all_slots() {
        let mut fx = fixture("ja-JP", requests(&[("en", 0), ("en", 1), ("fr", 2)]));
        assert_eq!(fx.router.expected_translations(), 2);

        let id = Uuid::new_v4();
        fx.router.dispatch(id, "konnichiwa".to_string());

        let translations = collect_translations(&mut fx.events, 3).await;
        let en_slots: Vec<usize> = translations
            .iter()
            .filter(|t| t.target_language == "en")
            .map(|t| t.output_slot_index)
            .collect();
        let fr_slots: Vec<usize> = translations
            .iter()
            .filter(|t| t.target_language == "fr")
            .map(|t| t.output_slot_index)
            .collect();
        assert_eq!(en_slots, vec![0, 1]);
        assert_eq!(fr_slots, vec![2]);
        assert!(translations.iter().all(|t| t.id == id));
        assert!(translations.iter().all(|t| t.source_language == "ja"));

        // Exactly one call per distinct target.
        assert_eq!(fx.engine.translate_calls().len(), 2);
        assert_eq!(fx.engine.created_pairs().len(), 2);
    }

    #[tokio::test]
    async fn auto_source_uses_detector_top_guess_for_cache_keys() {
        let fx = fixture("auto", requests(&[("en", 0)]));
        fx.detector.guess(&[("es", 0.92), ("pt", 0.4)]);

        let mut events = fx.router.events.subscribe();
        fx.router.dispatch(Uuid::new_v4(), "hola".to_string());
        let translations = collect_translations(&mut events, 1).await;

        assert_eq!(translations[0].source_language, "es");
        assert_eq!(fx.detector.detect_count(), 1);
        assert_eq!(
            fx.engine.created_pairs(),
            vec![LanguagePair::new("es", "en")]
        );
    }

    #[tokio::test]
    async fn failed_detection_falls_back_to_configured_source() {
        let fx = fixture("auto", requests(&[("de", 0)]));
        fx.detector.fail_detection();

        let mut events = fx.router.events.subscribe();
        fx.router.dispatch(Uuid::new_v4(), "text".to_string());
        let translations = collect_translations(&mut events, 1).await;

        assert_eq!(translations[0].source_language, "en");
        assert_eq!(
            fx.engine.created_pairs(),
            vec![LanguagePair::new("en", "de")]
        );
    }

    #[tokio::test]
    async fn one_failing_target_does_not_cancel_siblings() {
        let fx = fixture("en-US", requests(&[("fr", 0), ("de", 1)]));
        fx.engine.fail_target("fr");

        let mut events = fx.router.events.subscribe();
        fx.router.dispatch(Uuid::new_v4(), "hello".to_string());

        let translations = collect_translations(&mut events, 1).await;
        assert_eq!(translations[0].target_language, "de");
        // Both targets were attempted.
        assert_eq!(fx.engine.translate_calls().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_translation_is_dropped() {
        let fx = fixture("en-US", requests(&[("en", 0), ("fr", 1)]));
        fx.engine.respond_with("en", "hello");

        let mut events = fx.router.events.subscribe();
        fx.router.dispatch(Uuid::new_v4(), "hello".to_string());

        // Only the fr result comes through; the unchanged en result is dropped.
        let translations = collect_translations(&mut events, 1).await;
        assert_eq!(translations[0].target_language, "fr");
        tokio::task::yield_now().await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
