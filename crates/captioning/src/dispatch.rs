use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::filter::ContentFilter;
use crate::relay::TtsRelay;
use crate::translate::TranslationRouter;
use crate::{CaptionEvent, OutboundEvent};

/// Throttles, deduplicates, masks and publishes recognition results, and
/// feeds finalized text to the translation router and the TTS relay.
///
/// Called from the handover controller's event loop; all methods are
/// synchronous so the final caption is always on the outbound channel before
/// any of its translations.
pub struct CaptionDispatcher {
    language: String,
    interim_throttle: Duration,
    filter: Arc<ContentFilter>,
    router: Option<Arc<TranslationRouter>>,
    relay: Option<Arc<TtsRelay>>,
    events: broadcast::Sender<OutboundEvent>,
    /// Instant of the last accepted (not last seen) interim.
    last_interim_at: Option<Instant>,
    /// Trimmed text of the previous final, for exact-match dedup.
    last_final: Option<String>,
}

impl CaptionDispatcher {
    pub fn new(
        language: String,
        interim_throttle_ms: u64,
        filter: Arc<ContentFilter>,
        router: Option<Arc<TranslationRouter>>,
        relay: Option<Arc<TtsRelay>>,
        events: broadcast::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            language,
            interim_throttle: Duration::from_millis(interim_throttle_ms),
            filter,
            router,
            relay,
            events,
            last_interim_at: None,
            last_final: None,
        }
    }

    /// Publishes an interim caption unless it arrives inside the throttle
    /// window since the last accepted interim.
    pub fn on_interim(&mut self, raw: &str) {
        let now = Instant::now();
        if let Some(last) = self.last_interim_at
            && now.duration_since(last) < self.interim_throttle
        {
            debug!("Interim caption throttled");
            return;
        }
        self.last_interim_at = Some(now);

        let text = self.filter.mask(&self.language, raw);
        self.publish(CaptionEvent {
            id: Uuid::nil(),
            text,
            is_interim: true,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            language: self.language.clone(),
            expected_translations: 0,
        });
    }

    /// Publishes a final caption, then fans it out to the translation router
    /// and the TTS relay.
    ///
    /// A final whose trimmed text exactly matches the immediately preceding
    /// final is dropped silently; this also discards stale re-finalizations
    /// arriving after a restart.
    pub fn on_final(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.last_final.as_deref() == Some(trimmed) {
            debug!("Duplicate final caption dropped");
            return;
        }
        self.last_final = Some(trimmed.to_string());

        let id = Uuid::new_v4();
        let text = self.filter.mask(&self.language, trimmed);
        let expected_translations = self
            .router
            .as_ref()
            .map(|router| router.expected_translations())
            .unwrap_or(0);

        self.publish(CaptionEvent {
            id,
            text: text.clone(),
            is_interim: false,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            language: self.language.clone(),
            expected_translations,
        });

        if let Some(relay) = &self.relay {
            relay.speak_detached(text.clone());
        }
        if let Some(router) = &self.router {
            router.dispatch(id, text);
        }
    }

    fn publish(&self, caption: CaptionEvent) {
        if self.events.send(OutboundEvent::Caption(caption)).is_err() {
            debug!("No outbound subscribers for caption");
        }
    }
}
