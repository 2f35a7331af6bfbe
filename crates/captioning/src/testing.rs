//! Scripted engine doubles for tests.
//!
//! Lives in the crate proper (not behind `#[cfg(test)]`) so integration and
//! end-to-end test crates can drive the pipeline without a vendor engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::{PermissionError, TranslationError};
use crate::filter::{WordList, WordListSource};
use crate::speech::{SessionEvent, SessionOptions, SpeechEngine, SpeechSession};
use crate::translate::{
    Availability, DownloadProgress, LanguageGuess, LanguagePair, TranslationEngine,
    TranslatorHandle,
};

/// Test-side handle to one scripted recognition session.
///
/// The engine hands one of these to the test for every `start` call; the
/// test then plays the engine's role by pushing events.
pub struct SessionDriver {
    pub options: SessionOptions,
    events: mpsc::Sender<SessionEvent>,
    stopped: watch::Receiver<bool>,
}

impl SessionDriver {
    pub async fn interim(&self, text: &str) {
        self.send(SessionEvent::Result {
            text: text.to_string(),
            is_final: false,
        })
        .await;
    }

    pub async fn finalize(&self, text: &str) {
        self.send(SessionEvent::Result {
            text: text.to_string(),
            is_final: true,
        })
        .await;
    }

    pub async fn error(&self, code: crate::speech::EngineErrorCode) {
        self.send(SessionEvent::Error(code)).await;
    }

    pub async fn end(&self) {
        self.send(SessionEvent::End).await;
    }

    /// Whether the pipeline has asked this session to stop.
    pub fn stop_requested(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Waits until the pipeline asks this session to stop.
    pub async fn wait_for_stop(&mut self) {
        if *self.stopped.borrow() {
            return;
        }
        let _ = self.stopped.changed().await;
    }

    async fn send(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}

struct MockSession {
    stopped: watch::Sender<bool>,
}

#[async_trait]
impl SpeechSession for MockSession {
    async fn stop(&mut self) {
        let _ = self.stopped.send(true);
    }
}

/// Scripted speech engine. Every `start` yields a [`SessionDriver`] on the
/// channel returned by [`MockSpeechEngine::new`].
pub struct MockSpeechEngine {
    drivers: mpsc::UnboundedSender<SessionDriver>,
    fail_next: Mutex<Option<PermissionError>>,
    start_count: AtomicUsize,
}

impl MockSpeechEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionDriver>) {
        let (drivers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                drivers,
                fail_next: Mutex::new(None),
                start_count: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// Makes the next `start` call fail with a permission error.
    pub fn fail_next_start(&self, error: PermissionError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Total `start` calls observed, including failed ones.
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechEngine for MockSpeechEngine {
    async fn start(
        &self,
        options: SessionOptions,
    ) -> Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>), PermissionError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let _ = self.drivers.send(SessionDriver {
            options,
            events: events_tx,
            stopped: stopped_rx,
        });
        Ok((Box::new(MockSession { stopped: stopped_tx }), events_rx))
    }

    fn name(&self) -> &str {
        "mock-speech"
    }
}

struct MockTranslator {
    pair: LanguagePair,
    shared: Arc<TranslationShared>,
}

#[derive(Default)]
struct TranslationShared {
    unsupported: Mutex<HashSet<LanguagePair>>,
    needs_download: Mutex<HashSet<LanguagePair>>,
    /// Fixed responses per target language; default is "[target] text".
    responses: Mutex<HashMap<String, String>>,
    failing_targets: Mutex<HashSet<String>>,
    created: Mutex<Vec<LanguagePair>>,
    released: Mutex<Vec<LanguagePair>>,
    translate_calls: Mutex<Vec<(LanguagePair, String)>>,
}

#[async_trait]
impl TranslatorHandle for MockTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslationError> {
        self.shared
            .translate_calls
            .lock()
            .push((self.pair.clone(), text.to_string()));
        if self.shared.failing_targets.lock().contains(&self.pair.target) {
            return Err(TranslationError::Network("mock translate failure".to_string()));
        }
        if let Some(fixed) = self.shared.responses.lock().get(&self.pair.target) {
            return Ok(fixed.clone());
        }
        Ok(format!("[{}] {}", self.pair.target, text))
    }

    async fn release(&self) {
        self.shared.released.lock().push(self.pair.clone());
    }
}

/// Scripted translation engine with per-pair availability and per-target
/// canned responses or failures.
pub struct MockTranslationEngine {
    shared: Arc<TranslationShared>,
}

impl MockTranslationEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(TranslationShared::default()),
        })
    }

    pub fn mark_unsupported(&self, source: &str, target: &str) {
        self.shared
            .unsupported
            .lock()
            .insert(LanguagePair::new(source, target));
    }

    pub fn mark_needs_download(&self, source: &str, target: &str) {
        self.shared
            .needs_download
            .lock()
            .insert(LanguagePair::new(source, target));
    }

    /// Fixed response for every call targeting `target`.
    pub fn respond_with(&self, target: &str, text: &str) {
        self.shared
            .responses
            .lock()
            .insert(target.to_string(), text.to_string());
    }

    /// Every call targeting `target` fails with a network error.
    pub fn fail_target(&self, target: &str) {
        self.shared.failing_targets.lock().insert(target.to_string());
    }

    pub fn created_pairs(&self) -> Vec<LanguagePair> {
        self.shared.created.lock().clone()
    }

    pub fn released_pairs(&self) -> Vec<LanguagePair> {
        self.shared.released.lock().clone()
    }

    pub fn translate_calls(&self) -> Vec<(LanguagePair, String)> {
        self.shared.translate_calls.lock().clone()
    }
}

#[async_trait]
impl TranslationEngine for MockTranslationEngine {
    async fn check_availability(
        &self,
        pair: &LanguagePair,
    ) -> Result<Availability, TranslationError> {
        if self.shared.unsupported.lock().contains(pair) {
            return Ok(Availability::Unsupported);
        }
        if self.shared.needs_download.lock().contains(pair) {
            return Ok(Availability::NeedsDownload);
        }
        Ok(Availability::Ready)
    }

    async fn create(
        &self,
        pair: &LanguagePair,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<Box<dyn TranslatorHandle>, TranslationError> {
        if self.shared.needs_download.lock().contains(pair) {
            for loaded in [0u64, 512, 1024] {
                let _ = progress
                    .send(DownloadProgress {
                        pair: pair.clone(),
                        loaded_bytes: loaded,
                        total_bytes: Some(1024),
                    })
                    .await;
            }
        }
        self.shared.created.lock().push(pair.clone());
        Ok(Box::new(MockTranslator {
            pair: pair.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Scripted language detector.
pub struct MockLanguageDetector {
    guesses: Mutex<Vec<LanguageGuess>>,
    fail: Mutex<bool>,
    detect_count: AtomicUsize,
    released: Mutex<bool>,
}

impl MockLanguageDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            guesses: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
            detect_count: AtomicUsize::new(0),
            released: Mutex::new(false),
        })
    }

    /// Ranked guesses returned by every `detect` call, best first.
    pub fn guess(&self, languages: &[(&str, f32)]) {
        *self.guesses.lock() = languages
            .iter()
            .map(|(language, confidence)| LanguageGuess {
                language: language.to_string(),
                confidence: *confidence,
            })
            .collect();
    }

    pub fn fail_detection(&self) {
        *self.fail.lock() = true;
    }

    pub fn detect_count(&self) -> usize {
        self.detect_count.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }
}

#[async_trait]
impl crate::translate::LanguageDetector for MockLanguageDetector {
    async fn detect(&self, _text: &str) -> anyhow::Result<Vec<LanguageGuess>> {
        self.detect_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock() {
            anyhow::bail!("mock detection failure");
        }
        Ok(self.guesses.lock().clone())
    }

    async fn release(&self) {
        *self.released.lock() = true;
    }
}

/// Word-list source serving fixed in-memory lists.
#[derive(Default)]
pub struct StaticWordListSource {
    lists: Mutex<HashMap<String, WordList>>,
}

impl StaticWordListSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, language: &str, list: WordList) {
        self.lists.lock().insert(language.to_string(), list);
    }
}

#[async_trait]
impl WordListSource for StaticWordListSource {
    async fn load(&self, language: &str) -> anyhow::Result<WordList> {
        Ok(self
            .lists
            .lock()
            .get(language)
            .cloned()
            .unwrap_or_default())
    }
}
