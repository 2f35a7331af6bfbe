use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::OutboundEvent;
use crate::config::CaptioningConfig;
use crate::dispatch::CaptionDispatcher;
use crate::error::CaptioningError;
use crate::filter::{ContentFilter, WordListSource};
use crate::handover::{ControllerEvent, HandoverController};
use crate::relay::TtsRelay;
use crate::speech::SpeechEngine;
use crate::translate::{LanguageDetector, TranslationEngine, TranslationRouter, TranslatorCache};

/// Top-level pipeline status surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineStatus {
    Idle,
    Starting,
    Running,
    Failed { message: String },
}

/// External engines injected into the pipeline.
///
/// All four collaborators are opaque trait objects so vendor engines stay
/// swappable and mockable.
#[derive(Clone)]
pub struct PipelineEngines {
    pub speech: Arc<dyn SpeechEngine>,
    pub translation: Arc<dyn TranslationEngine>,
    pub detector: Arc<dyn LanguageDetector>,
    pub word_lists: Arc<dyn WordListSource>,
}

/// Composes the handover controller, caption dispatcher, translation router
/// and the outbound channel.
///
/// Created once and shared via `Arc`; overlay consumers attach with
/// [`CaptionPipeline::subscribe`].
pub struct CaptionPipeline {
    config: CaptioningConfig,
    engines: PipelineEngines,
    events: broadcast::Sender<OutboundEvent>,
    status: watch::Sender<PipelineStatus>,
    running: Mutex<Option<RunningPipeline>>,
}

struct RunningPipeline {
    queue: mpsc::Sender<ControllerEvent>,
    controller: tokio::task::JoinHandle<()>,
    cache: Arc<TranslatorCache>,
}

impl CaptionPipeline {
    /// Creates the pipeline. Returns `(pipeline, event receiver)`.
    pub fn new(
        config: CaptioningConfig,
        engines: PipelineEngines,
    ) -> (Arc<Self>, broadcast::Receiver<OutboundEvent>) {
        let (events, events_rx) = broadcast::channel(256);
        let (status, _) = watch::channel(PipelineStatus::Idle);

        info!(
            language = %config.speech_language,
            translation = config.translation_active(),
            "Caption pipeline created"
        );

        (
            Arc::new(Self {
                config,
                engines,
                events,
                status,
                running: Mutex::new(None),
            }),
            events_rx,
        )
    }

    /// Returns a new receiver for outbound caption events.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.events.subscribe()
    }

    /// Watch channel mirroring the pipeline status.
    pub fn status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.status.borrow(),
            PipelineStatus::Starting | PipelineStatus::Running
        )
    }

    /// Starts capture.
    ///
    /// Preloads the word list, builds the translator cache and router, then
    /// spawns the handover controller and waits for the engine to acknowledge
    /// the first session. Permission failures surface here and are not
    /// retried.
    pub async fn start(&self) -> Result<(), CaptioningError> {
        self.config.validate()?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CaptioningError::AlreadyRunning);
        }
        let _ = self.status.send(PipelineStatus::Starting);

        let filter = Arc::new(ContentFilter::new(
            self.config.filter_enabled,
            Arc::clone(&self.engines.word_lists),
        ));
        filter.preload(&self.config.speech_language).await;

        let cache = TranslatorCache::new(
            Arc::clone(&self.engines.translation),
            &self.config.translation,
        );
        let router = if self.config.translation_active() {
            Some(Arc::new(TranslationRouter::new(
                Arc::clone(&cache),
                Arc::clone(&self.engines.detector),
                &self.config.speech_language,
                &self.config.translation,
                self.events.clone(),
                self.status.subscribe(),
            )))
        } else {
            None
        };
        let relay = self
            .config
            .tts_relay
            .as_ref()
            .map(|relay| Arc::new(TtsRelay::new(relay.endpoint.clone(), relay.voice)));

        let dispatcher = CaptionDispatcher::new(
            self.config.speech_language.clone(),
            self.config.interim_throttle_ms,
            filter,
            router,
            relay,
            self.events.clone(),
        );

        let (controller, queue, first_start) = HandoverController::spawn(
            Arc::clone(&self.engines.speech),
            self.config.clone(),
            dispatcher,
            self.status.clone(),
        );

        match first_start.await {
            Ok(Ok(())) => {}
            Ok(Err(permission)) => {
                controller.abort();
                cache.destroy().await;
                return Err(permission.into());
            }
            Err(_) => {
                cache.destroy().await;
                return Err(CaptioningError::ControllerExited);
            }
        }

        let _ = self.status.send(PipelineStatus::Running);
        *running = Some(RunningPipeline {
            queue,
            controller,
            cache,
        });
        info!("Caption pipeline started");
        Ok(())
    }

    /// Stops capture.
    ///
    /// Clears all pending timers, asks every slot's engine session to stop,
    /// then releases every translator handle and the detector. In-flight
    /// translation calls are not aborted; their results are discarded.
    pub async fn stop(&self) -> Result<(), CaptioningError> {
        let mut running = self.running.lock().await;
        let Some(active) = running.take() else {
            return Err(CaptioningError::NotRunning);
        };

        let (done_tx, done_rx) = oneshot::channel();
        if active
            .queue
            .send(ControllerEvent::Stop { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        } else {
            warn!("Controller already gone at stop");
            active.controller.abort();
        }

        active.cache.destroy().await;
        self.engines.detector.release().await;
        let _ = self.status.send(PipelineStatus::Idle);
        info!("Caption pipeline stopped");
        Ok(())
    }
}
