use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::CaptioningConfig;
use crate::dispatch::CaptionDispatcher;
use crate::error::PermissionError;
use crate::pipeline::PipelineStatus;
use crate::slot::{SLOT_COUNT, SlotPool, SlotState};
use crate::speech::{EngineErrorCode, SessionEvent, SessionOptions, SpeechEngine, SpeechSession};
use crate::task::AbortOnDrop;

const QUEUE_DEPTH: usize = 64;

/// Entries on the controller's internal event queue, processed one at a time.
pub(crate) enum ControllerEvent {
    /// Engine acknowledged (or refused) a session start.
    Started {
        slot: usize,
        generation: u64,
        outcome: Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>), PermissionError>,
    },
    /// An event from a slot's live session.
    Session {
        slot: usize,
        generation: u64,
        event: SessionEvent,
    },
    /// Short-pause timer fired.
    PauseElapsed { slot: usize, generation: u64 },
    /// Delayed restart is due.
    RestartDue,
    /// Stop captioning; acked on `done` once every session was asked to stop.
    Stop { done: oneshot::Sender<()> },
}

/// Drives the recognition slot pool: decides the active slot, pre-warms the
/// standby in dual-instance mode, and restarts on failure, so listeners never
/// observe a caption gap across the engine's mandatory session restarts.
///
/// All cross-callback state lives here and is only touched by the event loop;
/// helper tasks (session forwarders, timers) communicate exclusively through
/// the queue.
pub(crate) struct HandoverController {
    engine: Arc<dyn SpeechEngine>,
    config: CaptioningConfig,
    dispatcher: CaptionDispatcher,
    status: watch::Sender<PipelineStatus>,
    pool: SlotPool,
    active: usize,
    /// Single-flight guard: at most one scheduled restart in flight.
    restart_pending: bool,
    /// Slot and session generation the pending restart was scheduled for.
    restart_slot: usize,
    restart_generation: u64,
    pause_timer: Option<AbortOnDrop>,
    restart_timer: Option<AbortOnDrop>,
    queue: mpsc::Sender<ControllerEvent>,
    /// Reports the first start outcome back to `CaptionPipeline::start`.
    initial_start: Option<oneshot::Sender<Result<(), PermissionError>>>,
    stopping: bool,
}

impl HandoverController {
    /// Spawns the controller loop and kicks off the first session.
    pub(crate) fn spawn(
        engine: Arc<dyn SpeechEngine>,
        config: CaptioningConfig,
        dispatcher: CaptionDispatcher,
        status: watch::Sender<PipelineStatus>,
    ) -> (
        tokio::task::JoinHandle<()>,
        mpsc::Sender<ControllerEvent>,
        oneshot::Receiver<Result<(), PermissionError>>,
    ) {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
        let (initial_tx, initial_rx) = oneshot::channel();
        let controller = Self {
            engine,
            config,
            dispatcher,
            status,
            pool: SlotPool::new(),
            active: 0,
            restart_pending: false,
            restart_slot: 0,
            restart_generation: 0,
            pause_timer: None,
            restart_timer: None,
            queue: queue_tx.clone(),
            initial_start: Some(initial_tx),
            stopping: false,
        };
        let handle = tokio::spawn(controller.run(queue_rx));
        (handle, queue_tx, initial_rx)
    }

    async fn run(mut self, mut queue: mpsc::Receiver<ControllerEvent>) {
        info!(
            engine = %self.engine.name(),
            language = %self.config.speech_language,
            dual_instance = self.config.dual_instance,
            "Captioning controller started"
        );
        self.begin_start(self.active);

        while let Some(event) = queue.recv().await {
            if self.handle(event).await {
                break;
            }
        }
        debug!("Captioning controller stopped");
    }

    /// Processes one queue entry. Returns `true` when the loop should exit.
    async fn handle(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Started {
                slot,
                generation,
                outcome,
            } => self.on_started(slot, generation, outcome),
            ControllerEvent::Session {
                slot,
                generation,
                event,
            } => {
                // Events from a superseded session are stale.
                if self.pool.slot(slot).generation() == generation {
                    match event {
                        SessionEvent::Result { text, is_final } => {
                            self.on_result(slot, &text, is_final)
                        }
                        SessionEvent::Error(code) => self.on_error(slot, code),
                        SessionEvent::End => self.on_end(slot),
                    }
                }
            }
            ControllerEvent::PauseElapsed { slot, generation } => {
                self.on_pause_elapsed(slot, generation).await
            }
            ControllerEvent::RestartDue => self.on_restart_due(),
            ControllerEvent::Stop { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    /// Stopped -> Starting; the engine ack comes back through the queue.
    fn begin_start(&mut self, slot: usize) {
        let generation = self.pool.slot_mut(slot).begin_start();
        debug!(slot, generation, "Starting recognition session");

        let engine = Arc::clone(&self.engine);
        let options = SessionOptions {
            language: self.config.speech_language.clone(),
            interim_results: true,
        };
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let outcome = engine.start(options).await;
            let _ = queue
                .send(ControllerEvent::Started {
                    slot,
                    generation,
                    outcome,
                })
                .await;
        });
    }

    fn on_started(
        &mut self,
        slot: usize,
        generation: u64,
        outcome: Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>), PermissionError>,
    ) {
        let stale = self.pool.slot(slot).generation() != generation
            || self.pool.slot(slot).state() != SlotState::Starting;

        match outcome {
            Ok((session, events)) => {
                if stale || self.stopping {
                    debug!(slot, generation, "Superseded session start, stopping it");
                    let mut session = session;
                    tokio::spawn(async move { session.stop().await });
                    return;
                }
                self.pool.slot_mut(slot).activate(session);
                self.spawn_forwarder(slot, generation, events);
                info!(slot, "Recognition session running");
                if let Some(ack) = self.initial_start.take() {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(permission) => {
                let _ = self.pool.slot_mut(slot).reset();
                error!(slot, %permission, "Recognition start refused");
                let _ = self.status.send(PipelineStatus::Failed {
                    message: permission.to_string(),
                });
                if let Some(ack) = self.initial_start.take() {
                    let _ = ack.send(Err(permission));
                }
            }
        }
    }

    /// Pipes session events into the queue, tagged for staleness checks.
    fn spawn_forwarder(
        &self,
        slot: usize,
        generation: u64,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if queue
                    .send(ControllerEvent::Session {
                        slot,
                        generation,
                        event,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    fn on_result(&mut self, slot: usize, text: &str, is_final: bool) {
        if slot != self.active {
            debug!(slot, "Result from non-active slot ignored");
            return;
        }
        // Any activity cancels the forced-finalization timer.
        self.pause_timer = None;

        if is_final {
            // Pre-warm the standby immediately so it is already listening
            // when this session hits its mandatory end.
            if self.config.dual_instance && !self.stopping {
                let standby = SlotPool::standby_of(slot);
                if self.pool.slot(standby).state() == SlotState::Stopped {
                    debug!(standby, "Pre-starting standby slot");
                    self.begin_start(standby);
                }
            }
            self.dispatcher.on_final(text);
        } else {
            self.arm_pause_timer(slot);
            self.dispatcher.on_interim(text);
        }
    }

    fn arm_pause_timer(&mut self, slot: usize) {
        if self.config.short_pause_ms == 0 {
            return;
        }
        let generation = self.pool.slot(slot).generation();
        let delay = Duration::from_millis(self.config.short_pause_ms);
        let queue = self.queue.clone();
        self.pause_timer = Some(AbortOnDrop(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue
                .send(ControllerEvent::PauseElapsed { slot, generation })
                .await;
        })));
    }

    /// Forces early finalization after an interim with no follow-up activity.
    async fn on_pause_elapsed(&mut self, slot: usize, generation: u64) {
        self.pause_timer = None;
        // Pre-start always wins: a handover or a newer session since the
        // timer was armed invalidates the forced stop.
        if slot != self.active
            || self.pool.slot(slot).generation() != generation
            || self.pool.slot(slot).state() != SlotState::Running
        {
            return;
        }
        debug!(slot, "Short pause elapsed, forcing finalization");
        if let Some(session) = self.pool.slot_mut(slot).session_mut() {
            session.stop().await;
        }
    }

    fn on_error(&mut self, slot: usize, code: EngineErrorCode) {
        if slot != self.active {
            if code == EngineErrorCode::Aborted {
                // Expected handover noise.
                debug!(slot, "Standby session aborted");
            } else {
                warn!(slot, error = %code, "Non-active recognition error");
            }
            return;
        }
        warn!(slot, error = %code, "Active recognition error");
        self.schedule_restart();
    }

    fn on_end(&mut self, slot: usize) {
        let _ = self.pool.slot_mut(slot).reset();
        if slot != self.active {
            debug!(slot, "Non-active session ended");
            return;
        }
        self.pause_timer = None;
        if self.stopping {
            return;
        }

        let standby = SlotPool::standby_of(slot);
        let standby_state = self.pool.slot(standby).state();
        if self.config.dual_instance
            && matches!(standby_state, SlotState::Running | SlotState::Starting)
        {
            // Gapless handover: the standby is already warm, so the active
            // index switches without a stop/start round-trip.
            self.active = standby;
            info!(from = slot, to = standby, standby_state = ?standby_state, "Slot handover");
        } else {
            self.schedule_restart();
        }
    }

    fn schedule_restart(&mut self) {
        if self.stopping {
            return;
        }
        if self.restart_pending {
            debug!("Restart already pending");
            return;
        }
        self.restart_pending = true;
        self.restart_slot = self.active;
        self.restart_generation = self.pool.slot(self.active).generation();

        let delay = Duration::from_millis(self.config.restart_delay_ms);
        debug!(
            slot = self.restart_slot,
            delay_ms = self.config.restart_delay_ms,
            "Restart scheduled"
        );
        let queue = self.queue.clone();
        self.restart_timer = Some(AbortOnDrop(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.send(ControllerEvent::RestartDue).await;
        })));
    }

    fn on_restart_due(&mut self) {
        self.restart_pending = false;
        self.restart_timer = None;
        if self.stopping {
            return;
        }

        let slot = self.restart_slot;
        if slot != self.active {
            debug!(slot, "Restart superseded by handover");
            return;
        }
        match self.pool.slot(slot).state() {
            SlotState::Stopped => {
                debug!(slot, "Restarting recognition");
                self.begin_start(slot);
            }
            SlotState::Running if self.pool.slot(slot).generation() == self.restart_generation => {
                // The errored session is still up; cycle it.
                debug!(slot, "Cycling errored recognition session");
                if let Some(mut session) = self.pool.slot_mut(slot).reset() {
                    tokio::spawn(async move { session.stop().await });
                }
                self.begin_start(slot);
            }
            // A newer session took the slot while the restart was pending.
            SlotState::Running | SlotState::Starting => {}
        }
    }

    async fn shutdown(&mut self) {
        self.stopping = true;
        self.pause_timer = None;
        self.restart_timer = None;
        self.restart_pending = false;

        for index in 0..SLOT_COUNT {
            if let Some(mut session) = self.pool.slot_mut(index).reset() {
                debug!(slot = index, "Stopping recognition session");
                session.stop().await;
            }
        }
        let _ = self.status.send(PipelineStatus::Idle);
        info!("Captioning stopped");
    }
}
