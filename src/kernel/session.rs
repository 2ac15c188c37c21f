use std::sync::{Arc, Weak};

use serde::Serialize;
use serde_json::{json, to_value, Value};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::event::{kinds, ClientInfo, Event, EventFactory, Fixation, SeqRating, StimulusShown, TaskResult};
use super::host::{Connectivity, FrameClock, IntervalFrameClock, Lifecycle, ManualConnectivity};
use super::queue::{EventQueue, FlushController, FlushOutcome};
use super::sampler::FpsSampler;
use super::state::{SessionCell, SessionState, TaskTimers};
use super::time::{generate_session_id, Clock, SystemClock};
use crate::config::AgentConfig;
use crate::error::{Result, TelemetryError};
use crate::services::http::{BulkTransport, HttpBulkTransport, UnloadBeacon};
use crate::services::push::{LoggingObserver, PushChannel, PushConnector, PushObserver, PushState, WsConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminationCause {
    Stop,
    Unload,
}

/// Wires host capabilities and transports into a running [`Session`].
/// Anything not supplied falls back to a default built from the config:
/// HTTP bulk via reqwest and a websocket push channel.
pub struct SessionBuilder {
    config: AgentConfig,
    clock: Option<Arc<dyn Clock>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    lifecycle: Option<Arc<dyn Lifecycle>>,
    frame_clock: Option<Arc<dyn FrameClock>>,
    client_info: Option<ClientInfo>,
    bulk: Option<Arc<dyn BulkTransport>>,
    beacon: Option<Arc<dyn UnloadBeacon>>,
    push_connector: Option<Arc<dyn PushConnector>>,
    push_observer: Option<Arc<dyn PushObserver>>,
}

impl SessionBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            clock: None,
            connectivity: None,
            lifecycle: None,
            frame_clock: None,
            client_info: None,
            bulk: None,
            beacon: None,
            push_connector: None,
            push_observer: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn frame_clock(mut self, frame_clock: Arc<dyn FrameClock>) -> Self {
        self.frame_clock = Some(frame_clock);
        self
    }

    pub fn client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = Some(info);
        self
    }

    pub fn bulk(mut self, bulk: Arc<dyn BulkTransport>) -> Self {
        self.bulk = Some(bulk);
        self
    }

    pub fn beacon(mut self, beacon: Arc<dyn UnloadBeacon>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    pub fn push_connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.push_connector = Some(connector);
        self
    }

    pub fn push_observer(mut self, observer: Arc<dyn PushObserver>) -> Self {
        self.push_observer = Some(observer);
        self
    }

    /// Validates the config, opens the push channel in the background and
    /// starts the sampler. Must run inside a tokio runtime.
    pub fn start(self) -> Result<Arc<Session>> {
        self.config.validate()?;
        let handle = Handle::try_current().map_err(|_| TelemetryError::NoRuntime)?;

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ManualConnectivity::default()));
        let bulk = self
            .bulk
            .unwrap_or_else(|| Arc::new(HttpBulkTransport::new(&config)));
        let frame_clock = self
            .frame_clock
            .unwrap_or_else(|| Arc::new(IntervalFrameClock::new(config.frame_rate_hz)));
        let client_info = self.client_info.unwrap_or_default();
        let push_url = config.push_url()?;

        let session_id = generate_session_id(clock.now_ms());
        let factory = EventFactory::new(config.game_id.clone(), session_id, clock);
        let queue = Arc::new(EventQueue::new(config.max_queue_len));

        let push_connector = self
            .push_connector
            .unwrap_or_else(|| Arc::new(WsConnector));
        let push = Arc::new(PushChannel::new(
            self.push_observer.unwrap_or_else(|| Arc::new(LoggingObserver)),
        ));

        let session = Arc::new(Session {
            factory: factory.clone(),
            state: SessionCell::new(),
            flush: FlushController::new(queue, bulk, Arc::clone(&connectivity), handle.clone()),
            push: Arc::clone(&push),
            timers: TaskTimers::new(),
            sampler: Arc::new(FpsSampler::new()),
            beacon: self.beacon,
            cancel: CancellationToken::new(),
            background: TaskTracker::new(),
            config,
        });

        info!(
            "Starting telemetry session {} for game {}",
            session.session_id(),
            session.game_id()
        );

        session.background.spawn_on(
            Arc::clone(&push).run(push_connector, push_url, factory.clone(), client_info, session.cancel.clone()),
            &handle,
        );

        session.background.spawn_on(
            Arc::clone(&session.sampler).run_collection(frame_clock, session.cancel.clone()),
            &handle,
        );
        session.background.spawn_on(
            Arc::clone(&session.sampler).run_aggregation(
                session.config.fps_agg_period(),
                factory,
                push,
                session.cancel.clone(),
            ),
            &handle,
        );

        session.background.spawn_on(
            watch_connectivity(Arc::downgrade(&session), connectivity.subscribe(), session.cancel.clone()),
            &handle,
        );
        if let Some(lifecycle) = self.lifecycle {
            session.background.spawn_on(
                watch_lifecycle(Arc::downgrade(&session), lifecycle, session.cancel.clone()),
                &handle,
            );
        }
        session.background.close();

        session.state.activate();
        Ok(session)
    }
}

/// Public surface of the agent. Every method returns immediately and never
/// reports failure to the caller; delivery problems only show up in the log.
pub struct Session {
    config: AgentConfig,
    factory: EventFactory,
    state: SessionCell,
    flush: FlushController,
    push: Arc<PushChannel>,
    timers: TaskTimers,
    sampler: Arc<FpsSampler>,
    beacon: Option<Arc<dyn UnloadBeacon>>,
    cancel: CancellationToken,
    background: TaskTracker,
}

impl Session {
    pub fn builder(config: AgentConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn session_id(&self) -> &str {
        self.factory.session_id()
    }

    pub fn game_id(&self) -> &str {
        self.factory.game_id()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn push_state(&self) -> PushState {
        self.push.state()
    }

    /// Events waiting for the bulk channel.
    pub fn pending(&self) -> usize {
        self.flush.queue().len()
    }

    pub fn pending_events(&self) -> Vec<Event> {
        self.flush.queue().snapshot()
    }

    pub fn sampler(&self) -> &FpsSampler {
        &self.sampler
    }

    pub fn is_task_running(&self, task_id: &str) -> bool {
        self.timers.is_running(task_id)
    }

    pub fn track(&self, event_type: &str, data: Option<Value>) {
        if self.state.get() != SessionState::Active {
            debug!("Session not active, ignoring {}", event_type);
            return;
        }
        self.flush.enqueue(self.factory.event(event_type, data));
        self.flush.flush(false);
    }

    fn track_payload<T: Serialize>(&self, event_type: &str, payload: &T) {
        match to_value(payload) {
            Ok(data) => self.track(event_type, Some(data)),
            Err(e) => warn!("Dropping {} event: {}", event_type, e),
        }
    }

    pub fn log_error(&self, name: &str, description: &str) {
        self.track(kinds::ERROR, Some(json!({ "name": name, "description": description })));
    }

    pub fn track_heatmap<V: Serialize>(&self, level_name: &str, voxels: V) {
        match to_value(voxels) {
            Ok(voxels) => self.track(
                kinds::HEATMAP_VOXELS,
                Some(json!({ "levelName": level_name, "voxels": voxels })),
            ),
            Err(e) => warn!("Dropping heatmap for {}: {}", level_name, e),
        }
    }

    pub fn track_task_result(&self, result: &TaskResult) {
        self.track_payload(kinds::TASK_RESULT, result);
    }

    pub fn track_task_start(&self, task_id: &str) {
        if self.state.get() != SessionState::Active {
            return;
        }
        self.timers.start(task_id, self.factory.now_ms());
        self.track(kinds::TASK_START, Some(json!({ "taskId": task_id })));
    }

    /// `duration` is milliseconds since the matching start, or `null` when
    /// the task was never started.
    pub fn track_task_end(&self, task_id: &str) {
        if self.state.get() != SessionState::Active {
            return;
        }
        let duration = self.timers.finish(task_id, self.factory.now_ms());
        if duration.is_none() {
            debug!("task_end for {} without a start", task_id);
        }
        self.track(kinds::TASK_END, Some(json!({ "taskId": task_id, "duration": duration })));
    }

    pub fn track_fixation(&self, fixation: &Fixation) {
        self.track_payload(kinds::FIXATION, fixation);
    }

    pub fn track_stimulus_shown(&self, stimulus: &StimulusShown) {
        self.track_payload(kinds::STIMULUS_SHOWN, stimulus);
    }

    pub fn track_seq(&self, rating: &SeqRating) {
        self.track_payload(kinds::SEQ, rating);
    }

    /// Non-forced flush; a no-op while offline.
    pub fn flush(&self) -> FlushOutcome {
        self.flush.flush(false)
    }

    pub fn stop(&self) {
        self.terminate(TerminationCause::Stop);
    }

    /// Only the first caller (stop or unload) emits `session_end`.
    fn terminate(&self, cause: TerminationCause) {
        if !self.state.terminate() {
            debug!("Session already terminated, ignoring {:?}", cause);
            return;
        }
        info!("Terminating session {} ({:?})", self.session_id(), cause);

        let end = self.factory.event(kinds::SESSION_END, None);
        let beaconed = self
            .beacon
            .as_ref()
            .is_some_and(|beacon| beacon.send_beacon(std::slice::from_ref(&end)));
        if !beaconed {
            self.flush.enqueue(end.clone());
        }
        self.flush.flush(true);
        self.push.send(&end);

        self.cancel.cancel();
        self.push.close();
    }

    /// Waits for in-flight bulk sends to settle (and, once terminated, for
    /// the background loops to wind down).
    pub async fn wait_idle(&self) {
        self.flush.wait_idle().await;
        if self.state.get() == SessionState::Terminated {
            self.background.wait().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Host dropped the session without stop(); end the background loops
        self.cancel.cancel();
    }
}

async fn watch_connectivity(session: Weak<Session>, mut rx: watch::Receiver<bool>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let online = *rx.borrow_and_update();
        if !online {
            continue;
        }
        let Some(session) = session.upgrade() else { break };
        debug!("Connectivity restored, flushing {} events", session.pending());
        session.flush.flush(false);
    }
}

async fn watch_lifecycle(session: Weak<Session>, lifecycle: Arc<dyn Lifecycle>, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = lifecycle.terminated() => {
            if let Some(session) = session.upgrade() {
                session.terminate(TerminationCause::Unload);
            }
        }
    }
}
