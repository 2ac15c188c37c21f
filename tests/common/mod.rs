#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tracing_subscriber::EnvFilter;

use tda_analytics::error::{Result as TelemetryResult, TelemetryError};
use tda_analytics::kernel::host::FrameClock;
use tda_analytics::services::http::{BulkTransport, UnloadBeacon};
use tda_analytics::services::push::{PushConnection, PushConnector, PushSignals};
use tda_analytics::{AgentConfig, Clock, Event};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> AgentConfig {
    AgentConfig::new(
        "secret-token",
        "game-42",
        "https://collector.test/events",
        "wss://collector.test/live",
    )
}

/// Clock the test moves by hand.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(start_ms)))
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bulk transport that records every batch and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingBulk {
    pub batches: Mutex<Vec<Vec<Event>>>,
    failures_left: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl RecordingBulk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: usize) -> Arc<Self> {
        let bulk = Self::default();
        bulk.failures_left.store(times, Ordering::SeqCst);
        Arc::new(bulk)
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<Event> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn delivered_kinds(&self) -> Vec<String> {
        self.delivered().into_iter().map(|e| e.kind).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkTransport for RecordingBulk {
    async fn send(&self, batch: &[Event]) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("simulated network failure");
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

/// Bulk transport that parks every send until released.
#[derive(Debug, Default)]
pub struct GatedBulk {
    pub inner: RecordingBulk,
    pub gate: Notify,
}

#[async_trait]
impl BulkTransport for GatedBulk {
    async fn send(&self, batch: &[Event]) -> anyhow::Result<()> {
        self.gate.notified().await;
        self.inner.send(batch).await
    }
}

#[derive(Debug)]
pub struct RecordingBeacon {
    accept: bool,
    pub sent: Mutex<Vec<Vec<Event>>>,
}

impl RecordingBeacon {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Vec<Event>> {
        self.sent.lock().unwrap().clone()
    }
}

impl UnloadBeacon for RecordingBeacon {
    fn send_beacon(&self, batch: &[Event]) -> bool {
        self.sent.lock().unwrap().push(batch.to_vec());
        self.accept
    }
}

/// Frame clock fed by the test; pends until a timestamp is pushed.
pub struct ScriptedFrames {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<f64>>,
}

impl ScriptedFrames {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<f64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                rx: tokio::sync::Mutex::new(rx),
            }),
            tx,
        )
    }
}

#[async_trait]
impl FrameClock for ScriptedFrames {
    async fn next_frame(&self) -> Option<f64> {
        self.rx.lock().await.recv().await
    }
}

/// Frame clock that never ticks.
pub struct NoFrames;

#[async_trait]
impl FrameClock for NoFrames {
    async fn next_frame(&self) -> Option<f64> {
        std::future::pending().await
    }
}

/// What the fake push connection saw.
#[derive(Debug, Default)]
pub struct PushLog {
    pub urls: Mutex<Vec<Url>>,
    pub frames: Mutex<Vec<String>>,
    pub closed: AtomicUsize,
    pub signals: Mutex<Option<PushSignals>>,
}

impl PushLog {
    pub fn messages(&self) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|m| m["type"].as_str().unwrap().to_string())
            .collect()
    }

    /// Simulates the server dropping the connection.
    pub fn drop_connection(&self) {
        if let Some(signals) = self.signals.lock().unwrap().as_ref() {
            signals.closed();
        }
    }
}

pub struct FakeConnector {
    pub log: Arc<PushLog>,
    refuse: bool,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, Arc<PushLog>) {
        let log = Arc::new(PushLog::default());
        (
            Arc::new(Self {
                log: Arc::clone(&log),
                refuse: false,
            }),
            log,
        )
    }

    pub fn refusing() -> (Arc<Self>, Arc<PushLog>) {
        let log = Arc::new(PushLog::default());
        (
            Arc::new(Self {
                log: Arc::clone(&log),
                refuse: true,
            }),
            log,
        )
    }
}

struct FakeConnection {
    log: Arc<PushLog>,
}

impl PushConnection for FakeConnection {
    fn send_text(&self, text: String) -> TelemetryResult<()> {
        self.log.frames.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, url: Url, signals: PushSignals) -> TelemetryResult<Box<dyn PushConnection>> {
        self.log.urls.lock().unwrap().push(url);
        if self.refuse {
            return Err(TelemetryError::Push("connection refused".to_string()));
        }
        *self.log.signals.lock().unwrap() = Some(signals);
        Ok(Box::new(FakeConnection {
            log: Arc::clone(&self.log),
        }))
    }
}

/// Push connector that always fails, keeping session tests off the network.
pub fn unreachable_push() -> Arc<dyn PushConnector> {
    let (connector, _) = FakeConnector::refusing();
    connector
}

/// Lets spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
