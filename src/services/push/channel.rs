use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::Url;
use serde_json::to_value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TelemetryError};
use crate::kernel::event::{kinds, ClientInfo, Event, EventFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Connecting,
    Open,
    Closed,
}

/// What a live connection reports back after it has been established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    Error(String),
    Closed,
}

/// Sink handed to the connector so the connection can report errors and
/// closure to its owning channel.
#[derive(Debug, Clone)]
pub struct PushSignals {
    tx: mpsc::UnboundedSender<PushSignal>,
}

impl PushSignals {
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.tx.send(PushSignal::Error(message.into()));
    }

    pub fn closed(&self) {
        let _ = self.tx.send(PushSignal::Closed);
    }
}

/// Opens the bidirectional connection (a websocket in the browser build).
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: Url, signals: PushSignals) -> Result<Box<dyn PushConnection>>;
}

pub trait PushConnection: Send + Sync {
    /// Queues one text frame. Must not block on the network.
    fn send_text(&self, text: String) -> Result<()>;
    fn close(&self);
}

pub trait PushObserver: Send + Sync {
    fn on_open(&self) {}
    fn on_error(&self, _error: &TelemetryError) {}
    fn on_close(&self) {}
}

/// Default observer: connection events only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl PushObserver for LoggingObserver {
    fn on_open(&self) {
        info!("Push channel open");
    }

    fn on_error(&self, error: &TelemetryError) {
        warn!("Push channel error: {}", error);
    }

    fn on_close(&self) {
        info!("Push channel closed");
    }
}

struct Inner {
    state: PushState,
    conn: Option<Box<dyn PushConnection>>,
}

/// Best-effort, low-latency channel. Never queues and never retries:
/// anything sent while not `Open` is dropped.
pub struct PushChannel {
    inner: Mutex<Inner>,
    observer: Arc<dyn PushObserver>,
}

impl PushChannel {
    pub fn new(observer: Arc<dyn PushObserver>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: PushState::Connecting,
                conn: None,
            }),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> PushState {
        self.lock().state
    }

    /// Returns true when the event was handed to an open connection.
    pub fn send(&self, event: &Event) -> bool {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                self.observer.on_error(&TelemetryError::from(e));
                return false;
            }
        };

        let mut inner = self.lock();
        if inner.state != PushState::Open {
            debug!("Push channel not open, dropping {}", event.kind);
            return false;
        }
        let Some(conn) = inner.conn.as_ref() else {
            return false;
        };

        match conn.send_text(text) {
            Ok(()) => true,
            Err(TelemetryError::PushClosed) => {
                inner.state = PushState::Closed;
                inner.conn = None;
                drop(inner);
                self.observer.on_close();
                false
            }
            Err(e) => {
                drop(inner);
                self.observer.on_error(&e);
                false
            }
        }
    }

    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == PushState::Closed {
            return;
        }
        inner.state = PushState::Closed;
        if let Some(conn) = inner.conn.take() {
            conn.close();
        }
        drop(inner);
        self.observer.on_close();
    }

    /// Drives the channel for the session's lifetime: connect, greet the
    /// collector, then follow connection signals until closed or cancelled.
    pub async fn run(
        self: Arc<Self>,
        connector: Arc<dyn PushConnector>,
        url: Url,
        factory: EventFactory,
        client: ClientInfo,
        cancel: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signals = PushSignals { tx };

        let conn = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connector.connect(url, signals) => result,
        };

        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                self.lock().state = PushState::Closed;
                self.observer.on_error(&e);
                return;
            }
        };

        {
            let mut inner = self.lock();
            if inner.state != PushState::Connecting {
                // Closed while the handshake was in flight
                conn.close();
                return;
            }
            inner.state = PushState::Open;
            inner.conn = Some(conn);
        }
        self.observer.on_open();

        self.send(&factory.event(kinds::SESSION_START, None));
        match to_value(&client) {
            Ok(data) => {
                self.send(&factory.event(kinds::CLIENT_INFO, Some(data)));
            }
            Err(e) => self.observer.on_error(&TelemetryError::from(e)),
        }

        loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                signal = rx.recv() => signal,
            };
            match signal {
                Some(PushSignal::Error(message)) => {
                    self.observer.on_error(&TelemetryError::Push(message));
                }
                Some(PushSignal::Closed) | None => {
                    let mut inner = self.lock();
                    let was_open = inner.state != PushState::Closed;
                    inner.state = PushState::Closed;
                    inner.conn = None;
                    drop(inner);
                    if was_open {
                        self.observer.on_close();
                    }
                    break;
                }
            }
        }
    }
}
