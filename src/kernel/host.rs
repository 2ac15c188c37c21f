//! Capabilities the embedding host provides: connectivity, page lifecycle
//! and a per-frame clock. The session only ever talks to these traits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline flip.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state the host flips by hand (e.g. from OS network events).
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Page-termination signal.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Resolves once the host is about to tear the process down.
    async fn terminated(&self);
}

#[derive(Debug, Clone, Default)]
pub struct PageLifecycle {
    token: CancellationToken,
}

impl PageLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.token.cancel();
    }
}

#[async_trait]
impl Lifecycle for PageLifecycle {
    async fn terminated(&self) {
        self.token.cancelled().await;
    }
}

/// Display refresh source.
#[async_trait]
pub trait FrameClock: Send + Sync {
    /// Waits for the next frame and returns its timestamp in milliseconds
    /// (monotonic, arbitrary origin). `None` means no more frames will come.
    async fn next_frame(&self) -> Option<f64>;
}

/// Fixed-rate stand-in for hosts without a real vsync signal.
///
/// Ticks on a timer rather than on presented frames, so the sampler sees
/// roughly `hz` fps regardless of how the host actually renders. Hosts that
/// care about real frame rate should supply their own [`FrameClock`].
/// Must be created inside a tokio runtime.
pub struct IntervalFrameClock {
    origin: Instant,
    ticker: tokio::sync::Mutex<tokio::time::Interval>,
}

impl IntervalFrameClock {
    pub fn new(hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / hz.max(1) as f64).max(MIN_FRAME_PERIOD);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            origin: Instant::now(),
            ticker: tokio::sync::Mutex::new(ticker),
        }
    }
}

#[async_trait]
impl FrameClock for IntervalFrameClock {
    async fn next_frame(&self) -> Option<f64> {
        let at = self.ticker.lock().await.tick().await;
        Some(at.duration_since(self.origin).as_secs_f64() * 1000.0)
    }
}
