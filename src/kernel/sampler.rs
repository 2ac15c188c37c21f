use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::event::{kinds, EventFactory};
use super::host::FrameClock;
use crate::services::push::PushChannel;

/// One aggregation window's summary.
#[derive(Debug, Clone, PartialEq)]
pub struct FpsAggregate {
    pub interval_ms: u64,
    pub average_fps: f64,
    pub count: usize,
}

impl FpsAggregate {
    /// `fps_average` payload; the mean goes out as a two-decimal string.
    pub fn to_data(&self) -> Value {
        json!({
            "interval": self.interval_ms,
            "average_fps": format!("{:.2}", self.average_fps),
            "count": self.count,
        })
    }
}

#[derive(Debug, Default)]
struct SampleState {
    samples: Vec<f64>,
    last_frame: Option<f64>,
}

/// Frame-rate sample buffer shared by the collection and aggregation loops.
#[derive(Debug, Default)]
pub struct FpsSampler {
    state: Mutex<SampleState>,
}

impl FpsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SampleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a frame at `timestamp_ms` and returns the instantaneous rate.
    /// The first frame only seeds the reference; a non-increasing timestamp
    /// re-seeds without producing a sample.
    pub fn record_frame(&self, timestamp_ms: f64) -> Option<f64> {
        let mut state = self.lock();
        let previous = state.last_frame.replace(timestamp_ms)?;
        let elapsed = timestamp_ms - previous;
        if elapsed <= 0.0 {
            return None;
        }
        let fps = 1000.0 / elapsed;
        state.samples.push(fps);
        Some(fps)
    }

    pub fn pending(&self) -> usize {
        self.lock().samples.len()
    }

    /// Swaps the buffer out and averages it. `None` when no frames arrived.
    pub fn take_average(&self, interval_ms: u64) -> Option<FpsAggregate> {
        let samples = std::mem::take(&mut self.lock().samples);
        if samples.is_empty() {
            return None;
        }
        let count = samples.len();
        let average_fps = samples.iter().sum::<f64>() / count as f64;
        Some(FpsAggregate {
            interval_ms,
            average_fps,
            count,
        })
    }

    /// Per-frame collection loop. Ends on cancellation or when the clock
    /// stops producing frames.
    pub async fn run_collection(self: Arc<Self>, clock: Arc<dyn FrameClock>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = clock.next_frame() => frame,
            };
            match frame {
                Some(ts) => {
                    self.record_frame(ts);
                }
                None => {
                    debug!("Frame clock finished");
                    break;
                }
            }
        }
    }

    /// Emits at most one `fps_average` per period over the push channel.
    pub async fn run_aggregation(
        self: Arc<Self>,
        period: Duration,
        factory: EventFactory,
        push: Arc<PushChannel>,
        cancel: CancellationToken,
    ) {
        let interval_ms = period.as_millis() as u64;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(aggregate) = self.take_average(interval_ms) else {
                debug!("No frames this window, skipping fps_average");
                continue;
            };
            debug!("fps_average {:.2} over {} frames", aggregate.average_fps, aggregate.count);
            push.send(&factory.event(kinds::FPS_AVERAGE, Some(aggregate.to_data())));
        }
    }
}
