use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::event::Event;
use super::host::Connectivity;
use crate::services::http::BulkTransport;

/// Pending events in insertion order. Append and drain-all each happen under
/// one lock acquisition, so a drain never observes a half-appended batch.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    max_len: Option<usize>,
}

impl EventQueue {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_len,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, event: Event) {
        let mut events = self.lock();
        events.push_back(event);
        self.evict(&mut events);
    }

    pub fn enqueue_batch(&self, batch: Vec<Event>) {
        let mut events = self.lock();
        events.extend(batch);
        self.evict(&mut events);
    }

    /// Removes and returns everything currently queued.
    pub fn drain(&self) -> Vec<Event> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }

    // Drop-oldest once the optional bound is exceeded.
    fn evict(&self, events: &mut VecDeque<Event>) {
        let Some(max) = self.max_len else { return };
        let overflow = events.len().saturating_sub(max);
        if overflow > 0 {
            events.drain(..overflow);
            warn!("Event queue over capacity ({}), dropped {} oldest events", max, overflow);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Host is offline and the flush was not forced; queue untouched.
    Offline,
    /// Nothing was queued; no request issued.
    Empty,
    /// A batch of this many events is in flight.
    Dispatched(usize),
}

/// Decides when the queue is drained and hands batches to the bulk channel.
///
/// Sends run on the runtime captured at construction, so `flush` may be
/// called from any thread, including ones outside that runtime.
pub struct FlushController {
    queue: Arc<EventQueue>,
    bulk: Arc<dyn BulkTransport>,
    connectivity: Arc<dyn Connectivity>,
    runtime: Handle,
    in_flight: TaskTracker,
}

impl FlushController {
    pub fn new(
        queue: Arc<EventQueue>,
        bulk: Arc<dyn BulkTransport>,
        connectivity: Arc<dyn Connectivity>,
        runtime: Handle,
    ) -> Self {
        let in_flight = TaskTracker::new();
        // Closed up front so wait_idle() returns whenever the set drains;
        // spawning on a closed tracker is still allowed.
        in_flight.close();
        Self {
            queue,
            bulk,
            connectivity,
            runtime,
            in_flight,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn enqueue(&self, event: Event) {
        self.queue.enqueue(event);
    }

    pub fn enqueue_batch(&self, batch: Vec<Event>) {
        self.queue.enqueue_batch(batch);
    }

    /// Drains the queue and starts one bulk send. Returns without waiting for
    /// the network; a failed send puts the whole batch back on the queue.
    pub fn flush(&self, force: bool) -> FlushOutcome {
        if !force && !self.connectivity.is_online() {
            debug!("Offline, deferring flush of {} events", self.queue.len());
            return FlushOutcome::Offline;
        }

        let batch = self.queue.drain();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let size = batch.len();

        let bulk = Arc::clone(&self.bulk);
        let queue = Arc::clone(&self.queue);
        self.in_flight.spawn_on(
            async move {
                match bulk.send(&batch).await {
                    Ok(()) => debug!("Delivered batch of {} events", batch.len()),
                    Err(e) => {
                        warn!("Bulk send failed, requeueing {} events: {:#}", batch.len(), e);
                        queue.enqueue_batch(batch);
                    }
                }
            },
            &self.runtime,
        );

        FlushOutcome::Dispatched(size)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Waits for every bulk send started so far to settle.
    pub async fn wait_idle(&self) {
        self.in_flight.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: i64) -> Event {
        Event {
            game_id: "g".to_string(),
            session_id: "s".to_string(),
            kind: "custom".to_string(),
            timestamp: n,
            data: json!({}),
        }
    }

    #[test]
    fn drain_returns_insertion_order_and_empties() {
        let queue = EventQueue::new(None);
        queue.enqueue(event(1));
        queue.enqueue_batch(vec![event(2), event(3)]);

        let drained: Vec<i64> = queue.drain().iter().map(|e| e.timestamp).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn bounded_queue_drops_oldest() {
        let queue = EventQueue::new(Some(2));
        for n in 1..=4 {
            queue.enqueue(event(n));
        }
        let kept: Vec<i64> = queue.snapshot().iter().map(|e| e.timestamp).collect();
        assert_eq!(kept, vec![3, 4]);
    }
}
