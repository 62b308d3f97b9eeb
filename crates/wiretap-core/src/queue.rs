//! Bounded event queue between the request path and the sink.
//!
//! Pushing never awaits: the request path takes a short lock, appends the
//! event and wakes the writer. A single writer task drains the queue in
//! batches. When the queue is full the oldest event is dropped.

use crate::sink::{LogSink, SinkEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Runtime counters for the logging pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    records_emitted: AtomicU64,
    alerts_emitted: AtomicU64,
    dropped_events: AtomicU64,
    sink_failures: AtomicU64,
    meta_errors: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn meta_error(&self) {
        self.meta_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            meta_errors: self.meta_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    /// Records the sink accepted.
    pub records_emitted: u64,
    /// Latency alerts the sink accepted.
    pub alerts_emitted: u64,
    /// Events discarded because the queue was full.
    pub dropped_events: u64,
    /// Sink writes that returned an error.
    pub sink_failures: u64,
    /// Panics caught while assembling an event.
    pub meta_errors: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<SinkEvent>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
            stats,
        }
    }

    /// Enqueue an event. Returns `false` if the queue is closed.
    pub(crate) fn push(&self, event: SinkEvent) -> bool {
        let dropped = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            let dropped = if state.events.len() >= self.capacity {
                state.events.pop_front()
            } else {
                None
            };
            state.events.push_back(event);
            dropped
        };

        if let Some(dropped) = dropped {
            let total = self.stats.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                target: "wiretap",
                event = dropped.event_type(),
                dropped_events = total,
                "event queue full, dropped oldest event"
            );
        }

        self.notify.notify_one();
        true
    }

    /// Wait for the next batch. Returns `None` once the queue is closed and
    /// fully drained.
    pub(crate) async fn next_batch(&self) -> Option<Vec<SinkEvent>> {
        loop {
            {
                let mut state = self.lock();
                if !state.events.is_empty() {
                    return Some(state.events.drain(..).collect());
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Reject further pushes. Already queued events are still delivered.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drain the queue into the sink until the queue is closed.
pub(crate) async fn run_writer(
    queue: Arc<EventQueue>,
    sink: Arc<dyn LogSink>,
    stats: Arc<PipelineStats>,
) {
    while let Some(batch) = queue.next_batch().await {
        for event in &batch {
            deliver(sink.as_ref(), event, &stats);
        }
    }

    if let Err(err) = sink.flush() {
        stats.sink_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(target: "wiretap", error = %err, "log sink flush failed");
    }
    tracing::debug!(target: "wiretap", "event writer stopped");
}

fn deliver(sink: &dyn LogSink, event: &SinkEvent, stats: &PipelineStats) {
    match sink.write_event(event) {
        Ok(()) => match event {
            SinkEvent::Record(_) => {
                stats.records_emitted.fetch_add(1, Ordering::Relaxed);
            }
            SinkEvent::Alert(_) => {
                stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            }
            SinkEvent::Summary(_) => {}
        },
        Err(err) => {
            stats.sink_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "wiretap",
                error = %err,
                event = event.event_type(),
                "log sink write failed"
            );
        }
    }
}
