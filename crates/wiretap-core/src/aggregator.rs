//! Status code aggregation over fixed time windows.

use crate::queue::EventQueue;
use crate::record::unix_now;
use crate::sink::SinkEvent;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Counts of responses per status code for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub event_type: &'static str,
    pub window_start: f64,
    pub window_end: f64,
    pub total: u64,
    pub status_counts: BTreeMap<u16, u64>,
}

impl StatusSummary {
    pub const EVENT_TYPE: &'static str = "status_summary";

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug)]
struct CounterTable {
    counts: HashMap<u16, u64>,
    window_start: f64,
}

/// Concurrent per-status counters, swapped out atomically on flush.
///
/// Every recorded status lands in exactly one summary.
#[derive(Debug)]
pub struct StatusAggregator {
    table: Mutex<CounterTable>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(CounterTable {
                counts: HashMap::new(),
                window_start: unix_now(),
            }),
        }
    }

    pub fn record(&self, status: u16) {
        *self.lock().counts.entry(status).or_insert(0) += 1;
    }

    /// Close the current window and return its summary. Counters restart at
    /// zero for the next window.
    pub fn flush(&self) -> StatusSummary {
        let (counts, window_start, window_end) = {
            let mut table = self.lock();
            let window_end = unix_now();
            let counts = mem::take(&mut table.counts);
            let window_start = mem::replace(&mut table.window_start, window_end);
            (counts, window_start, window_end)
        };

        let status_counts: BTreeMap<u16, u64> = counts.into_iter().collect();
        StatusSummary {
            event_type: StatusSummary::EVENT_TYPE,
            window_start,
            window_end,
            total: status_counts.values().sum(),
            status_counts,
        }
    }

    /// Responses recorded in the current window so far.
    pub fn pending(&self) -> u64 {
        self.lock().counts.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, CounterTable> {
        // Counters stay consistent across a panicking holder.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Flush the aggregator every `period` until `stop` fires, then flush the
/// final partial window.
pub(crate) async fn run_periodic_flush(
    aggregator: Arc<StatusAggregator>,
    queue: Arc<EventQueue>,
    period: Duration,
    emit_empty: bool,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => publish(&aggregator, &queue, emit_empty),
            _ = &mut stop => {
                publish(&aggregator, &queue, emit_empty);
                break;
            }
        }
    }

    tracing::debug!(target: "wiretap", "status aggregation stopped");
}

/// Flush the current window and queue its summary.
pub(crate) fn publish(aggregator: &StatusAggregator, queue: &EventQueue, emit_empty: bool) {
    let summary = aggregator.flush();
    if summary.is_empty() && !emit_empty {
        return;
    }
    tracing::trace!(target: "wiretap", total = summary.total, "status summary flushed");
    queue.push(SinkEvent::Summary(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flush_resets_counters() {
        let aggregator = StatusAggregator::new();
        aggregator.record(200);
        aggregator.record(200);
        aggregator.record(404);
        assert_eq!(aggregator.pending(), 3);

        let summary = aggregator.flush();
        assert_eq!(summary.event_type, "status_summary");
        assert_eq!(summary.total, 3);
        assert_eq!(summary.status_counts[&200], 2);
        assert_eq!(summary.status_counts[&404], 1);
        assert!(summary.window_end >= summary.window_start);

        let next = aggregator.flush();
        assert!(next.is_empty());
        assert!(next.status_counts.is_empty());
        assert_eq!(next.window_start, summary.window_end);
    }

    #[test]
    fn test_summary_serialization() {
        let aggregator = StatusAggregator::new();
        aggregator.record(500);

        let value = serde_json::to_value(aggregator.flush()).unwrap();
        assert_eq!(value["status_counts"], serde_json::json!({"500": 1}));
        assert_eq!(value["total"], 1);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let aggregator = Arc::new(StatusAggregator::new());
        let flushed = Arc::new(Mutex::new(0u64));

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        aggregator.record(200);
                    }
                })
            })
            .collect();

        let flusher = {
            let aggregator = aggregator.clone();
            let flushed = flushed.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    *flushed.lock().unwrap() += aggregator.flush().total;
                    std::thread::yield_now();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        flusher.join().unwrap();

        let total = *flushed.lock().unwrap() + aggregator.flush().total;
        assert_eq!(total, 8000);
    }

    proptest! {
        #[test]
        fn prop_summary_counts_match_recorded(
            statuses in prop::collection::vec(100u16..600, 0..200),
        ) {
            let aggregator = StatusAggregator::new();
            for status in &statuses {
                aggregator.record(*status);
            }

            let summary = aggregator.flush();
            prop_assert_eq!(summary.total, statuses.len() as u64);
            for (status, count) in &summary.status_counts {
                let expected = statuses.iter().filter(|s| *s == status).count() as u64;
                prop_assert_eq!(*count, expected);
            }
        }
    }
}
