//! Request latency measurement and classification.

use tokio::time::Instant;

/// Running timer for one request. Backed by the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct LatencyTimer {
    started: Instant,
}

impl LatencyTimer {
    /// Seconds elapsed so far, without consuming the timer.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Outcome of comparing a latency against the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyClass {
    Ok,
    Slow,
}

/// Measures and classifies request latency.
#[derive(Debug, Clone, Copy)]
pub struct LatencyMonitor {
    threshold: f64,
}

impl LatencyMonitor {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn start() -> LatencyTimer {
        LatencyTimer {
            started: Instant::now(),
        }
    }

    pub fn stop(timer: LatencyTimer) -> f64 {
        timer.elapsed_secs()
    }

    /// A latency is slow only when it is strictly above the threshold.
    pub fn classify(seconds: f64, threshold: f64) -> LatencyClass {
        if seconds > threshold {
            LatencyClass::Slow
        } else {
            LatencyClass::Ok
        }
    }

    pub fn is_slow(&self, seconds: f64) -> bool {
        Self::classify(seconds, self.threshold) == LatencyClass::Slow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classify_is_strict() {
        assert_eq!(LatencyMonitor::classify(1.0, 1.0), LatencyClass::Ok);
        assert_eq!(LatencyMonitor::classify(0.067, 1.0), LatencyClass::Ok);
        assert_eq!(LatencyMonitor::classify(1.0001, 1.0), LatencyClass::Slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_measures_elapsed_time() {
        let timer = LatencyMonitor::start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let seconds = LatencyMonitor::stop(timer);

        assert!((1.5..1.6).contains(&seconds), "measured {}", seconds);
        assert!(LatencyMonitor::new(1.0).is_slow(seconds));
        assert!(!LatencyMonitor::new(2.0).is_slow(seconds));
    }
}
