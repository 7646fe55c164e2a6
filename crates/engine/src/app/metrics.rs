use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

static POISON_REPORTED: AtomicBool = AtomicBool::new(false);

fn report_poison_once(operation: &'static str) {
    if !POISON_REPORTED.swap(true, Ordering::Relaxed) {
        warn!(operation, "metrics_lock_poisoned");
    }
}

/// One reporting interval of the fixed-step loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub tps: f32,
    pub tick_time_ms: f32,
    pub max_tick_time_ms: f32,
    pub total_ticks: u64,
    /// Simulation time discarded by the per-frame tick cap during the interval.
    pub dropped_backlog_ms: u64,
}

/// Shared read side of the loop metrics; cloning shares the same slot.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    latest: Arc<RwLock<LoopMetricsSnapshot>>,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        let guard = self.latest.read().unwrap_or_else(|poisoned| {
            report_poison_once("read");
            PoisonError::into_inner(poisoned)
        });
        *guard
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        let mut guard = self.latest.write().unwrap_or_else(|poisoned| {
            report_poison_once("write");
            PoisonError::into_inner(poisoned)
        });
        *guard = snapshot;
    }
}

#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    interval_start: Instant,
    interval: Duration,
    interval_ticks: u32,
    total_ticks: u64,
    tick_time_sum: Duration,
    slowest_tick: Duration,
    dropped_backlog: Duration,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub(crate) fn starting_at(interval_start: Instant, interval: Duration) -> Self {
        Self {
            interval_start,
            interval,
            interval_ticks: 0,
            total_ticks: 0,
            tick_time_sum: Duration::ZERO,
            slowest_tick: Duration::ZERO,
            dropped_backlog: Duration::ZERO,
        }
    }

    pub(crate) fn record_tick(&mut self, tick_time: Duration) {
        self.interval_ticks = self.interval_ticks.saturating_add(1);
        self.total_ticks = self.total_ticks.saturating_add(1);
        self.tick_time_sum = self.tick_time_sum.saturating_add(tick_time);
        self.slowest_tick = self.slowest_tick.max(tick_time);
    }

    pub(crate) fn record_dropped_backlog(&mut self, dropped: Duration) {
        self.dropped_backlog = self.dropped_backlog.saturating_add(dropped);
    }

    pub(crate) fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Closes the interval once it has run its full length.
    pub(crate) fn maybe_snapshot(&mut self, now: Instant) -> Option<LoopMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }

        let tick_time_ms = match self.interval_ticks {
            0 => 0.0,
            ticks => self.tick_time_sum.as_secs_f32() * 1000.0 / ticks as f32,
        };
        let snapshot = LoopMetricsSnapshot {
            tps: self.interval_ticks as f32 / elapsed.as_secs_f32().max(f32::EPSILON),
            tick_time_ms,
            max_tick_time_ms: self.slowest_tick.as_secs_f32() * 1000.0,
            total_ticks: self.total_ticks,
            dropped_backlog_ms: self.dropped_backlog.as_millis() as u64,
        };

        self.interval_start = now;
        self.interval_ticks = 0;
        self.tick_time_sum = Duration::ZERO;
        self.slowest_tick = Duration::ZERO;
        self.dropped_backlog = Duration::ZERO;
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn poison(handle: &MetricsHandle) {
        let latest = Arc::clone(&handle.latest);
        let _ = thread::spawn(move || {
            let _guard = latest.write().expect("write guard");
            panic!("poison metrics lock");
        })
        .join();
    }

    #[test]
    fn interval_snapshot_averages_and_tracks_worst_tick() {
        let base = Instant::now();
        let mut accumulator = MetricsAccumulator::starting_at(base, Duration::from_secs(1));
        for millis in [1, 2, 3, 6] {
            accumulator.record_tick(Duration::from_millis(millis));
        }
        accumulator.record_dropped_backlog(Duration::from_millis(40));

        let snapshot = accumulator
            .maybe_snapshot(base + Duration::from_secs(1))
            .expect("snapshot");
        assert!((snapshot.tps - 4.0).abs() < 0.05);
        assert!((snapshot.tick_time_ms - 3.0).abs() < 0.001);
        assert!((snapshot.max_tick_time_ms - 6.0).abs() < 0.001);
        assert_eq!(snapshot.total_ticks, 4);
        assert_eq!(snapshot.dropped_backlog_ms, 40);
    }

    #[test]
    fn rollover_resets_interval_but_not_total() {
        let base = Instant::now();
        let mut accumulator = MetricsAccumulator::starting_at(base, Duration::from_secs(1));
        accumulator.record_tick(Duration::from_millis(9));
        accumulator.record_dropped_backlog(Duration::from_millis(5));
        assert!(accumulator
            .maybe_snapshot(base + Duration::from_millis(500))
            .is_none());
        accumulator
            .maybe_snapshot(base + Duration::from_secs(1))
            .expect("first");

        accumulator.record_tick(Duration::from_millis(1));
        let second = accumulator
            .maybe_snapshot(base + Duration::from_secs(2))
            .expect("second");
        assert_eq!(second.total_ticks, 2);
        assert!((second.max_tick_time_ms - 1.0).abs() < 0.001);
        assert_eq!(second.dropped_backlog_ms, 0);
        assert_eq!(accumulator.total_ticks(), 2);
    }

    #[test]
    fn poisoned_handle_still_reads_and_publishes() {
        let handle = MetricsHandle::default();
        poison(&handle);
        assert_eq!(handle.snapshot(), LoopMetricsSnapshot::default());

        let expected = LoopMetricsSnapshot {
            tps: 60.0,
            tick_time_ms: 0.4,
            max_tick_time_ms: 1.2,
            total_ticks: 120,
            dropped_backlog_ms: 0,
        };
        handle.clone().publish(expected);
        assert_eq!(handle.snapshot(), expected);
    }
}
