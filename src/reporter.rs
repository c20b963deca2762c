use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::shutdown::ShutdownListener;
use crate::stats::{Stats, StatsAggregator};

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// One line of live output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub bytes_per_second: f64,
    pub received: u64,
    pub errors: u64,
    pub error_percent: f64,
}

impl Report {
    pub fn compute(previous: &Stats, current: &Stats, elapsed: Duration) -> Report {
        let elapsed_secs = elapsed.as_secs_f64();
        let bytes_per_second = if elapsed_secs > 0.0 {
            current.bytes.saturating_sub(previous.bytes) as f64 / elapsed_secs
        }
        else {
            0.0
        };

        let error_percent = if current.received > 0 {
            current.errors as f64 / current.received as f64 * 100.0
        }
        else {
            0.0
        };

        Report {
            bytes_per_second,
            received: current.received,
            errors: current.errors,
            error_percent,
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rate: {:.2} B/s | Packets: {} | Errors: {} | Err%: {:.2}",
               self.bytes_per_second, self.received, self.errors, self.error_percent)
    }
}

/// Periodically turns snapshots of the shared stats into [Report]s, keeping the previous snapshot
///  as a baseline for the rate calculation
pub struct Reporter {
    stats: Arc<StatsAggregator>,
    interval: Duration,
    baseline: Stats,
    baseline_timestamp: Instant,
}

impl Reporter {
    pub fn new(stats: Arc<StatsAggregator>, interval: Duration) -> Reporter {
        Reporter {
            stats,
            interval,
            baseline: Stats::default(),
            baseline_timestamp: Instant::now(),
        }
    }

    pub fn tick(&mut self, now: Instant) -> Report {
        let current = self.stats.snapshot();
        let elapsed = now.saturating_duration_since(self.baseline_timestamp);

        let report = Report::compute(&self.baseline, &current, elapsed);

        self.baseline = current;
        self.baseline_timestamp = now;
        report
    }

    /// Hands a report to `on_report` once per interval until shutdown is signalled. The cadence
    ///  does not depend on packet arrival.
    pub async fn run<F>(mut self, mut shutdown: ShutdownListener, mut on_report: F)
    where F: FnMut(&Report) + Send
    {
        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("starting reporter");
        loop {
            tokio::select! {
                now = ticks.tick() => {
                    let report = self.tick(now);
                    on_report(&report);
                }
                _ = shutdown.triggered() => break,
            }
        }
        info!("reporter stopped");
    }
}
