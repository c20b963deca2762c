use parking_lot::Mutex;

/// Counters of the receiving side, all of them cumulative since the receiver started
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Stats {
    pub received: u64,
    pub errors: u64,
    /// payload bytes only, frame headers are not counted
    pub bytes: u64,
}

/// Shared between the ingestion path and the reporter. All counters live behind a single lock, so
///  a snapshot never shows a frame as received without its bytes, or vice versa.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: Mutex<Stats>,
}

impl StatsAggregator {
    pub fn new() -> StatsAggregator {
        Default::default()
    }

    pub fn snapshot(&self) -> Stats {
        *self.stats.lock()
    }

    pub fn increment_received(&self) {
        self.stats.lock().received += 1;
    }

    pub fn increment_errors(&self) {
        self.stats.lock().errors += 1;
    }

    pub fn add_bytes(&self, num_bytes: u64) {
        self.stats.lock().bytes += num_bytes;
    }

    /// all updates for a single frame in one critical section
    pub fn record_frame(&self, payload_len: u64, is_error: bool) {
        let mut stats = self.stats.lock();
        stats.received += 1;
        stats.bytes += payload_len;
        if is_error {
            stats.errors += 1;
        }
    }
}
