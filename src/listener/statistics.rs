use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ListenerStatistics {
    admitted: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
    ack_fallbacks: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsSnapshot {
    pub admitted: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub ack_fallbacks: u64,
    pub failed: u64,
    pub interrupted: u64,
}

impl StatisticsSnapshot {
    pub fn in_flight(&self) -> u64 {
        let finished = self.acknowledged + self.ack_fallbacks + self.failed + self.interrupted;

        self.admitted.saturating_sub(finished)
    }
}

impl ListenerStatistics {
    pub fn new() -> Self {
        ListenerStatistics::default()
    }

    pub fn admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_fallback(&self) {
        self.ack_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            ack_fallbacks: self.ack_fallbacks.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
        }
    }
}
