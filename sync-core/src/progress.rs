//! Progress math and buffered-memory statistics.

use sync_types::MemoryUsage;

/// `floor(completed * 100 / total)`, clamped to 100. Zero total gives 0.
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (completed as u64 * 100) / total as u64;
    pct.min(100) as u8
}

/// Monotonic progress counter.
///
/// Reported percentages never go backwards, even if the caller reports a
/// smaller completion count (for example after a resume re-bases totals).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    total: u32,
    completed: u32,
    last_percentage: u8,
}

impl ProgressTracker {
    /// Track `total` items, `completed` of which are already done.
    pub fn new(total: u32, completed: u32) -> Self {
        let completed = completed.min(total);
        Self {
            total,
            completed,
            last_percentage: percentage(completed, total),
        }
    }

    /// Count one more completed item and return the new percentage.
    pub fn advance(&mut self) -> u8 {
        self.completed = (self.completed + 1).min(self.total);
        self.last_percentage = self.last_percentage.max(percentage(self.completed, self.total));
        self.last_percentage
    }

    /// Mark the run finished; the percentage becomes 100.
    pub fn finish(&mut self) -> u8 {
        self.last_percentage = 100;
        self.last_percentage
    }

    /// Current percentage.
    pub fn percentage(&self) -> u8 {
        self.last_percentage
    }

    /// Items completed.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Items scheduled.
    pub fn total(&self) -> u32 {
        self.total
    }
}

/// Samples of buffered payload bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTracker {
    peak: u64,
    sum: u128,
    samples: u64,
}

impl MemoryTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the number of bytes buffered right now.
    pub fn sample(&mut self, bytes: u64) {
        self.peak = self.peak.max(bytes);
        self.sum += bytes as u128;
        self.samples += 1;
    }

    /// Summary of all samples.
    pub fn usage(&self) -> MemoryUsage {
        let average = if self.samples == 0 {
            0
        } else {
            (self.sum / self.samples as u128) as u64
        };
        MemoryUsage {
            peak_bytes: self.peak,
            average_bytes: average,
            samples: self.samples,
        }
    }
}
