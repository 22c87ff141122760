//! Batch tracking for the transfer loop.
//!
//! Items are grouped into batches of a fixed size. When a batch fills up
//! (or the plan runs out) the tracker hands back a [`BatchReady`], which
//! the engine commits with the peer before its items count as committed
//! for resume purposes.
//!
//! `batch_count` is a separate counter: it counts how many full multiples
//! of the batch size have been completed successfully, so 25 successes
//! with a batch size of 10 report 2.

/// Error type for batch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Batch size must be at least 1.
    ZeroSize,
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::ZeroSize => write!(f, "batch size must be at least 1"),
        }
    }
}

impl std::error::Error for BatchError {}

/// A batch that is ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReady {
    /// Zero-based batch number within the session.
    pub batch_index: u32,
    /// Plan indices processed in the batch.
    pub indices: Vec<u32>,
}

/// Groups processed plan indices into batches.
#[derive(Debug)]
pub struct BatchTracker {
    batch_size: u32,
    /// Indices processed since the last commit.
    current: Vec<u32>,
    /// Index of the batch being filled.
    batch_index: u32,
    /// Successful items across the session.
    successes: u32,
    /// Completed multiples of `batch_size`.
    batch_count: u32,
}

impl BatchTracker {
    /// Create a tracker. Fails for a zero batch size.
    pub fn new(batch_size: u32) -> Result<Self, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::ZeroSize);
        }
        Ok(Self {
            batch_size,
            current: Vec::with_capacity(batch_size as usize),
            batch_index: 0,
            successes: 0,
            batch_count: 0,
        })
    }

    /// Continue counting from an earlier, interrupted session.
    pub fn resume(batch_size: u32, successes: u32, batch_count: u32) -> Result<Self, BatchError> {
        let mut tracker = Self::new(batch_size)?;
        tracker.successes = successes;
        tracker.batch_count = batch_count;
        Ok(tracker)
    }

    /// Record that the item at `index` was processed (success or permanent
    /// failure). Returns the batch when it is full.
    pub fn record_processed(&mut self, index: u32) -> Option<BatchReady> {
        self.current.push(index);
        if self.current.len() as u32 >= self.batch_size {
            self.take()
        } else {
            None
        }
    }

    /// Record one successful item.
    pub fn record_success(&mut self) {
        self.successes += 1;
        if self.successes % self.batch_size == 0 {
            self.batch_count += 1;
        }
    }

    /// Close the partially filled batch, if any.
    pub fn flush(&mut self) -> Option<BatchReady> {
        if self.current.is_empty() {
            None
        } else {
            self.take()
        }
    }

    /// Indices processed but not yet handed out as a batch.
    pub fn pending(&self) -> &[u32] {
        &self.current
    }

    /// Completed multiples of the batch size.
    pub fn batch_count(&self) -> u32 {
        self.batch_count
    }

    /// Batch size.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    fn take(&mut self) -> Option<BatchReady> {
        let indices = std::mem::replace(
            &mut self.current,
            Vec::with_capacity(self.batch_size as usize),
        );
        let ready = BatchReady {
            batch_index: self.batch_index,
            indices,
        };
        self.batch_index += 1;
        Some(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_rejected() {
        assert_eq!(BatchTracker::new(0).unwrap_err(), BatchError::ZeroSize);
    }

    #[test]
    fn full_batch_is_handed_out() {
        let mut t = BatchTracker::new(3).unwrap();
        assert!(t.record_processed(0).is_none());
        assert!(t.record_processed(1).is_none());
        let batch = t.record_processed(2).unwrap();
        assert_eq!(batch.batch_index, 0);
        assert_eq!(batch.indices, vec![0, 1, 2]);
        assert!(t.pending().is_empty());

        t.record_processed(3);
        let tail = t.flush().unwrap();
        assert_eq!(tail.batch_index, 1);
        assert_eq!(tail.indices, vec![3]);
        assert!(t.flush().is_none());
    }

    #[test]
    fn twenty_five_items_in_batches_of_ten_count_two() {
        let mut t = BatchTracker::new(10).unwrap();
        let mut commits = 0;
        for i in 0..25 {
            t.record_success();
            if t.record_processed(i).is_some() {
                commits += 1;
            }
        }
        if t.flush().is_some() {
            commits += 1;
        }
        assert_eq!(t.batch_count(), 2);
        assert_eq!(commits, 3);
    }

    #[test]
    fn failures_do_not_count_towards_batch_count() {
        let mut t = BatchTracker::new(2).unwrap();
        t.record_success();
        t.record_processed(0);
        t.record_processed(1);
        assert_eq!(t.batch_count(), 0);
    }

    #[test]
    fn resumed_tracker_keeps_counting() {
        let mut t = BatchTracker::resume(5, 4, 0).unwrap();
        t.record_success();
        assert_eq!(t.batch_count(), 1);
    }
}
