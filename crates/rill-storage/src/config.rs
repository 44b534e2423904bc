use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How far an acknowledged append has been driven toward stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Durability {
    /// Queued to a background writer; bytes reach the OS on the worker's
    /// periodic flush. Fastest, widest loss window.
    Async,
    /// Flushed to the OS page cache on every append. Survives a process
    /// crash but not power failure.
    Medium,
    /// Flushed and fsynced on every append. Survives power failure.
    Full,
}

/// Rotation and durability policy for a partition's active segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Durability mode for the active segment.
    pub durability: Durability,

    /// Rotate once the active segment holds this many records.
    pub max_segment_records: u64,

    /// Rotate once the active segment is older than this.
    pub max_segment_age: Duration,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            durability: Durability::Medium,
            max_segment_records: 10_000,
            max_segment_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl PartitionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the active-segment durability mode.
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Set the record-count rotation threshold.
    pub fn with_max_segment_records(mut self, records: u64) -> Self {
        self.max_segment_records = records;
        self
    }

    /// Set the age rotation threshold.
    pub fn with_max_segment_age(mut self, age: Duration) -> Self {
        self.max_segment_age = age;
        self
    }
}
