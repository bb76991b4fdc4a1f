use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A deterministic, total mapping from a row key to a destination
/// partition index. The partition count is fixed for the lifetime of
/// one shuffle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Partitioner {
    /// Uniform distribution by hash of the key modulo the partition
    /// count. `partitions` must be non-zero.
    Hash { partitions: usize },
    /// Ordered buckets split by the given boundaries; keys below the
    /// first boundary go to partition zero.
    Range { boundaries: Vec<f64> },
}

impl Partitioner {
    pub fn partition_count(&self) -> usize {
        match self {
            Partitioner::Hash { partitions } => *partitions,
            Partitioner::Range { boundaries } => boundaries.len() + 1,
        }
    }

    pub fn partition(&self, key: f64) -> usize {
        match self {
            Partitioner::Hash { partitions } => {
                debug_assert!(*partitions > 0, "hash partitioner with zero partitions");
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                key.to_bits().hash(&mut hasher);
                (hasher.finish() % *partitions as u64) as usize
            }
            Partitioner::Range { boundaries } => boundaries.partition_point(|b| *b < key),
        }
    }
}
