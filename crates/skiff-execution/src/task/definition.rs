use serde::{Deserialize, Serialize};

use crate::shuffle::Partitioner;
use crate::worker::CacheKey;

/// A dataset row. The key of a row is its first element.
pub type Record = Vec<f64>;

pub fn record_key(record: &Record) -> f64 {
    record.first().copied().unwrap_or(0.0)
}

/// The closed algebra of row transformations carried by a stage
/// descriptor. Dispatch is an exhaustive match, so an unknown
/// operation cannot exist at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapFn {
    /// Negate every element of the row.
    Negate,
    Scale(f64),
}

impl MapFn {
    pub fn apply(&self, record: Record) -> Record {
        match self {
            MapFn::Negate => record.into_iter().map(|x| -x).collect(),
            MapFn::Scale(factor) => record.into_iter().map(|x| x * factor).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterFn {
    KeyEquals(f64),
}

impl FilterFn {
    pub fn apply(&self, record: &Record) -> bool {
        match self {
            FilterFn::KeyEquals(key) => record_key(record) == *key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlatMapFn {
    /// Emit the row `count` times.
    Duplicate(usize),
}

impl FlatMapFn {
    pub fn apply(&self, record: Record) -> Vec<Record> {
        match self {
            FlatMapFn::Duplicate(count) => vec![record; *count],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReduceFn {
    /// Element-wise addition; a missing element counts as zero.
    ElementWiseSum,
}

impl ReduceFn {
    /// The identity accumulator for this function, so that per-worker
    /// partials can be combined with the seed exactly once on the
    /// driver side.
    pub fn identity(&self, width: usize) -> Record {
        match self {
            ReduceFn::ElementWiseSum => vec![0.0; width],
        }
    }

    pub fn apply(&self, accumulator: Record, record: &Record) -> Record {
        match self {
            ReduceFn::ElementWiseSum => {
                let width = accumulator.len().max(record.len());
                (0..width)
                    .map(|i| {
                        accumulator.get(i).copied().unwrap_or(0.0)
                            + record.get(i).copied().unwrap_or(0.0)
                    })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOp {
    Map(MapFn),
    Filter(FilterFn),
    FlatMap(FlatMapFn),
}

impl StageOp {
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        match self {
            StageOp::Map(f) => records.into_iter().map(|r| f.apply(r)).collect(),
            StageOp::Filter(f) => records.into_iter().filter(|r| f.apply(r)).collect(),
            StageOp::FlatMap(f) => records.into_iter().flat_map(|r| f.apply(r)).collect(),
        }
    }
}

/// A terminal operation producing the job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionOp {
    Reduce { f: ReduceFn, seed: Record },
    Lookup { key: f64 },
    Collect,
}

impl ActionOp {
    /// Whether the action requires redistributing records by key
    /// before it can run.
    pub fn needs_shuffle(&self) -> bool {
        matches!(self, ActionOp::Lookup { .. })
    }
}

/// A job submitted by the driver: the input dataset, a pipeline of
/// stage operations, and a terminal action. The coordinator splits
/// the input into per-worker shares at assignment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub input: Vec<Record>,
    pub stages: Vec<StageOp>,
    pub action: ActionOp,
    /// The partitioner for shuffle boundaries. When absent, hash
    /// partitioning over the assigned worker count is used.
    pub partitioner: Option<Partitioner>,
    /// Read the stage input from the shared cache instead of `input`.
    pub read_cache: Option<CacheKey>,
    /// Publish the stage output to the shared cache for later jobs.
    pub publish_cache: Option<CacheKey>,
}

impl JobSpec {
    pub fn new(input: Vec<Record>, stages: Vec<StageOp>, action: ActionOp) -> Self {
        Self {
            input,
            stages,
            action,
            partitioner: None,
            read_cache: None,
            publish_cache: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_negate() {
        assert_eq!(MapFn::Negate.apply(vec![1.0, -2.0]), vec![-1.0, 2.0]);
    }

    #[test]
    fn test_filter_key_equals_uses_first_element() {
        let f = FilterFn::KeyEquals(3.0);
        assert!(f.apply(&vec![3.0, 4.0]));
        assert!(!f.apply(&vec![4.0, 3.0]));
        assert!(!f.apply(&vec![]));
    }

    #[test]
    fn test_flat_map_duplicate() {
        let out = FlatMapFn::Duplicate(2).apply(vec![1.0]);
        assert_eq!(out, vec![vec![1.0], vec![1.0]]);
    }

    #[test]
    fn test_reduce_handles_mismatched_widths() {
        let f = ReduceFn::ElementWiseSum;
        let out = f.apply(vec![0.0, 0.0, 0.0], &vec![1.0, 2.0]);
        assert_eq!(out, vec![1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_duplicate_then_sum_is_twice_the_sum() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let stage = StageOp::FlatMap(FlatMapFn::Duplicate(2));
        let f = ReduceFn::ElementWiseSum;
        let out = stage
            .apply(rows.clone())
            .iter()
            .fold(f.identity(3), |acc, r| f.apply(acc, r));
        let reference = rows.iter().fold(f.identity(3), |acc, r| f.apply(acc, r));
        let doubled: Record = reference.iter().map(|x| x * 2.0).collect();
        assert_eq!(out, doubled);
    }
}
