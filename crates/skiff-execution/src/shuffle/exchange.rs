use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::NodeUuid;
use crate::stream::StreamName;
use crate::task::Record;

/// The receiving side of an all-to-all shuffle for one job.
///
/// Every peer (including the local worker) sends zero or more data
/// messages for a stream followed by exactly one end-of-stream
/// sentinel. A stream is complete only once every expected peer has
/// sent its sentinel; consumers wait on that barrier before reading
/// the buffered records.
pub struct ShuffleExchange {
    expected: HashSet<NodeUuid>,
    state: Mutex<HashMap<StreamName, StreamState>>,
}

struct StreamState {
    buffer: Vec<Record>,
    completed: HashSet<NodeUuid>,
    notify: watch::Sender<bool>,
}

impl StreamState {
    fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            buffer: vec![],
            completed: HashSet::new(),
            notify,
        }
    }
}

impl ShuffleExchange {
    pub fn new(expected: impl IntoIterator<Item = NodeUuid>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Accepts one shuffle message. A `None` payload is the sentinel
    /// marking that `from` has finished sending for the stream;
    /// duplicate sentinels are idempotent. Data arriving after the
    /// sender's sentinel is a protocol violation.
    pub fn accept(
        &self,
        stream: &StreamName,
        from: NodeUuid,
        data: Option<Vec<Record>>,
    ) -> ExecutionResult<()> {
        let mut state = self.state.lock()?;
        let entry = state
            .entry(stream.clone())
            .or_insert_with(StreamState::new);
        match data {
            Some(records) => {
                if entry.completed.contains(&from) {
                    return Err(ExecutionError::InternalError(format!(
                        "peer {from} sent shuffle data after its end of stream"
                    )));
                }
                entry.buffer.extend(records);
            }
            None => {
                entry.completed.insert(from);
                if self.expected.iter().all(|peer| entry.completed.contains(peer)) {
                    debug!("shuffle stream {stream} is complete");
                    // The barrier may complete before anyone subscribes.
                    entry.notify.send_replace(true);
                }
            }
        }
        Ok(())
    }

    pub fn is_complete(&self, stream: &StreamName) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        state
            .get(stream)
            .is_some_and(|entry| *entry.notify.borrow())
    }

    /// Waits for the all-peers barrier on the stream, then drains the
    /// buffered records. A peer that never sends its sentinel makes
    /// this time out with an explicit error rather than stall forever.
    pub async fn wait(
        &self,
        stream: &StreamName,
        timeout: Duration,
    ) -> ExecutionResult<Vec<Record>> {
        let mut complete = {
            let mut state = self.state.lock()?;
            let entry = state
                .entry(stream.clone())
                .or_insert_with(StreamState::new);
            entry.notify.subscribe()
        };
        tokio::time::timeout(timeout, complete.wait_for(|x| *x))
            .await
            .map_err(|_| ExecutionError::ShuffleTimeout(stream.to_string()))?
            .map_err(|e| ExecutionError::InternalError(e.to_string()))?;
        let mut state = self.state.lock()?;
        let entry = state.get_mut(stream).ok_or_else(|| {
            ExecutionError::InternalError(format!("shuffle stream not found: {stream}"))
        })?;
        Ok(mem::take(&mut entry.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamName {
        StreamName::new("shuffle-1-0")
    }

    #[tokio::test]
    async fn test_barrier_requires_all_peers() {
        let a = NodeUuid::random();
        let b = NodeUuid::random();
        let exchange = ShuffleExchange::new([a, b]);
        exchange
            .accept(&stream(), a, Some(vec![vec![1.0]]))
            .unwrap();
        exchange.accept(&stream(), a, None).unwrap();
        assert!(!exchange.is_complete(&stream()));

        exchange
            .accept(&stream(), b, Some(vec![vec![2.0]]))
            .unwrap();
        exchange.accept(&stream(), b, None).unwrap();
        assert!(exchange.is_complete(&stream()));

        let mut records = exchange
            .wait(&stream(), Duration::from_secs(1))
            .await
            .unwrap();
        records.sort_by(|x, y| x[0].total_cmp(&y[0]));
        assert_eq!(records, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn test_duplicate_sentinels_do_not_double_count() {
        let a = NodeUuid::random();
        let b = NodeUuid::random();
        let exchange = ShuffleExchange::new([a, b]);
        exchange.accept(&stream(), a, None).unwrap();
        exchange.accept(&stream(), a, None).unwrap();
        assert!(!exchange.is_complete(&stream()));
    }

    #[tokio::test]
    async fn test_missing_sentinel_keeps_stream_pending() {
        let a = NodeUuid::random();
        let b = NodeUuid::random();
        let exchange = ShuffleExchange::new([a, b]);
        exchange
            .accept(&stream(), a, Some(vec![vec![1.0]]))
            .unwrap();
        exchange.accept(&stream(), a, None).unwrap();
        // Peer `b` never sends its sentinel.
        let out = exchange.wait(&stream(), Duration::from_millis(50)).await;
        assert!(matches!(out, Err(ExecutionError::ShuffleTimeout(_))));
        assert!(!exchange.is_complete(&stream()));
    }

    #[tokio::test]
    async fn test_data_after_sentinel_is_rejected() {
        let a = NodeUuid::random();
        let exchange = ShuffleExchange::new([a]);
        exchange.accept(&stream(), a, None).unwrap();
        let out = exchange.accept(&stream(), a, Some(vec![vec![1.0]]));
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn test_no_loss_and_no_duplication() {
        let a = NodeUuid::random();
        let b = NodeUuid::random();
        let exchange = ShuffleExchange::new([a, b]);
        for i in 0..100 {
            exchange
                .accept(&stream(), a, Some(vec![vec![i as f64]]))
                .unwrap();
        }
        exchange.accept(&stream(), a, None).unwrap();
        exchange.accept(&stream(), b, None).unwrap();
        let mut records = exchange
            .wait(&stream(), Duration::from_secs(1))
            .await
            .unwrap();
        records.sort_by(|x, y| x[0].total_cmp(&y[0]));
        let expected: Vec<Record> = (0..100).map(|i| vec![i as f64]).collect();
        assert_eq!(records, expected);
    }
}
