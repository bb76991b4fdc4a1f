use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ExecutionError, ExecutionResult};
use crate::task::Record;

/// An identifier for a stream of records between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StreamName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

enum StreamFrame {
    Data(Vec<Record>),
    Error(String),
    /// The final frame. The consumer acknowledges it so the producer
    /// can observe that every preceding frame has been taken.
    End(oneshot::Sender<()>),
}

/// Creates a result stream pair. The sink side is held by the node
/// producing results and the source side by the consumer awaiting them.
pub fn result_channel() -> (ResultSink, ResultSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ResultSink { tx, ended: false },
        ResultSource { rx, done: false },
    )
}

/// The producing half of a result stream. Pushes are synchronous so
/// that actor handlers can forward chunks without awaiting.
pub struct ResultSink {
    tx: mpsc::UnboundedSender<StreamFrame>,
    ended: bool,
}

impl ResultSink {
    pub fn push(&mut self, records: Vec<Record>) -> ExecutionResult<()> {
        if self.ended {
            return Err(ExecutionError::InternalError(
                "cannot push to an ended result stream".to_string(),
            ));
        }
        self.tx
            .send(StreamFrame::Data(records))
            .map_err(|_| ExecutionError::InternalError("result stream receiver dropped".to_string()))
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.ended = true;
        let _ = self.tx.send(StreamFrame::Error(message.into()));
    }

    /// Ends the stream and returns a receiver that resolves once the
    /// consumer has acknowledged the end of stream.
    pub fn end(&mut self) -> ExecutionResult<oneshot::Receiver<()>> {
        if self.ended {
            return Err(ExecutionError::InternalError(
                "result stream already ended".to_string(),
            ));
        }
        self.ended = true;
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(StreamFrame::End(ack))
            .map_err(|_| ExecutionError::InternalError("result stream receiver dropped".to_string()))?;
        Ok(acked)
    }
}

/// The consuming half of a result stream.
pub struct ResultSource {
    rx: mpsc::UnboundedReceiver<StreamFrame>,
    done: bool,
}

impl ResultSource {
    /// Returns the next chunk of records, or `None` once the stream has
    /// ended. The end of stream is acknowledged to the producer exactly
    /// once.
    pub async fn next(&mut self) -> ExecutionResult<Option<Vec<Record>>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(StreamFrame::Data(records)) => Ok(Some(records)),
            Some(StreamFrame::Error(message)) => {
                self.done = true;
                Err(ExecutionError::JobFailed(message))
            }
            Some(StreamFrame::End(ack)) => {
                self.done = true;
                let _ = ack.send(());
                Ok(None)
            }
            None => {
                self.done = true;
                Err(ExecutionError::InternalError(
                    "result stream producer dropped".to_string(),
                ))
            }
        }
    }

    /// Drains the stream into a single vector of records.
    pub async fn collect(mut self) -> ExecutionResult<Vec<Record>> {
        let mut out = vec![];
        while let Some(records) = self.next().await? {
            out.extend(records);
        }
        Ok(out)
    }
}

impl Stream for ResultSource {
    type Item = ExecutionResult<Vec<Record>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(StreamFrame::Data(records))) => Poll::Ready(Some(Ok(records))),
            Poll::Ready(Some(StreamFrame::Error(message))) => {
                self.done = true;
                Poll::Ready(Some(Err(ExecutionError::JobFailed(message))))
            }
            Poll::Ready(Some(StreamFrame::End(ack))) => {
                self.done = true;
                let _ = ack.send(());
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Some(Err(ExecutionError::InternalError(
                    "result stream producer dropped".to_string(),
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_delivers_in_order_and_acks_end() {
        let (mut sink, mut source) = result_channel();
        sink.push(vec![vec![1.0]]).unwrap();
        sink.push(vec![vec![2.0]]).unwrap();
        let acked = sink.end().unwrap();

        assert_eq!(source.next().await.unwrap(), Some(vec![vec![1.0]]));
        assert_eq!(source.next().await.unwrap(), Some(vec![vec![2.0]]));
        assert_eq!(source.next().await.unwrap(), None);
        // Repeated polls after the end stay terminal.
        assert_eq!(source.next().await.unwrap(), None);
        acked.await.unwrap();
    }

    #[tokio::test]
    async fn test_push_after_end_is_an_error() {
        let (mut sink, _source) = result_channel();
        let _ = sink.end().unwrap();
        assert!(sink.push(vec![vec![1.0]]).is_err());
        assert!(sink.end().is_err());
    }

    #[tokio::test]
    async fn test_failure_surfaces_to_the_consumer() {
        let (mut sink, mut source) = result_channel();
        sink.push(vec![vec![1.0]]).unwrap();
        sink.fail("worker lost");
        assert_eq!(source.next().await.unwrap(), Some(vec![vec![1.0]]));
        let out = source.next().await;
        assert!(matches!(out, Err(ExecutionError::JobFailed(_))));
    }

    #[tokio::test]
    async fn test_stream_adapter_yields_chunks() {
        let (mut sink, mut source) = result_channel();
        sink.push(vec![vec![1.0]]).unwrap();
        let _ = sink.end().unwrap();
        let first = futures::StreamExt::next(&mut source).await;
        assert_eq!(first.unwrap().unwrap(), vec![vec![1.0]]);
        assert!(futures::StreamExt::next(&mut source).await.is_none());
    }

    #[tokio::test]
    async fn test_collect_gathers_all_chunks() {
        let (mut sink, source) = result_channel();
        sink.push(vec![vec![1.0], vec![2.0]]).unwrap();
        sink.push(vec![vec![3.0]]).unwrap();
        let _ = sink.end().unwrap();
        let records = source.collect().await.unwrap();
        assert_eq!(records, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }
}
