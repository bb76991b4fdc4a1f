use skiff_server::actor::ActorHandle;
use tokio::sync::oneshot;

use crate::error::ExecutionResult;
use crate::id::{JobId, NodeUuid};
use crate::job::{JobAssignment, JobState};
use crate::stream::{ResultSource, StreamName};
use crate::task::Record;
use crate::worker::actor::WorkerActor;
use crate::worker::event::{WorkerEvent, WorkerRequest};

/// A typed handle for talking to one worker.
pub struct WorkerClient {
    handle: ActorHandle<WorkerActor>,
}

impl Clone for WorkerClient {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl WorkerClient {
    pub fn new(handle: ActorHandle<WorkerActor>) -> Self {
        Self { handle }
    }

    async fn request(&self, request: WorkerRequest) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(WorkerEvent::Request { request, reply: tx })
            .await?;
        rx.await?
    }

    pub async fn set_job(&self, assignment: JobAssignment) -> ExecutionResult<()> {
        self.request(WorkerRequest::SetJob { assignment }).await
    }

    pub async fn run_job(&self, job_id: JobId) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(WorkerEvent::RunJob { job_id, reply: tx })
            .await?;
        rx.await?
    }

    pub async fn shuffle(
        &self,
        job_id: JobId,
        stream: StreamName,
        from: NodeUuid,
        data: Option<Vec<Record>>,
    ) -> ExecutionResult<()> {
        self.request(WorkerRequest::Shuffle {
            job_id,
            stream,
            from,
            data,
        })
        .await
    }

    pub async fn stream(
        &self,
        name: StreamName,
        data: Option<Vec<Record>>,
    ) -> ExecutionResult<()> {
        self.request(WorkerRequest::Stream { name, data }).await
    }

    pub async fn reset(&self) -> ExecutionResult<()> {
        self.request(WorkerRequest::Reset).await
    }

    pub async fn create_local_stream(&self, name: StreamName) -> ExecutionResult<ResultSource> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(WorkerEvent::CreateLocalStream { name, result: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn job_state(&self, job_id: JobId) -> ExecutionResult<Option<JobState>> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(WorkerEvent::InspectJob { job_id, result: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> ExecutionResult<()> {
        self.handle.send(WorkerEvent::Shutdown).await?;
        Ok(())
    }
}
