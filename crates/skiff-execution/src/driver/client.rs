use skiff_server::actor::ActorHandle;
use tokio::sync::oneshot;

use crate::driver::actor::DriverActor;
use crate::driver::event::DriverEvent;
use crate::driver::state::{ClusterSnapshot, WorkerCapabilities, WorkerRegistration};
use crate::error::ExecutionResult;
use crate::id::{JobId, NodeUuid};
use crate::stream::ResultSource;
use crate::task::{JobSpec, Record};
use crate::worker::WorkerClient;

/// A typed handle for talking to the coordinator.
pub struct DriverClient {
    handle: ActorHandle<DriverActor>,
}

impl Clone for DriverClient {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl DriverClient {
    pub fn new(handle: ActorHandle<DriverActor>) -> Self {
        Self { handle }
    }

    pub async fn register_worker(
        &self,
        capabilities: WorkerCapabilities,
        client: WorkerClient,
    ) -> ExecutionResult<WorkerRegistration> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(DriverEvent::RegisterWorker {
                capabilities,
                client,
                result: tx,
            })
            .await?;
        Ok(rx.await?)
    }

    pub async fn execute_job(&self, spec: JobSpec) -> ExecutionResult<ResultSource> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(DriverEvent::ExecuteJob { spec, result: tx })
            .await?;
        rx.await?
    }

    /// Sends one chunk of job output and waits for the coordinator's
    /// acknowledgement before returning.
    pub async fn stream_result(
        &self,
        job_id: JobId,
        from: NodeUuid,
        data: Option<Vec<Record>>,
    ) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(DriverEvent::StreamResult {
                job_id,
                from,
                data,
                reply: tx,
            })
            .await?;
        rx.await?
    }

    pub async fn report_last_line(
        &self,
        job_id: JobId,
        from: NodeUuid,
        line: Option<Record>,
    ) -> ExecutionResult<()> {
        self.handle
            .send(DriverEvent::LastLine { job_id, from, line })
            .await?;
        Ok(())
    }

    pub async fn report_action(&self, job_id: JobId, from: NodeUuid) -> ExecutionResult<()> {
        self.handle
            .send(DriverEvent::ActionDone { job_id, from })
            .await?;
        Ok(())
    }

    pub async fn report_job_failed(
        &self,
        job_id: JobId,
        from: NodeUuid,
        message: String,
    ) -> ExecutionResult<()> {
        self.handle
            .send(DriverEvent::JobFailed {
                job_id,
                from,
                message,
            })
            .await?;
        Ok(())
    }

    pub async fn reset_workers(&self) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(DriverEvent::ResetWorkers { result: tx })
            .await?;
        rx.await?
    }

    pub async fn inspect_state(&self) -> ExecutionResult<ClusterSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(DriverEvent::InspectState { result: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> ExecutionResult<()> {
        self.handle.send(DriverEvent::Shutdown).await?;
        Ok(())
    }
}
