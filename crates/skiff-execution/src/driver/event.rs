use tokio::sync::oneshot;

use crate::driver::state::{ClusterSnapshot, WorkerCapabilities, WorkerRegistration};
use crate::error::ExecutionResult;
use crate::id::{JobId, NodeUuid, WorkerId};
use crate::stream::ResultSource;
use crate::task::{JobSpec, Record};
use crate::worker::WorkerClient;

pub enum DriverEvent {
    /// A worker announces itself and receives its cluster identity.
    RegisterWorker {
        capabilities: WorkerCapabilities,
        client: WorkerClient,
        result: oneshot::Sender<WorkerRegistration>,
    },
    /// A client submits a job. The result stream is delivered once the
    /// job has been assigned to every worker.
    ExecuteJob {
        spec: JobSpec,
        result: oneshot::Sender<ExecutionResult<ResultSource>>,
    },
    /// Outcome of fanning the assignment out to the workers.
    JobAssigned {
        job_id: JobId,
        outcome: ExecutionResult<()>,
    },
    /// A chunk of job output from one worker; `None` ends that
    /// worker's stream. The reply acknowledges receipt so the worker
    /// never runs ahead of the coordinator by more than one chunk.
    StreamResult {
        job_id: JobId,
        from: NodeUuid,
        data: Option<Vec<Record>>,
        reply: oneshot::Sender<ExecutionResult<()>>,
    },
    /// The last record a worker produced, reported for diagnostics.
    LastLine {
        job_id: JobId,
        from: NodeUuid,
        line: Option<Record>,
    },
    /// A worker finished its share of the terminal action.
    ActionDone { job_id: JobId, from: NodeUuid },
    JobFailed {
        job_id: JobId,
        from: NodeUuid,
        message: String,
    },
    /// Delivery to a worker failed, so the worker is taken out of the
    /// pool until its replacement registers.
    WorkerLost { worker_id: WorkerId },
    /// Tells every worker to drop its job and cache state.
    ResetWorkers {
        result: oneshot::Sender<ExecutionResult<()>>,
    },
    InspectState {
        result: oneshot::Sender<ClusterSnapshot>,
    },
    Shutdown,
}
