use tokio::sync::oneshot;

use crate::driver::WorkerRegistration;
use crate::error::ExecutionResult;
use crate::id::{JobId, NodeUuid};
use crate::job::{JobAssignment, JobState};
use crate::stream::{ResultSource, StreamName};
use crate::task::Record;

/// The closed set of commands a peer may send to a worker. Dispatch is
/// an exhaustive match, so a malformed command cannot reach a handler.
pub enum WorkerRequest {
    /// Stage a job assignment. The worker validates it and waits for
    /// the start signal.
    SetJob { assignment: JobAssignment },
    /// A shuffle chunk from a peer worker; `None` is the peer's end of
    /// stream sentinel.
    Shuffle {
        job_id: JobId,
        stream: StreamName,
        from: NodeUuid,
        data: Option<Vec<Record>>,
    },
    /// A chunk for a locally created named stream.
    Stream {
        name: StreamName,
        data: Option<Vec<Record>>,
    },
    /// Drop all job and cache state, or terminate for a fresh start
    /// depending on the deployment.
    Reset,
}

pub enum WorkerEvent {
    Registered { registration: WorkerRegistration },
    RegistrationFailed { message: String },
    Request {
        request: WorkerRequest,
        reply: oneshot::Sender<ExecutionResult<()>>,
    },
    RunJob {
        job_id: JobId,
        reply: oneshot::Sender<ExecutionResult<()>>,
    },
    /// Sent by the job engine task when a run finishes.
    JobCompleted {
        job_id: JobId,
        outcome: ExecutionResult<()>,
    },
    CreateLocalStream {
        name: StreamName,
        result: oneshot::Sender<ResultSource>,
    },
    InspectJob {
        job_id: JobId,
        result: oneshot::Sender<Option<JobState>>,
    },
    TransportError { message: String },
    Shutdown,
}
