mod local;
mod process;

pub use local::LocalWorkerManager;
pub use process::{ProcessWorkerManager, ProcessWorkerOptions};

use std::time::Duration;

use async_trait::async_trait;
use skiff_server::RetryStrategy;

use crate::driver::DriverClient;
use crate::error::ExecutionResult;
use crate::id::SlotId;
use crate::rpc::ClientOptions;

/// Whether a stopped worker slot should be relaunched.
#[derive(Debug, Clone)]
pub enum RestartPolicy {
    Always,
    /// Relaunch unless the worker exited with the given code.
    UnlessFatal(i32),
}

impl RestartPolicy {
    pub fn should_restart(&self, exit_code: Option<i32>) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::UnlessFatal(fatal) => exit_code != Some(*fatal),
        }
    }
}

#[derive(Clone)]
pub struct WorkerLaunchOptions {
    /// The in-process coordinator handle. Absent for worker processes,
    /// which reach the coordinator through the transport layer.
    pub driver: Option<DriverClient>,
    pub coordinator: ClientOptions,
    pub test_mode: bool,
    pub stream_chunk_size: usize,
    pub shuffle_timeout: Duration,
    pub retry: RetryStrategy,
    pub fatal_exit_code: i32,
}

/// Launches worker slots and keeps them alive according to the restart
/// policy.
#[async_trait]
pub trait WorkerManager: Send + Sync {
    async fn launch_worker(
        &self,
        slot: SlotId,
        options: WorkerLaunchOptions,
    ) -> ExecutionResult<()>;
    async fn stop_worker(&self, slot: SlotId) -> ExecutionResult<()>;
    async fn stop(&self) -> ExecutionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy() {
        let policy = RestartPolicy::UnlessFatal(2);
        assert!(policy.should_restart(Some(0)));
        assert!(policy.should_restart(Some(1)));
        assert!(policy.should_restart(None));
        assert!(!policy.should_restart(Some(2)));
        assert!(RestartPolicy::Always.should_restart(Some(2)));
    }
}
