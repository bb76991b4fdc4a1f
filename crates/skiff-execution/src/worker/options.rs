use std::time::Duration;

use skiff_server::RetryStrategy;
use tokio::sync::oneshot;

use crate::driver::DriverClient;
use crate::id::SlotId;
use crate::rpc::ClientOptions;
use crate::supervisor::WorkerLaunchOptions;
use crate::worker::ExitReason;

pub struct WorkerOptions {
    pub slot: SlotId,
    pub driver: DriverClient,
    pub coordinator: ClientOptions,
    pub test_mode: bool,
    pub stream_chunk_size: usize,
    pub shuffle_timeout: Duration,
    pub retry: RetryStrategy,
    /// Resolved with the exit reason when the worker actor stops.
    pub exit_signal: Option<oneshot::Sender<ExitReason>>,
}

impl WorkerOptions {
    pub fn from_launch(
        slot: SlotId,
        driver: DriverClient,
        launch: &WorkerLaunchOptions,
        exit_signal: oneshot::Sender<ExitReason>,
    ) -> Self {
        Self {
            slot,
            driver,
            coordinator: launch.coordinator.clone(),
            test_mode: launch.test_mode,
            stream_chunk_size: launch.stream_chunk_size,
            shuffle_timeout: launch.shuffle_timeout,
            retry: launch.retry.clone(),
            exit_signal: Some(exit_signal),
        }
    }
}
