use std::collections::VecDeque;
use std::sync::Arc;

use log::{error, info};
use skiff_common::config::DeploymentKind;
use skiff_server::actor::{Actor, ActorAction, ActorContext};
use tokio::sync::oneshot;

use crate::driver::client::DriverClient;
use crate::driver::event::DriverEvent;
use crate::driver::options::DriverOptions;
use crate::driver::state::DriverState;
use crate::error::ExecutionResult;
use crate::id::{NodeUuid, SlotId};
use crate::stream::ResultSource;
use crate::supervisor::{
    LocalWorkerManager, ProcessWorkerManager, ProcessWorkerOptions, WorkerLaunchOptions,
    WorkerManager,
};
use crate::task::JobSpec;

/// The coordinator. It owns the worker pool, assigns jobs to every
/// registered worker, and merges the result streams the workers send
/// back.
pub struct DriverActor {
    pub(super) options: DriverOptions,
    pub(super) state: DriverState,
    pub(super) master_uuid: NodeUuid,
    pub(super) worker_manager: Option<Arc<dyn WorkerManager>>,
    pub(super) pending_jobs: VecDeque<(JobSpec, oneshot::Sender<ExecutionResult<ResultSource>>)>,
}

impl Actor for DriverActor {
    type Message = DriverEvent;
    type Options = DriverOptions;

    fn new(options: DriverOptions) -> Self {
        Self {
            options,
            state: DriverState::new(),
            master_uuid: NodeUuid::random(),
            worker_manager: None,
            pending_jobs: VecDeque::new(),
        }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!(
            "starting coordinator {} with {} worker slot(s)",
            self.master_uuid, self.options.worker_count
        );
        let manager: Arc<dyn WorkerManager> = match self.options.deployment {
            DeploymentKind::Local => {
                Arc::new(LocalWorkerManager::new(self.options.restart_policy.clone()))
            }
            DeploymentKind::ProcessCluster => {
                Arc::new(ProcessWorkerManager::new(ProcessWorkerOptions {
                    program: self.options.worker_program.clone(),
                    arguments: self.options.worker_arguments.clone(),
                    restart_policy: self.options.restart_policy.clone(),
                    debug: self.options.debug,
                }))
            }
        };
        self.worker_manager = Some(Arc::clone(&manager));
        let launch_options = WorkerLaunchOptions {
            driver: Some(DriverClient::new(ctx.handle().clone())),
            coordinator: self.options.coordinator.clone(),
            test_mode: self.options.test_mode,
            stream_chunk_size: self.options.stream_chunk_size,
            shuffle_timeout: self.options.shuffle_timeout,
            retry: self.options.rpc_retry_strategy.clone(),
            fatal_exit_code: self.options.fatal_exit_code,
        };
        for slot in 0..self.options.worker_count {
            let manager = Arc::clone(&manager);
            let options = launch_options.clone();
            let slot = SlotId::from(slot as u64 + 1);
            ctx.spawn(async move {
                if let Err(e) = manager.launch_worker(slot, options).await {
                    error!("failed to launch worker slot {slot}: {e}");
                }
            });
        }
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: DriverEvent) -> ActorAction {
        match message {
            DriverEvent::RegisterWorker {
                capabilities,
                client,
                result,
            } => self.handle_register_worker(ctx, capabilities, client, result),
            DriverEvent::ExecuteJob { spec, result } => self.handle_execute_job(ctx, spec, result),
            DriverEvent::JobAssigned { job_id, outcome } => {
                self.handle_job_assigned(ctx, job_id, outcome)
            }
            DriverEvent::StreamResult {
                job_id,
                from,
                data,
                reply,
            } => self.handle_stream_result(ctx, job_id, from, data, reply),
            DriverEvent::LastLine { job_id, from, line } => {
                self.handle_last_line(ctx, job_id, from, line)
            }
            DriverEvent::ActionDone { job_id, from } => self.handle_action_done(ctx, job_id, from),
            DriverEvent::JobFailed {
                job_id,
                from,
                message,
            } => self.handle_job_failed(ctx, job_id, from, message),
            DriverEvent::WorkerLost { worker_id } => self.handle_worker_lost(ctx, worker_id),
            DriverEvent::ResetWorkers { result } => self.handle_reset_workers(ctx, result),
            DriverEvent::InspectState { result } => self.handle_inspect_state(ctx, result),
            DriverEvent::Shutdown => self.handle_shutdown(ctx),
        }
    }

    fn stop(self) {
        info!("coordinator {} stopped", self.master_uuid);
        if let Some(manager) = self.worker_manager {
            tokio::spawn(async move {
                if let Err(e) = manager.stop().await {
                    error!("failed to stop worker manager: {e}");
                }
            });
        }
    }
}
