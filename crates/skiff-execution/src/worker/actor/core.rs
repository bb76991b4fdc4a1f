use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use skiff_server::actor::{Actor, ActorAction, ActorContext};
use tokio::sync::watch;

use crate::driver::WorkerRegistration;
use crate::job::{AppContext, JobAssignment, JobState};
use crate::shuffle::ShuffleExchange;
use crate::stream::{ResultSink, StreamName};
use crate::id::JobId;
use crate::worker::event::WorkerEvent;
use crate::worker::options::WorkerOptions;
use crate::worker::{probe_capabilities, ExitReason, SharedCache, WorkerClient};

pub(in crate::worker) struct JobEntry {
    pub assignment: JobAssignment,
    pub context: AppContext,
    pub exchange: Arc<ShuffleExchange>,
    pub state: watch::Sender<JobState>,
}

/// One worker node. It registers with the coordinator at start, stages
/// and runs the jobs it is assigned, and exchanges shuffle data with
/// its peers.
pub struct WorkerActor {
    pub(super) options: WorkerOptions,
    pub(super) identity: Option<WorkerRegistration>,
    pub(super) jobs: HashMap<JobId, JobEntry>,
    pub(super) cache: SharedCache,
    pub(super) local_streams: HashMap<StreamName, ResultSink>,
    pub(super) exit_reason: ExitReason,
}

impl Actor for WorkerActor {
    type Message = WorkerEvent;
    type Options = WorkerOptions;

    fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            identity: None,
            jobs: HashMap::new(),
            cache: SharedCache::new(),
            local_streams: HashMap::new(),
            exit_reason: ExitReason::Shutdown,
        }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!(
            "starting worker slot {} (coordinator at {})",
            self.options.slot,
            self.options.coordinator.address()
        );
        let driver = self.options.driver.clone();
        let client = WorkerClient::new(ctx.handle().clone());
        let retry = self.options.retry.clone();
        let capabilities = probe_capabilities();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let out = retry
                .run(|| {
                    let driver = driver.clone();
                    let client = client.clone();
                    let capabilities = capabilities.clone();
                    async move { driver.register_worker(capabilities, client).await }
                })
                .await;
            let event = match out {
                Ok(registration) => WorkerEvent::Registered { registration },
                Err(e) => WorkerEvent::RegistrationFailed {
                    message: e.to_string(),
                },
            };
            let _ = handle.send(event).await;
        });
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: WorkerEvent) -> ActorAction {
        match message {
            WorkerEvent::Registered { registration } => self.handle_registered(ctx, registration),
            WorkerEvent::RegistrationFailed { message } => {
                self.handle_registration_failed(ctx, message)
            }
            WorkerEvent::Request { request, reply } => self.handle_request(ctx, request, reply),
            WorkerEvent::RunJob { job_id, reply } => self.handle_run_job(ctx, job_id, reply),
            WorkerEvent::JobCompleted { job_id, outcome } => {
                self.handle_job_completed(ctx, job_id, outcome)
            }
            WorkerEvent::CreateLocalStream { name, result } => {
                self.handle_create_local_stream(ctx, name, result)
            }
            WorkerEvent::InspectJob { job_id, result } => {
                self.handle_inspect_job(ctx, job_id, result)
            }
            WorkerEvent::TransportError { message } => self.handle_transport_error(ctx, message),
            WorkerEvent::Shutdown => ActorAction::Stop,
        }
    }

    fn stop(self) {
        info!("worker slot {} stopped: {:?}", self.options.slot, self.exit_reason);
        if let Some(signal) = self.options.exit_signal {
            let _ = signal.send(self.exit_reason);
        }
    }
}
