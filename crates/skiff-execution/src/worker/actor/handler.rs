use std::sync::Arc;

use log::{info, warn};
use skiff_server::actor::{ActorAction, ActorContext};
use tokio::sync::{oneshot, watch};

use crate::driver::WorkerRegistration;
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{JobId, NodeUuid};
use crate::job::{engine, AppContext, JobAssignment, JobState};
use crate::shuffle::ShuffleExchange;
use crate::stream::{result_channel, ResultSource, StreamName};
use crate::task::Record;
use crate::worker::actor::core::JobEntry;
use crate::worker::event::{WorkerEvent, WorkerRequest};
use crate::worker::{ExitReason, WorkerActor};

impl WorkerActor {
    pub(super) fn handle_registered(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        registration: WorkerRegistration,
    ) -> ActorAction {
        info!(
            "worker slot {} registered as {} ({})",
            self.options.slot, registration.id, registration.uuid
        );
        self.identity = Some(registration);
        ActorAction::Continue
    }

    pub(super) fn handle_registration_failed(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        message: String,
    ) -> ActorAction {
        self.exit_reason = ExitReason::TransportError;
        ActorAction::fail(format!(
            "worker slot {} could not register: {message}",
            self.options.slot
        ))
    }

    pub(super) fn handle_request(
        &mut self,
        ctx: &mut ActorContext<Self>,
        request: WorkerRequest,
        reply: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        match request {
            WorkerRequest::SetJob { assignment } => {
                let out = self.set_job(assignment);
                if let Err(e) = &out {
                    warn!("rejected job assignment: {e}");
                }
                let _ = reply.send(out);
                ActorAction::Continue
            }
            WorkerRequest::Shuffle {
                job_id,
                stream,
                from,
                data,
            } => {
                let _ = reply.send(self.accept_shuffle(job_id, &stream, from, data));
                ActorAction::Continue
            }
            WorkerRequest::Stream { name, data } => {
                let _ = reply.send(self.accept_local_stream(&name, data));
                ActorAction::Continue
            }
            WorkerRequest::Reset => self.handle_reset(ctx, reply),
        }
    }

    /// Validates and stages an assignment. A worker that is not listed
    /// in the assignment rejects it without creating any job state.
    fn set_job(&mut self, assignment: JobAssignment) -> ExecutionResult<()> {
        let identity = self.identity.ok_or_else(|| {
            ExecutionError::InternalError("job assigned to an unregistered worker".to_string())
        })?;
        let worker_count = assignment.workers.len();
        if assignment.partitioner.partition_count() != worker_count {
            return Err(ExecutionError::InvalidJob(format!(
                "partitioner defines {} partition(s) for {worker_count} worker(s)",
                assignment.partitioner.partition_count()
            )));
        }
        if assignment.input.len() != worker_count {
            return Err(ExecutionError::InvalidJob(format!(
                "assignment has {} input share(s) for {worker_count} worker(s)",
                assignment.input.len()
            )));
        }
        let context = AppContext::try_new(&assignment, identity.uuid, self.cache.clone())?;
        let exchange = Arc::new(ShuffleExchange::new(
            assignment.workers.iter().map(|w| w.uuid),
        ));
        let (state, _) = watch::channel(JobState::Assigned);
        state.send_replace(JobState::Ready);
        info!(
            "worker {} staged job {} with {} input record(s)",
            identity.id,
            assignment.job_id,
            assignment.input[context.self_index].len()
        );
        self.jobs.insert(
            assignment.job_id,
            JobEntry {
                assignment,
                context,
                exchange,
                state,
            },
        );
        Ok(())
    }

    pub(super) fn handle_run_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        job_id: JobId,
        reply: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        let out = self.run_job(ctx, job_id);
        if let Err(e) = &out {
            warn!("cannot run job {job_id}: {e}");
        }
        let _ = reply.send(out);
        ActorAction::Continue
    }

    fn run_job(&mut self, ctx: &mut ActorContext<Self>, job_id: JobId) -> ExecutionResult<()> {
        let entry = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| ExecutionError::InvalidJob(format!("unknown job {job_id}")))?;
        let current = *entry.state.borrow();
        if !current.can_transition_to(JobState::Running) {
            return Err(ExecutionError::InvalidJob(format!(
                "job {job_id} cannot start from state {current:?}"
            )));
        }
        entry.state.send_replace(JobState::Running);
        let params = engine::RunParams {
            job_id,
            stages: entry.assignment.stages.clone(),
            action: entry.assignment.action.clone(),
            partitioner: entry.assignment.partitioner.clone(),
            input: entry.assignment.input[entry.context.self_index].clone(),
            context: entry.context.clone(),
            exchange: Arc::clone(&entry.exchange),
            driver: self.options.driver.clone(),
            shuffle_timeout: self.options.shuffle_timeout,
            chunk_size: self.options.stream_chunk_size,
            read_cache: entry.assignment.read_cache.clone(),
            publish_cache: entry.assignment.publish_cache.clone(),
            state: entry.state.clone(),
        };
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let outcome = engine::run(params).await;
            let _ = handle
                .send(WorkerEvent::JobCompleted { job_id, outcome })
                .await;
        });
        Ok(())
    }

    fn accept_shuffle(
        &mut self,
        job_id: JobId,
        stream: &StreamName,
        from: NodeUuid,
        data: Option<Vec<Record>>,
    ) -> ExecutionResult<()> {
        let entry = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| ExecutionError::InvalidJob(format!("unknown job {job_id}")))?;
        entry.exchange.accept(stream, from, data)
    }

    fn accept_local_stream(
        &mut self,
        name: &StreamName,
        data: Option<Vec<Record>>,
    ) -> ExecutionResult<()> {
        match data {
            Some(records) => self
                .local_streams
                .get_mut(name)
                .ok_or_else(|| ExecutionError::InvalidJob(format!("unknown stream {name}")))?
                .push(records),
            None => {
                let mut sink = self
                    .local_streams
                    .remove(name)
                    .ok_or_else(|| ExecutionError::InvalidJob(format!("unknown stream {name}")))?;
                let _ = sink.end()?;
                Ok(())
            }
        }
    }

    /// In test mode the worker drops its jobs, streams and cache and
    /// keeps serving. Otherwise it stops so the supervisor can relaunch
    /// the slot from a clean state.
    fn handle_reset(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        reply: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        info!("worker slot {} reset", self.options.slot);
        let _ = reply.send(Ok(()));
        if self.options.test_mode {
            self.jobs.clear();
            self.local_streams.clear();
            self.cache.reset();
            ActorAction::Continue
        } else {
            self.exit_reason = ExitReason::Reset;
            ActorAction::Stop
        }
    }

    pub(super) fn handle_job_completed(
        &mut self,
        ctx: &mut ActorContext<Self>,
        job_id: JobId,
        outcome: ExecutionResult<()>,
    ) -> ActorAction {
        match outcome {
            Ok(()) => {
                self.jobs.remove(&job_id);
                info!("worker slot {} finished job {job_id}", self.options.slot);
                ActorAction::Continue
            }
            Err(e) => {
                if let Some(entry) = self.jobs.remove(&job_id) {
                    entry.state.send_replace(JobState::Failed);
                }
                if let Some(identity) = self.identity {
                    let driver = self.options.driver.clone();
                    let message = e.to_string();
                    ctx.spawn(async move {
                        let _ = driver
                            .report_job_failed(job_id, identity.uuid, message)
                            .await;
                    });
                }
                ActorAction::warn(format!("job {job_id} failed: {e}"))
            }
        }
    }

    pub(super) fn handle_create_local_stream(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        name: StreamName,
        result: oneshot::Sender<ResultSource>,
    ) -> ActorAction {
        let (sink, source) = result_channel();
        self.local_streams.insert(name, sink);
        let _ = result.send(source);
        ActorAction::Continue
    }

    pub(super) fn handle_inspect_job(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        result: oneshot::Sender<Option<JobState>>,
    ) -> ActorAction {
        let state = self.jobs.get(&job_id).map(|entry| *entry.state.borrow());
        let _ = result.send(state);
        ActorAction::Continue
    }

    pub(super) fn handle_transport_error(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        message: String,
    ) -> ActorAction {
        self.exit_reason = ExitReason::TransportError;
        ActorAction::fail(format!(
            "worker slot {} lost its transport: {message}",
            self.options.slot
        ))
    }
}
