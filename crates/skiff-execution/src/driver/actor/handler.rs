use log::info;
use skiff_server::actor::{ActorAction, ActorContext};
use tokio::sync::oneshot;

use crate::driver::actor::core::DriverActor;
use crate::driver::event::DriverEvent;
use crate::driver::state::{
    ClusterSnapshot, JobDescriptor, WorkerCapabilities, WorkerDescriptor, WorkerRegistration,
    WorkerSnapshot,
};
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{JobId, NodeUuid, WorkerId};
use crate::job::{JobAssignment, JobState, JobWorker};
use crate::shuffle::Partitioner;
use crate::stream::{result_channel, ResultSource};
use crate::task::{ActionOp, JobSpec, Record};
use crate::worker::WorkerClient;

impl DriverActor {
    pub(super) fn handle_register_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        capabilities: WorkerCapabilities,
        client: WorkerClient,
        result: oneshot::Sender<WorkerRegistration>,
    ) -> ActorAction {
        let id = match self.state.next_worker_id() {
            Ok(id) => id,
            Err(e) => return ActorAction::fail(e),
        };
        let uuid = NodeUuid::random();
        info!(
            "registered worker {id} ({uuid}) on {} with {} CPU(s)",
            capabilities.hostname, capabilities.cpu_count
        );
        self.state.workers.insert(
            id,
            WorkerDescriptor {
                uuid,
                capabilities,
                client,
                active: true,
            },
        );
        let _ = result.send(WorkerRegistration { id, uuid });
        self.try_schedule_pending(ctx)
    }

    pub(super) fn handle_execute_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        spec: JobSpec,
        result: oneshot::Sender<ExecutionResult<ResultSource>>,
    ) -> ActorAction {
        self.pending_jobs.push_back((spec, result));
        self.try_schedule_pending(ctx)
    }

    /// Assigns queued jobs once enough workers have registered. Jobs
    /// submitted before the pool is ready wait here instead of failing.
    fn try_schedule_pending(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        while !self.pending_jobs.is_empty() {
            let ready = self.state.active_workers().len() >= self.options.worker_count;
            if !ready {
                break;
            }
            if let Some((spec, subscriber)) = self.pending_jobs.pop_front() {
                if let Err(action) = self.schedule_job(ctx, spec, subscriber) {
                    return action;
                }
            }
        }
        ActorAction::Continue
    }

    fn schedule_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        spec: JobSpec,
        subscriber: oneshot::Sender<ExecutionResult<ResultSource>>,
    ) -> Result<(), ActorAction> {
        let workers: Vec<(WorkerId, NodeUuid, String, WorkerClient)> = self
            .state
            .active_workers()
            .into_iter()
            .map(|(id, w)| {
                (
                    id,
                    w.uuid,
                    w.capabilities.hostname.clone(),
                    w.client.clone(),
                )
            })
            .collect();
        let count = workers.len();
        let partitioner = spec
            .partitioner
            .clone()
            .unwrap_or(Partitioner::Hash { partitions: count });
        if partitioner.partition_count() != count {
            let message = format!(
                "partitioner defines {} partition(s) for {count} worker(s)",
                partitioner.partition_count()
            );
            let _ = subscriber.send(Err(ExecutionError::InvalidJob(message.clone())));
            return Err(ActorAction::warn(message));
        }
        let job_id = match self.state.next_job_id() {
            Ok(id) => id,
            Err(e) => {
                let _ = subscriber.send(Err(ExecutionError::InternalError(e.to_string())));
                return Err(ActorAction::fail(e));
            }
        };
        // Round-robin split so every worker gets an even share.
        let shares: Vec<Vec<Record>> = (0..count)
            .map(|i| spec.input.iter().skip(i).step_by(count).cloned().collect())
            .collect();
        let job_workers: Vec<JobWorker> = workers
            .into_iter()
            .map(|(id, uuid, host, client)| JobWorker {
                id,
                uuid,
                host,
                client,
            })
            .collect();
        let assignment = JobAssignment {
            job_id,
            master_uuid: self.master_uuid,
            workers: job_workers.clone(),
            stages: spec.stages,
            action: spec.action.clone(),
            partitioner,
            input: shares,
            read_cache: spec.read_cache,
            publish_cache: spec.publish_cache,
        };
        let (sink, source) = result_channel();
        self.state.jobs.insert(
            job_id,
            JobDescriptor {
                action: spec.action,
                workers: job_workers.iter().map(|w| (w.id, w.uuid)).collect(),
                state: JobState::Assigned,
                sink,
                source: Some(source),
                subscriber: Some(subscriber),
                partials: vec![],
                streams_ended: Default::default(),
                actions_done: Default::default(),
                last_lines: Default::default(),
            },
        );
        info!("assigning job {job_id} to {count} worker(s)");
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let mut outcome = Ok(());
            for worker in &job_workers {
                if let Err(e) = worker.client.set_job(assignment.clone()).await {
                    if matches!(e, ExecutionError::ActorError(_)) {
                        let _ = handle
                            .send(DriverEvent::WorkerLost {
                                worker_id: worker.id,
                            })
                            .await;
                    }
                    outcome = Err(ExecutionError::JobFailed(format!(
                        "failed to assign job {job_id} to worker {}: {e}",
                        worker.id
                    )));
                    break;
                }
            }
            let _ = handle.send(DriverEvent::JobAssigned { job_id, outcome }).await;
        });
        Ok(())
    }

    pub(super) fn handle_job_assigned(
        &mut self,
        ctx: &mut ActorContext<Self>,
        job_id: JobId,
        outcome: ExecutionResult<()>,
    ) -> ActorAction {
        let Some(job) = self.state.jobs.get_mut(&job_id) else {
            return ActorAction::warn(format!("assignment outcome for unknown job {job_id}"));
        };
        match outcome {
            Ok(()) => {
                job.state = JobState::Running;
                if let (Some(subscriber), Some(source)) =
                    (job.subscriber.take(), job.source.take())
                {
                    let _ = subscriber.send(Ok(source));
                }
                let workers: Vec<(WorkerId, NodeUuid, WorkerClient)> = job
                    .workers
                    .iter()
                    .filter_map(|(id, uuid)| {
                        self.state
                            .workers
                            .get(id)
                            .map(|w| (*id, *uuid, w.client.clone()))
                    })
                    .collect();
                let handle = ctx.handle().clone();
                ctx.spawn(async move {
                    for (worker_id, uuid, client) in workers {
                        if let Err(e) = client.run_job(job_id).await {
                            let _ = handle.send(DriverEvent::WorkerLost { worker_id }).await;
                            let _ = handle
                                .send(DriverEvent::JobFailed {
                                    job_id,
                                    from: uuid,
                                    message: format!(
                                        "failed to start job on worker {worker_id}: {e}"
                                    ),
                                })
                                .await;
                            return;
                        }
                    }
                });
                ActorAction::Continue
            }
            Err(e) => {
                if let Some(subscriber) = job.subscriber.take() {
                    let _ = subscriber.send(Err(e));
                }
                self.state.jobs.remove(&job_id);
                ActorAction::warn(format!("job {job_id} could not be assigned"))
            }
        }
    }

    pub(super) fn handle_stream_result(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        from: NodeUuid,
        data: Option<Vec<Record>>,
        reply: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        let Some(job) = self.state.jobs.get_mut(&job_id) else {
            let _ = reply.send(Err(ExecutionError::InvalidJob(format!(
                "unknown job {job_id}"
            ))));
            return ActorAction::warn(format!("result chunk for unknown job {job_id}"));
        };
        if !job.has_worker(from) {
            let _ = reply.send(Err(ExecutionError::InvalidJob(format!(
                "worker {from} is not part of job {job_id}"
            ))));
            return ActorAction::warn(format!("result chunk from foreign worker {from}"));
        }
        match data {
            Some(records) => {
                if job.streams_ended.contains(&from) {
                    let _ = reply.send(Err(ExecutionError::InternalError(
                        "result chunk after end of stream".to_string(),
                    )));
                    return ActorAction::warn(format!(
                        "late result chunk from worker {from} for job {job_id}"
                    ));
                }
                let out = if matches!(job.action, ActionOp::Reduce { .. }) {
                    job.partials.extend(records);
                    Ok(())
                } else {
                    job.sink.push(records)
                };
                let _ = reply.send(out);
                ActorAction::Continue
            }
            None => {
                if !job.streams_ended.insert(from) {
                    let _ = reply.send(Err(ExecutionError::InternalError(
                        "duplicate end of stream".to_string(),
                    )));
                    return ActorAction::warn(format!(
                        "duplicate end of stream from worker {from} for job {job_id}"
                    ));
                }
                let _ = reply.send(Ok(()));
                self.maybe_complete(job_id)
            }
        }
    }

    pub(super) fn handle_last_line(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        from: NodeUuid,
        line: Option<Record>,
    ) -> ActorAction {
        if let Some(job) = self.state.jobs.get_mut(&job_id) {
            job.last_lines.insert(from, line);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_action_done(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        from: NodeUuid,
    ) -> ActorAction {
        let Some(job) = self.state.jobs.get_mut(&job_id) else {
            return ActorAction::warn(format!("action report for unknown job {job_id}"));
        };
        job.actions_done.insert(from);
        self.maybe_complete(job_id)
    }

    /// Completes the job once every worker has ended its stream and
    /// reported its action done. For reductions the per-worker partials
    /// are combined here, with the user seed applied exactly once.
    fn maybe_complete(&mut self, job_id: JobId) -> ActorAction {
        let Some(job) = self.state.jobs.get_mut(&job_id) else {
            return ActorAction::Continue;
        };
        if job.state.is_terminal() || !job.all_reported() {
            return ActorAction::Continue;
        }
        if let ActionOp::Reduce { f, seed } = &job.action {
            let partials = std::mem::take(&mut job.partials);
            let total = partials.iter().fold(seed.clone(), |acc, r| f.apply(acc, r));
            if let Err(e) = job.sink.push(vec![total]) {
                job.state = JobState::Failed;
                return ActorAction::warn(format!("failed to emit result of job {job_id}: {e}"));
            }
        }
        match job.sink.end() {
            Ok(_acked) => {
                job.state = JobState::Completed;
                info!("job {job_id} completed");
                ActorAction::Continue
            }
            Err(e) => {
                job.state = JobState::Failed;
                ActorAction::warn(format!("failed to end result stream of job {job_id}: {e}"))
            }
        }
    }

    pub(super) fn handle_job_failed(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        from: NodeUuid,
        message: String,
    ) -> ActorAction {
        let Some(job) = self.state.jobs.get_mut(&job_id) else {
            return ActorAction::warn(format!("failure report for unknown job {job_id}"));
        };
        if job.state.is_terminal() {
            return ActorAction::Continue;
        }
        job.state = JobState::Failed;
        if let Some(subscriber) = job.subscriber.take() {
            let _ = subscriber.send(Err(ExecutionError::JobFailed(message.clone())));
        } else {
            job.sink.fail(message.clone());
        }
        ActorAction::warn(format!("job {job_id} failed on worker {from}: {message}"))
    }

    pub(super) fn handle_reset_workers(
        &mut self,
        ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        let clients: Vec<WorkerClient> = self
            .state
            .active_workers()
            .into_iter()
            .map(|(_, w)| w.client.clone())
            .collect();
        info!("resetting {} worker(s)", clients.len());
        ctx.spawn(async move {
            let mut outcome = Ok(());
            for client in clients {
                if let Err(e) = client.reset().await {
                    outcome = Err(e);
                    break;
                }
            }
            let _ = result.send(outcome);
        });
        ActorAction::Continue
    }

    pub(super) fn handle_worker_lost(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
    ) -> ActorAction {
        if let Some(worker) = self.state.workers.get_mut(&worker_id) {
            worker.active = false;
        }
        ActorAction::warn(format!("worker {worker_id} is lost"))
    }

    pub(super) fn handle_inspect_state(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ClusterSnapshot>,
    ) -> ActorAction {
        let mut workers: Vec<WorkerSnapshot> = self
            .state
            .workers
            .iter()
            .map(|(id, w)| WorkerSnapshot {
                id: *id,
                uuid: w.uuid,
                active: w.active,
                hostname: w.capabilities.hostname.clone(),
            })
            .collect();
        workers.sort_by_key(|w| u64::from(w.id));
        let _ = result.send(ClusterSnapshot {
            master_uuid: self.master_uuid,
            workers,
            job_count: self.state.jobs.len(),
        });
        ActorAction::Continue
    }

    pub(super) fn handle_shutdown(&mut self, _ctx: &mut ActorContext<Self>) -> ActorAction {
        ActorAction::Stop
    }
}
