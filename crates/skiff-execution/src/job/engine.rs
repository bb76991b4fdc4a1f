use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;

use crate::driver::DriverClient;
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{JobId, NodeUuid};
use crate::job::{AppContext, JobState};
use crate::shuffle::{Partitioner, ShuffleExchange};
use crate::stream::StreamName;
use crate::task::{record_key, ActionOp, Record, ReduceFn, StageOp};
use crate::worker::CacheKey;

/// Everything one stage-pipeline run needs, captured at start time so
/// the run can proceed without touching worker actor state.
pub struct RunParams {
    pub job_id: JobId,
    pub stages: Vec<StageOp>,
    pub action: ActionOp,
    pub partitioner: Partitioner,
    pub input: Vec<Record>,
    pub context: AppContext,
    pub exchange: Arc<ShuffleExchange>,
    pub driver: DriverClient,
    pub shuffle_timeout: Duration,
    pub chunk_size: usize,
    pub read_cache: Option<CacheKey>,
    pub publish_cache: Option<CacheKey>,
    pub state: watch::Sender<JobState>,
}

/// Runs this worker's share of a job to completion. Every worker in
/// the assignment runs the same pipeline over its own input share;
/// actions that need co-located keys go through a shuffle first.
pub async fn run(params: RunParams) -> ExecutionResult<()> {
    let RunParams {
        job_id,
        stages,
        action,
        partitioner,
        input,
        context,
        exchange,
        driver,
        shuffle_timeout,
        chunk_size,
        read_cache,
        publish_cache,
        state,
    } = params;
    let from = context.self_worker().uuid;

    let input = match read_cache {
        Some(key) => context.cache.get(&key).ok_or_else(|| {
            ExecutionError::InvalidJob(format!("cache miss for key {key} in job {job_id}"))
        })?.as_ref().clone(),
        None => input,
    };

    let mut records = stages
        .iter()
        .fold(input, |records, stage| stage.apply(records));
    debug!("job {job_id} produced {} records after {} stages", records.len(), stages.len());

    if let Some(key) = publish_cache {
        let slot = context.cache.writer(key.clone()).ok_or_else(|| {
            ExecutionError::InvalidJob(format!("cache key {key} is already claimed"))
        })?;
        slot.publish(records.clone());
    }

    if action.needs_shuffle() {
        set_state(&state, JobState::Shuffling)?;
        let stream = StreamName::new(format!("shuffle-{job_id}-0"));
        scatter(&context, job_id, &partitioner, &stream, records, chunk_size).await?;
        records = exchange.wait(&stream, shuffle_timeout).await?;
        set_state(&state, JobState::Running)?;
    }

    let last_line = records.last().cloned();
    match action {
        ActionOp::Collect => {
            stream_chunks(&driver, job_id, from, records, chunk_size).await?;
        }
        ActionOp::Lookup { key } => {
            let matched: Vec<Record> = records
                .into_iter()
                .filter(|r| record_key(r) == key)
                .collect();
            stream_chunks(&driver, job_id, from, matched, chunk_size).await?;
        }
        ActionOp::Reduce { ref f, ref seed } => {
            let partial = fold_partial(f, seed.len(), &records);
            driver
                .stream_result(job_id, from, Some(vec![partial]))
                .await?;
        }
    }
    driver.stream_result(job_id, from, None).await?;
    driver.report_last_line(job_id, from, last_line).await?;
    driver.report_action(job_id, from).await?;
    set_state(&state, JobState::Completed)?;
    Ok(())
}

/// Folds this worker's records into a partial accumulator starting from
/// the function's identity. The user seed is applied once, when the
/// coordinator combines the partials.
fn fold_partial(f: &ReduceFn, width: usize, records: &[Record]) -> Record {
    records
        .iter()
        .fold(f.identity(width), |acc, r| f.apply(acc, r))
}

/// Sends every record to its destination worker, followed by one end
/// of stream sentinel per peer. The local share goes through the same
/// path as remote ones.
async fn scatter(
    context: &AppContext,
    job_id: JobId,
    partitioner: &Partitioner,
    stream: &StreamName,
    records: Vec<Record>,
    chunk_size: usize,
) -> ExecutionResult<()> {
    let from = context.self_worker().uuid;
    let mut buckets: Vec<Vec<Record>> = vec![vec![]; context.workers.len()];
    for record in records {
        buckets[partitioner.partition(record_key(&record))].push(record);
    }
    for (worker, bucket) in context.workers.iter().zip(buckets) {
        for chunk in bucket.chunks(chunk_size.max(1)) {
            worker
                .client
                .shuffle(job_id, stream.clone(), from, Some(chunk.to_vec()))
                .await?;
        }
        worker.client.shuffle(job_id, stream.clone(), from, None).await?;
    }
    Ok(())
}

async fn stream_chunks(
    driver: &DriverClient,
    job_id: JobId,
    from: NodeUuid,
    records: Vec<Record>,
    chunk_size: usize,
) -> ExecutionResult<()> {
    for chunk in records.chunks(chunk_size.max(1)) {
        driver
            .stream_result(job_id, from, Some(chunk.to_vec()))
            .await?;
    }
    Ok(())
}

fn set_state(state: &watch::Sender<JobState>, next: JobState) -> ExecutionResult<()> {
    let current = *state.borrow();
    if !current.can_transition_to(next) {
        return Err(ExecutionError::InternalError(format!(
            "invalid job state transition from {current:?} to {next:?}"
        )));
    }
    state.send_replace(next);
    Ok(())
}
