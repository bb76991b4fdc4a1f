use async_trait::async_trait;
use skiff_server::actor::{ActorHandle, ActorSystem};
use tokio::sync::oneshot;

use crate::driver::{DriverActor, DriverClient, DriverEvent, DriverOptions};
use crate::error::{ExecutionError, ExecutionResult};
use crate::stream::ResultSource;
use crate::task::JobSpec;

/// The entry point for running jobs on a cluster.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn execute(&self, spec: JobSpec) -> ExecutionResult<ResultSource>;

    async fn stop(&self);
}

/// Runs jobs through an in-process coordinator that owns the worker
/// pool.
pub struct ClusterJobRunner {
    driver: ActorHandle<DriverActor>,
}

impl ClusterJobRunner {
    pub fn new(system: &mut ActorSystem, options: DriverOptions) -> Self {
        let driver = system.spawn(options);
        Self { driver }
    }

    pub fn driver(&self) -> DriverClient {
        DriverClient::new(self.driver.clone())
    }
}

#[async_trait]
impl JobRunner for ClusterJobRunner {
    async fn execute(&self, spec: JobSpec) -> ExecutionResult<ResultSource> {
        let (tx, rx) = oneshot::channel();
        self.driver
            .send(DriverEvent::ExecuteJob { spec, result: tx })
            .await?;
        rx.await.map_err(|e| {
            ExecutionError::InternalError(format!("failed to create job stream: {e}"))
        })?
    }

    async fn stop(&self) {
        let _ = self.driver.send(DriverEvent::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use skiff_server::RetryStrategy;

    use super::*;
    use crate::id::{JobId, SlotId};
    use crate::job::{JobAssignment, JobState, JobWorker};
    use crate::rpc::ClientOptions;
    use crate::shuffle::Partitioner;
    use crate::stream::StreamName;
    use crate::task::{ActionOp, FlatMapFn, MapFn, Record, ReduceFn, StageOp};
    use crate::worker::{run_worker, CacheKey, WorkerActor, WorkerClient, WorkerOptions};

    fn runner(worker_count: usize) -> (ActorSystem, ClusterJobRunner) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut system = ActorSystem::new();
        let runner = ClusterJobRunner::new(&mut system, DriverOptions::local(worker_count));
        (system, runner)
    }

    fn sorted(mut records: Vec<Record>) -> Vec<Record> {
        records.sort_by(|a, b| a[0].total_cmp(&b[0]));
        records
    }

    #[tokio::test]
    async fn test_scaled_collect_across_workers() {
        let (_system, runner) = runner(2);
        let rows = vec![
            vec![1.0, 2.0],
            vec![2.0, 3.0],
            vec![3.0, 4.0],
            vec![4.0, 5.0],
        ];
        let spec = JobSpec::new(
            rows,
            vec![StageOp::Map(MapFn::Scale(2.0))],
            ActionOp::Collect,
        );
        let source = runner.execute(spec).await.unwrap();
        let out = sorted(source.collect().await.unwrap());
        assert_eq!(
            out,
            vec![
                vec![2.0, 4.0],
                vec![4.0, 6.0],
                vec![6.0, 8.0],
                vec![8.0, 10.0],
            ]
        );
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_lookup_finds_rows_after_negation() {
        let (_system, runner) = runner(2);
        let rows = vec![
            vec![1.0, 2.0],
            vec![3.0, 4.0],
            vec![5.0, 6.0],
            vec![7.0, 8.0],
            vec![9.0, 10.0],
        ];
        let spec = JobSpec::new(
            rows,
            vec![StageOp::Map(MapFn::Negate)],
            ActionOp::Lookup { key: -1.0 },
        );
        let source = runner.execute(spec).await.unwrap();
        let out = source.collect().await.unwrap();
        assert_eq!(out, vec![vec![-1.0, -2.0]]);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_reduce_applies_seed_once() {
        let (_system, runner) = runner(2);
        let rows = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ];
        let spec = JobSpec::new(
            rows,
            vec![StageOp::FlatMap(FlatMapFn::Duplicate(2))],
            ActionOp::Reduce {
                f: ReduceFn::ElementWiseSum,
                seed: vec![10.0, 10.0, 10.0],
            },
        );
        let source = runner.execute(spec).await.unwrap();
        let out = source.collect().await.unwrap();
        // Every row counted twice, the seed exactly once.
        assert_eq!(out, vec![vec![34.0, 40.0, 46.0]]);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_partitioner_is_rejected() {
        let (_system, runner) = runner(2);
        let mut spec = JobSpec::new(vec![vec![1.0]], vec![], ActionOp::Lookup { key: 1.0 });
        spec.partitioner = Some(Partitioner::Hash { partitions: 5 });
        let out = runner.execute(spec).await;
        assert!(matches!(out, Err(ExecutionError::InvalidJob(_))));
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_cached_dataset_feeds_later_jobs() {
        let (_system, runner) = runner(2);
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];

        let mut publish = JobSpec::new(rows.clone(), vec![], ActionOp::Collect);
        publish.publish_cache = Some(CacheKey::new("base"));
        let source = runner.execute(publish).await.unwrap();
        assert_eq!(source.collect().await.unwrap().len(), rows.len());

        let mut read = JobSpec::new(
            vec![],
            vec![StageOp::Map(MapFn::Negate)],
            ActionOp::Collect,
        );
        read.read_cache = Some(CacheKey::new("base"));
        let source = runner.execute(read.clone()).await.unwrap();
        let out = sorted(source.collect().await.unwrap());
        assert_eq!(
            out,
            vec![vec![-5.0, -6.0], vec![-3.0, -4.0], vec![-1.0, -2.0]]
        );

        // After a reset the cached dataset is gone and the read fails.
        runner.driver().reset_workers().await.unwrap();
        let source = runner.execute(read).await.unwrap();
        assert!(source.collect().await.is_err());
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_crashed_worker_slot_reregisters() {
        let mut system = ActorSystem::new();
        let mut options = DriverOptions::local(1);
        // Outside test mode a reset terminates the worker, so the
        // supervisor has to bring the slot back.
        options.test_mode = false;
        let runner = ClusterJobRunner::new(&mut system, options);
        let driver = runner.driver();

        let spec = JobSpec::new(vec![vec![1.0]], vec![], ActionOp::Collect);
        let source = runner.execute(spec).await.unwrap();
        assert_eq!(source.collect().await.unwrap(), vec![vec![1.0]]);

        driver.reset_workers().await.unwrap();
        let mut registrations = 0;
        for _ in 0..100 {
            let snapshot = driver.inspect_state().await.unwrap();
            registrations = snapshot.workers.len();
            if registrations >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registrations >= 2, "replacement worker never registered");
        runner.stop().await;
    }

    /// Spawns worker actors by hand against a coordinator that manages
    /// no slots of its own, so tests can drive individual workers.
    async fn manual_cluster(
        count: usize,
        shuffle_timeout: Duration,
    ) -> (DriverClient, Vec<WorkerClient>, Vec<JobWorker>) {
        let mut system = ActorSystem::new();
        let runner = ClusterJobRunner::new(&mut system, DriverOptions::local(0));
        let driver = runner.driver();
        let mut clients = vec![];
        for i in 0..count {
            let options = WorkerOptions {
                slot: SlotId::from(100 + i as u64),
                driver: driver.clone(),
                coordinator: ClientOptions {
                    host: "127.0.0.1".to_string(),
                    port: 12346,
                },
                test_mode: true,
                stream_chunk_size: 64,
                shuffle_timeout,
                retry: RetryStrategy::Fixed {
                    max_count: 10,
                    delay: Duration::from_millis(20),
                },
                exit_signal: None,
            };
            let handle = ActorHandle::<WorkerActor>::new(options);
            clients.push(WorkerClient::new(handle));
            // Wait for the registration so worker ids follow spawn order.
            for _ in 0..100 {
                if driver.inspect_state().await.unwrap().workers.len() > i {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        let snapshot = driver.inspect_state().await.unwrap();
        assert_eq!(snapshot.workers.len(), count);
        let workers: Vec<JobWorker> = snapshot
            .workers
            .iter()
            .zip(&clients)
            .map(|(w, client)| JobWorker {
                id: w.id,
                uuid: w.uuid,
                host: w.hostname.clone(),
                client: client.clone(),
            })
            .collect();
        (driver, clients, workers)
    }

    #[tokio::test]
    async fn test_named_stream_acks_sentinel_and_rejects_late_data() {
        let (_driver, clients, _workers) = manual_cluster(1, Duration::from_secs(1)).await;
        let name = StreamName::new("results-7");
        let mut source = clients[0].create_local_stream(name.clone()).await.unwrap();

        clients[0]
            .stream(name.clone(), Some(vec![vec![1.0, 2.0]]))
            .await
            .unwrap();
        clients[0]
            .stream(name.clone(), Some(vec![vec![3.0, 4.0]]))
            .await
            .unwrap();
        clients[0].stream(name.clone(), None).await.unwrap();

        assert_eq!(source.next().await.unwrap(), Some(vec![vec![1.0, 2.0]]));
        assert_eq!(source.next().await.unwrap(), Some(vec![vec![3.0, 4.0]]));
        assert_eq!(source.next().await.unwrap(), None);

        // The sentinel closed the stream, so later chunks are rejected.
        let out = clients[0].stream(name, Some(vec![vec![5.0]])).await;
        assert!(matches!(out, Err(ExecutionError::InvalidJob(_))));
    }

    #[tokio::test]
    async fn test_run_worker_exits_cleanly_on_reset() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut system = ActorSystem::new();
        let runner = ClusterJobRunner::new(&mut system, DriverOptions::local(0));
        let driver = runner.driver();
        let options = WorkerOptions {
            slot: SlotId::from(200),
            driver: driver.clone(),
            coordinator: ClientOptions {
                host: "127.0.0.1".to_string(),
                port: 12346,
            },
            // Outside test mode a reset stops the worker instead of
            // clearing its state.
            test_mode: false,
            stream_chunk_size: 64,
            shuffle_timeout: Duration::from_secs(1),
            retry: RetryStrategy::Fixed {
                max_count: 10,
                delay: Duration::from_millis(20),
            },
            exit_signal: None,
        };
        let worker = tokio::spawn(run_worker(options, 2));
        for _ in 0..100 {
            if driver.inspect_state().await.unwrap().workers.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        driver.reset_workers().await.unwrap();
        assert_eq!(worker.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_worker_rejects_assignment_it_is_not_part_of() {
        let (_driver, clients, workers) = manual_cluster(2, Duration::from_secs(1)).await;
        let job_id = JobId::from(7);
        let assignment = JobAssignment {
            job_id,
            master_uuid: crate::id::NodeUuid::random(),
            workers: vec![workers[0].clone()],
            stages: vec![],
            action: ActionOp::Collect,
            partitioner: Partitioner::Hash { partitions: 1 },
            input: vec![vec![vec![1.0, 2.0]]],
            read_cache: None,
            publish_cache: None,
        };
        assert!(clients[0].set_job(assignment.clone()).await.is_ok());
        assert_eq!(
            clients[0].job_state(job_id).await.unwrap(),
            Some(JobState::Ready)
        );

        let out = clients[1].set_job(assignment).await;
        assert!(matches!(out, Err(ExecutionError::InvalidJob(_))));
        // Rejection must leave no job state behind.
        assert_eq!(clients[1].job_state(job_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stalled_shuffle_times_out() {
        let (_driver, clients, workers) = manual_cluster(2, Duration::from_millis(300)).await;
        let job_id = JobId::from(9);
        let assignment = JobAssignment {
            job_id,
            master_uuid: crate::id::NodeUuid::random(),
            workers: workers.clone(),
            stages: vec![],
            action: ActionOp::Lookup { key: 1.0 },
            partitioner: Partitioner::Hash { partitions: 2 },
            input: vec![vec![vec![1.0, 2.0]], vec![vec![2.0, 3.0]]],
            read_cache: None,
            publish_cache: None,
        };
        clients[0].set_job(assignment.clone()).await.unwrap();
        clients[1].set_job(assignment).await.unwrap();
        // Only the first worker starts, so its shuffle barrier can
        // never be crossed.
        clients[0].run_job(job_id).await.unwrap();

        let mut saw_shuffling = false;
        let mut finished = false;
        for _ in 0..200 {
            match clients[0].job_state(job_id).await.unwrap() {
                Some(JobState::Shuffling) => saw_shuffling = true,
                None => {
                    finished = true;
                    break;
                }
                _ => {}
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_shuffling, "job never reached the shuffle barrier");
        assert!(finished, "stalled job never failed");
    }
}
