use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use skiff_server::actor::ActorHandle;
use tokio::sync::{oneshot, Mutex};

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::SlotId;
use crate::supervisor::{RestartPolicy, WorkerLaunchOptions, WorkerManager};
use crate::worker::{WorkerActor, WorkerClient, WorkerOptions};

struct LocalWorkerEntry {
    handle: ActorHandle<WorkerActor>,
    stopping: Arc<AtomicBool>,
}

/// Runs workers as actors inside the coordinator process. Each slot is
/// supervised by its own task that relaunches the actor when it stops,
/// so a crashed worker comes back and re-registers with a fresh
/// identity.
pub struct LocalWorkerManager {
    restart_policy: RestartPolicy,
    workers: Arc<Mutex<HashMap<SlotId, LocalWorkerEntry>>>,
}

impl LocalWorkerManager {
    pub fn new(restart_policy: RestartPolicy) -> Self {
        Self {
            restart_policy,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl WorkerManager for LocalWorkerManager {
    async fn launch_worker(
        &self,
        slot: SlotId,
        options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        let driver = options.driver.clone().ok_or_else(|| {
            ExecutionError::InternalError(
                "local workers need an in-process coordinator handle".to_string(),
            )
        })?;
        let stopping = Arc::new(AtomicBool::new(false));
        let workers = Arc::clone(&self.workers);
        let policy = self.restart_policy.clone();
        tokio::spawn(async move {
            loop {
                let (exit_tx, exit_rx) = oneshot::channel();
                let worker_options =
                    WorkerOptions::from_launch(slot, driver.clone(), &options, exit_tx);
                let handle = ActorHandle::<WorkerActor>::new(worker_options);
                workers.lock().await.insert(
                    slot,
                    LocalWorkerEntry {
                        handle: handle.clone(),
                        stopping: Arc::clone(&stopping),
                    },
                );
                handle.wait_for_stop().await;
                let code = exit_rx
                    .await
                    .ok()
                    .map(|reason| reason.exit_code(options.fatal_exit_code));
                if stopping.load(Ordering::SeqCst) || !policy.should_restart(code) {
                    break;
                }
                info!("relaunching worker slot {slot} after exit code {code:?}");
            }
            workers.lock().await.remove(&slot);
        });
        Ok(())
    }

    async fn stop_worker(&self, slot: SlotId) -> ExecutionResult<()> {
        let entry = {
            let workers = self.workers.lock().await;
            workers
                .get(&slot)
                .map(|e| (e.handle.clone(), Arc::clone(&e.stopping)))
        };
        if let Some((handle, stopping)) = entry {
            stopping.store(true, Ordering::SeqCst);
            WorkerClient::new(handle).shutdown().await?;
        }
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        let slots: Vec<SlotId> = self.workers.lock().await.keys().copied().collect();
        for slot in slots {
            self.stop_worker(slot).await?;
        }
        Ok(())
    }
}
