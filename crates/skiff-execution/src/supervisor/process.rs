use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use tokio::process::Command;
use tokio::sync::{watch, Mutex};

use crate::error::ExecutionResult;
use crate::id::SlotId;
use crate::supervisor::{RestartPolicy, WorkerLaunchOptions, WorkerManager};

const RESTART_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ProcessWorkerOptions {
    pub program: String,
    pub arguments: Vec<String>,
    pub restart_policy: RestartPolicy,
    /// Launch worker processes with verbose logging.
    pub debug: bool,
}

struct ProcessEntry {
    stop: watch::Sender<bool>,
}

/// Runs workers as supervised operating-system processes. Each slot is
/// monitored by a task that relaunches the process when it exits,
/// unless the exit code tells the restart policy otherwise.
pub struct ProcessWorkerManager {
    options: ProcessWorkerOptions,
    state: Arc<Mutex<HashMap<SlotId, ProcessEntry>>>,
    spawn_count: Arc<AtomicUsize>,
}

impl ProcessWorkerManager {
    pub fn new(options: ProcessWorkerOptions) -> Self {
        Self {
            options,
            state: Arc::new(Mutex::new(HashMap::new())),
            spawn_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Total number of processes launched across all slots.
    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerManager for ProcessWorkerManager {
    async fn launch_worker(
        &self,
        slot: SlotId,
        _options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.state
            .lock()
            .await
            .insert(slot, ProcessEntry { stop: stop_tx });
        let program = self.options.program.clone();
        let arguments = self.options.arguments.clone();
        let policy = self.options.restart_policy.clone();
        let debug = self.options.debug;
        let spawn_count = Arc::clone(&self.spawn_count);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                let mut command = Command::new(&program);
                command.args(&arguments);
                if debug {
                    command.env("RUST_LOG", "debug");
                }
                let mut child = match command.spawn() {
                    Ok(child) => child,
                    Err(e) => {
                        error!("failed to spawn worker process for slot {slot}: {e}");
                        break;
                    }
                };
                spawn_count.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    status = child.wait() => {
                        let code = status.ok().and_then(|s| s.code());
                        if *stop_rx.borrow() || !policy.should_restart(code) {
                            break;
                        }
                        debug!("worker process for slot {slot} exited with {code:?}; relaunching");
                        tokio::time::sleep(RESTART_DELAY).await;
                    }
                    _ = async { let _ = stop_rx.wait_for(|x| *x).await; } => {
                        let _ = child.kill().await;
                        break;
                    }
                }
            }
            state.lock().await.remove(&slot);
        });
        Ok(())
    }

    async fn stop_worker(&self, slot: SlotId) -> ExecutionResult<()> {
        if let Some(entry) = self.state.lock().await.get(&slot) {
            let _ = entry.stop.send(true);
        }
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        let state = self.state.lock().await;
        for entry in state.values() {
            let _ = entry.stop.send(true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use skiff_server::RetryStrategy;

    use super::*;
    use crate::rpc::ClientOptions;

    fn launch_options() -> WorkerLaunchOptions {
        WorkerLaunchOptions {
            driver: None,
            coordinator: ClientOptions {
                host: "127.0.0.1".to_string(),
                port: 12346,
            },
            test_mode: true,
            stream_chunk_size: 64,
            shuffle_timeout: Duration::from_secs(1),
            retry: RetryStrategy::Fixed {
                max_count: 1,
                delay: Duration::from_millis(10),
            },
            fatal_exit_code: 2,
        }
    }

    fn shell_manager(script: &str) -> ProcessWorkerManager {
        ProcessWorkerManager::new(ProcessWorkerOptions {
            program: "/bin/sh".to_string(),
            arguments: vec!["-c".to_string(), script.to_string()],
            restart_policy: RestartPolicy::UnlessFatal(2),
            debug: false,
        })
    }

    #[tokio::test]
    async fn test_crashing_process_is_relaunched() {
        let manager = shell_manager("exit 1");
        manager
            .launch_worker(SlotId::from(1), launch_options())
            .await
            .unwrap();
        for _ in 0..50 {
            if manager.spawn_count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(manager.spawn_count() >= 2);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_exit_code_stops_relaunching() {
        let manager = shell_manager("exit 2");
        manager
            .launch_worker(SlotId::from(1), launch_options())
            .await
            .unwrap();
        // Give the monitor enough time to relaunch if it were going to.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_debug_mode_sets_worker_log_level() {
        // The script exits with the fatal code only when it sees the
        // debug log level, so a single spawn means the env was passed.
        let manager = ProcessWorkerManager::new(ProcessWorkerOptions {
            program: "/bin/sh".to_string(),
            arguments: vec![
                "-c".to_string(),
                "[ \"$RUST_LOG\" = debug ] && exit 2; exit 1".to_string(),
            ],
            restart_policy: RestartPolicy::UnlessFatal(2),
            debug: true,
        });
        manager
            .launch_worker(SlotId::from(1), launch_options())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_terminates_long_running_process() {
        let manager = shell_manager("sleep 30");
        manager
            .launch_worker(SlotId::from(1), launch_options())
            .await
            .unwrap();
        for _ in 0..50 {
            if manager.spawn_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        manager.stop().await.unwrap();
        for _ in 0..50 {
            if manager.state.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(manager.state.lock().await.is_empty());
        assert_eq!(manager.spawn_count(), 1);
    }
}
