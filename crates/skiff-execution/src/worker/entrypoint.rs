use skiff_server::actor::ActorSystem;
use tokio::sync::oneshot;

use crate::worker::{WorkerActor, WorkerOptions};

/// Runs one worker to completion and maps its exit reason to a process
/// exit code. The supervisor interprets `fatal_exit_code` as "do not
/// relaunch this slot".
pub async fn run_worker(mut options: WorkerOptions, fatal_exit_code: i32) -> i32 {
    let (exit_tx, exit_rx) = oneshot::channel();
    options.exit_signal = Some(exit_tx);
    let mut system = ActorSystem::new();
    let _handle = system.spawn::<WorkerActor>(options);
    system.join().await;
    match exit_rx.await {
        Ok(reason) => reason.exit_code(fatal_exit_code),
        Err(_) => 1,
    }
}
