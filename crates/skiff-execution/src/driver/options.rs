use std::time::Duration;

use skiff_common::config::{AppConfig, DeploymentKind};
use skiff_server::RetryStrategy;

use crate::rpc::ClientOptions;
use crate::supervisor::RestartPolicy;

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub deployment: DeploymentKind,
    pub worker_count: usize,
    pub coordinator: ClientOptions,
    pub debug: bool,
    pub test_mode: bool,
    pub stream_chunk_size: usize,
    pub shuffle_timeout: Duration,
    pub rpc_retry_strategy: RetryStrategy,
    pub worker_program: String,
    pub worker_arguments: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub fatal_exit_code: i32,
}

impl DriverOptions {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            deployment: config.deployment.clone(),
            worker_count: config.cluster.worker_count,
            coordinator: ClientOptions {
                host: config.cluster.coordinator_host.clone(),
                port: config.cluster.coordinator_port,
            },
            debug: config.cluster.debug,
            test_mode: config.cluster.test_mode,
            stream_chunk_size: config.worker.stream_chunk_size,
            shuffle_timeout: Duration::from_secs(config.worker.shuffle_timeout_secs),
            rpc_retry_strategy: (&config.rpc.retry_strategy).into(),
            worker_program: config.worker.program.clone(),
            worker_arguments: config.worker.arguments.clone(),
            restart_policy: RestartPolicy::UnlessFatal(config.cluster.fatal_exit_code),
            fatal_exit_code: config.cluster.fatal_exit_code,
        }
    }

    /// Options for an in-process cluster with short timeouts, suitable
    /// for tests.
    pub fn local(worker_count: usize) -> Self {
        Self {
            deployment: DeploymentKind::Local,
            worker_count,
            coordinator: ClientOptions {
                host: "127.0.0.1".to_string(),
                port: 12346,
            },
            debug: false,
            test_mode: true,
            stream_chunk_size: 64,
            shuffle_timeout: Duration::from_secs(5),
            rpc_retry_strategy: RetryStrategy::Fixed {
                max_count: 10,
                delay: Duration::from_millis(20),
            },
            worker_program: String::new(),
            worker_arguments: vec![],
            restart_policy: RestartPolicy::UnlessFatal(2),
            fatal_exit_code: 2,
        }
    }
}
