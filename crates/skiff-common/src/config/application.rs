use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub deployment: DeploymentKind,
    pub cluster: ClusterConfig,
    pub worker: WorkerConfig,
    pub rpc: RpcConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        let config: AppConfig = Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("SKIFF__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))?;
        debug!(
            "loaded configuration for {:?} deployment with {} worker(s)",
            config.deployment, config.cluster.worker_count
        );
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentKind {
    /// Workers run as actors inside the coordinator process.
    Local,
    /// Workers run as supervised operating-system processes.
    ProcessCluster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub worker_count: usize,
    pub coordinator_host: String,
    pub coordinator_port: u16,
    /// When set, worker processes are launched with verbose logging.
    pub debug: bool,
    /// When set, administrative reset clears worker state instead of
    /// terminating the worker process.
    pub test_mode: bool,
    /// The reserved exit code that tells the supervisor not to restart
    /// a worker slot.
    pub fatal_exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How many records go into one streamed result chunk.
    pub stream_chunk_size: usize,
    pub shuffle_timeout_secs: u64,
    /// The program and arguments used to launch one worker process
    /// in the process-cluster deployment.
    pub program: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RetryStrategy {
    Fixed(FixedRetryStrategy),
    ExponentialBackoff(ExponentialBackoffRetryStrategy),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedRetryStrategy {
    pub max_count: usize,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoffRetryStrategy {
    pub max_count: usize,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub factor: u32,
}
