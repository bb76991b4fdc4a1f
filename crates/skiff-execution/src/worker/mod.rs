mod actor;
mod cache;
mod client;
mod entrypoint;
mod event;
mod options;

pub use actor::WorkerActor;
pub use cache::{CacheKey, CacheSlot, SharedCache};
pub use client::WorkerClient;
pub use entrypoint::run_worker;
pub use event::{WorkerEvent, WorkerRequest};
pub use options::WorkerOptions;

use crate::driver::WorkerCapabilities;

/// Why a worker actor stopped. The supervisor uses the derived exit
/// code to decide whether the slot should be relaunched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A deliberate shutdown; the slot must not be relaunched.
    Shutdown,
    TransportError,
    /// An administrative reset; the slot comes back fresh.
    Reset,
}

impl ExitReason {
    pub fn exit_code(&self, fatal_exit_code: i32) -> i32 {
        match self {
            ExitReason::Shutdown => fatal_exit_code,
            ExitReason::TransportError => 1,
            ExitReason::Reset => 0,
        }
    }
}

/// Probes the host the worker runs on. Reported to the coordinator at
/// registration.
pub fn probe_capabilities() -> WorkerCapabilities {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.refresh_cpu_all();
    WorkerCapabilities {
        cpu_count: system.cpus().len(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        memory_used: system.used_memory(),
        memory_total: system.total_memory(),
        hostname: sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string()),
        role: "worker".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitReason::Shutdown.exit_code(2), 2);
        assert_eq!(ExitReason::TransportError.exit_code(2), 1);
        assert_eq!(ExitReason::Reset.exit_code(2), 0);
    }

    #[test]
    fn test_probed_capabilities_are_plausible() {
        let capabilities = probe_capabilities();
        assert!(capabilities.cpu_count > 0);
        assert!(capabilities.memory_total > 0);
        assert_eq!(capabilities.role, "worker");
    }
}
