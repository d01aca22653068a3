//! Tokio runtime for the emulator.
//!
//! Multi-threaded work-stealing scheduler with named workers. With CPU
//! pinning enabled, worker `n` is pinned to the `n`-th core reported by the
//! OS; workers beyond the core count stay unpinned.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use crate::config::EmulatorConfig;

static WORKER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads
    pub worker_threads: usize,
    /// Maximum blocking threads (default: 4)
    pub max_blocking_threads: usize,
    /// Pin workers to CPU cores
    pub enable_cpu_pinning: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let config = EmulatorConfig::default();
        Self::from(&config)
    }
}

impl From<&EmulatorConfig> for RuntimeConfig {
    fn from(config: &EmulatorConfig) -> Self {
        Self {
            worker_threads: config.worker_threads,
            max_blocking_threads: 4,
            enable_cpu_pinning: config.cpu_pinning,
        }
    }
}

/// Build the emulator runtime.
pub fn build_runtime(config: RuntimeConfig) -> std::io::Result<Runtime> {
    let core_ids = if config.enable_cpu_pinning {
        core_affinity::get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };

    info!(
        worker_threads = config.worker_threads,
        blocking_threads = config.max_blocking_threads,
        pinned_cores = core_ids.len(),
        "Building emulator runtime"
    );

    Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .max_blocking_threads(config.max_blocking_threads)
        .enable_all()
        .thread_name("simfaas-worker")
        .on_thread_start(move || {
            let worker_id = WORKER_COUNTER.fetch_add(1, Ordering::Relaxed);
            let Some(core_id) = core_ids.get(worker_id).copied() else {
                return;
            };
            if core_affinity::set_for_current(core_id) {
                debug!(worker_id, core_id = core_id.id, "Worker pinned");
            } else {
                warn!(worker_id, core_id = core_id.id, "Failed to pin worker");
            }
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_emulator_config() {
        let emulator = EmulatorConfig {
            worker_threads: 3,
            cpu_pinning: false,
            ..Default::default()
        };
        let config = RuntimeConfig::from(&emulator);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_blocking_threads, 4);
        assert!(!config.enable_cpu_pinning);
    }

    #[test]
    fn test_runtime_builds() {
        let config = RuntimeConfig {
            worker_threads: 2,
            max_blocking_threads: 1,
            enable_cpu_pinning: false,
        };
        let rt = build_runtime(config).expect("runtime should build");
        rt.block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        });
    }
}
