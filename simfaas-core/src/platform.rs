//! The contract between the orchestrator and the simulation engine.
//!
//! The orchestrator never models deployment, scaling or timing itself. It
//! only registers functions, looks them up, asks for deploys and runs
//! invocations through the [`Platform`] trait. [`crate::sim::SimPlatform`]
//! is the in-process implementation shipped with the binary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Boxed future returned by asynchronous platform operations.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Builds the configuration for a function that was never declared.
pub type FunctionFactory = Arc<dyn Fn(&str) -> FunctionConfig + Send + Sync>;

/// Simulation parameters of a function.
///
/// Opaque to the orchestrator, which only hands it to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Execution time of one invocation
    pub runtime: Duration,
    /// Extra latency paid by an invocation or deploy on a cold instance
    pub cold_start: Duration,
    /// How long an instance stays warm after its last use
    pub keep_warm: Duration,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            runtime: Duration::from_millis(100),
            cold_start: Duration::from_millis(500),
            keep_warm: Duration::from_secs(60),
        }
    }
}

/// A function known to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    pub config: FunctionConfig,
}

/// Result of one simulated invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Name of the invoked function
    pub function: String,
    /// Whether the invocation paid a cold start
    pub cold_start: bool,
    /// Start of the invocation, microseconds since the unix epoch
    pub started_at: u64,
    /// End of the simulated execution, microseconds since the unix epoch
    pub finished_at: u64,
    /// Simulated execution time in seconds, cold start excluded
    pub duration: f64,
    /// Response payload
    pub response: String,
}

/// Operations the orchestrator needs from a simulation engine.
///
/// Implementations must be safe to call from many request tasks at once.
pub trait Platform: Send + Sync + 'static {
    /// Look up a function by name.
    fn get(&self, name: &str) -> Option<FunctionInfo>;

    /// Register `name` with `factory(name)` unless it already exists.
    ///
    /// Check and insert happen atomically: under concurrent first use the
    /// factory runs at most once per name. Returns `true` if this call
    /// registered the function.
    fn define_if_absent(&self, name: &str, factory: &(dyn Fn(&str) -> FunctionConfig + Send + Sync)) -> Result<bool>;

    /// Deploy (pre-warm) an instance of `name`.
    fn deploy<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, ()>;

    /// Run one invocation of `name`.
    ///
    /// `runtime` replaces the configured execution time when set.
    fn run<'a>(&'a self, name: &'a str, runtime: Option<Duration>) -> PlatformFuture<'a, ExecutionReport>;

    /// Start background machinery, if any.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop accepting work.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A factory handing out the same configuration for every name.
pub fn fixed_factory(config: FunctionConfig) -> FunctionFactory {
    Arc::new(move |_name: &str| config.clone())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording platform used by orchestrator and handler tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::{mpsc, Notify};

    use super::*;
    use crate::error::SimfaasError;

    /// Platform that records every call and answers from a plain map.
    #[derive(Default)]
    pub struct RecordingPlatform {
        pub functions: Mutex<HashMap<String, FunctionConfig>>,
        pub defines: AtomicUsize,
        pub runs: Mutex<Vec<(String, Option<Duration>)>>,
        pub fail_runs: bool,
        /// When set, deploys park until notified.
        pub deploy_gate: Option<Arc<Notify>>,
        pub deployed: Mutex<Option<mpsc::UnboundedSender<String>>>,
    }

    impl RecordingPlatform {
        pub fn with_function(self, name: &str) -> Self {
            self.functions
                .lock()
                .insert(name.to_owned(), FunctionConfig::default());
            self
        }

        pub fn define_count(&self) -> usize {
            self.defines.load(Ordering::SeqCst)
        }
    }

    impl Platform for RecordingPlatform {
        fn get(&self, name: &str) -> Option<FunctionInfo> {
            self.functions.lock().get(name).map(|config| FunctionInfo {
                name: name.to_owned(),
                config: config.clone(),
            })
        }

        fn define_if_absent(
            &self,
            name: &str,
            factory: &(dyn Fn(&str) -> FunctionConfig + Send + Sync),
        ) -> Result<bool> {
            let mut functions = self.functions.lock();
            if functions.contains_key(name) {
                return Ok(false);
            }
            self.defines.fetch_add(1, Ordering::SeqCst);
            functions.insert(name.to_owned(), factory(name));
            Ok(true)
        }

        fn deploy<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, ()> {
            Box::pin(async move {
                if let Some(gate) = &self.deploy_gate {
                    gate.notified().await;
                }
                if let Some(tx) = self.deployed.lock().as_ref() {
                    let _ = tx.send(name.to_owned());
                }
                Ok(())
            })
        }

        fn run<'a>(&'a self, name: &'a str, runtime: Option<Duration>) -> PlatformFuture<'a, ExecutionReport> {
            Box::pin(async move {
                self.runs.lock().push((name.to_owned(), runtime));
                if self.fail_runs {
                    return Err(SimfaasError::Platform("simulated failure".into()));
                }
                if !self.functions.lock().contains_key(name) {
                    return Err(SimfaasError::FunctionNotFound);
                }
                Ok(ExecutionReport {
                    function: name.to_owned(),
                    cold_start: false,
                    started_at: 1,
                    finished_at: 2,
                    duration: runtime.map(|d| d.as_secs_f64()).unwrap_or(0.1),
                    response: "platform response".to_owned(),
                })
            })
        }
    }
}
