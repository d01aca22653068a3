//! In-process simulated platform.
//!
//! Functions live in a copy-on-write table behind an [`ArcSwap`]: lookups
//! happen on every request and never lock, registrations are rare and go
//! through a writer mutex so check-and-insert is atomic.
//!
//! Each function carries a small warm-state machine:
//!
//! ```text
//!   Cold ──deploy──▶ Deploying ──(cold start elapsed)──▶ Warm(until)
//!    ▲                                                     │
//!    └──────────────────(keep-warm expired)────────────────┘
//! ```
//!
//! Invocations on a cold instance pay the cold start before running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SimfaasError};
use crate::platform::{ExecutionReport, FunctionConfig, FunctionInfo, Platform, PlatformFuture};

#[derive(Debug, Clone, Copy, PartialEq)]
enum WarmState {
    Cold,
    Deploying,
    Warm { until: Instant },
}

struct SimFunction {
    config: FunctionConfig,
    state: Mutex<WarmState>,
}

impl SimFunction {
    fn new(config: FunctionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WarmState::Cold),
        }
    }

    /// Current state, with expired warm instances reported as cold.
    fn current_state(&self, now: Instant) -> WarmState {
        let mut state = self.state.lock();
        if let WarmState::Warm { until } = *state {
            if until <= now {
                *state = WarmState::Cold;
            }
        }
        *state
    }

    fn mark_warm(&self) {
        *self.state.lock() = WarmState::Warm {
            until: Instant::now() + self.config.keep_warm,
        };
    }
}

type FunctionTable = HashMap<String, Arc<SimFunction>>;

/// Simulated FaaS platform with cold starts and keep-warm windows.
pub struct SimPlatform {
    functions: ArcSwap<FunctionTable>,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl SimPlatform {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self {
            functions: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register or replace a function.
    pub fn define(&self, name: &str, config: FunctionConfig) {
        let _guard = self.write_lock.lock();
        let mut table = (*self.functions.load_full()).clone();
        table.insert(name.to_owned(), Arc::new(SimFunction::new(config)));
        self.functions.store(Arc::new(table));
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.load().len()
    }

    /// Check if no function is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.load().is_empty()
    }

    /// Check if `name` currently has a warm instance.
    pub fn is_warm(&self, name: &str) -> bool {
        self.lookup(name)
            .map(|f| matches!(f.current_state(Instant::now()), WarmState::Warm { .. }))
            .unwrap_or(false)
    }

    fn lookup(&self, name: &str) -> Option<Arc<SimFunction>> {
        self.functions.load().get(name).map(Arc::clone)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SimfaasError::Platform("platform is closed".into()));
        }
        Ok(())
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn get(&self, name: &str) -> Option<FunctionInfo> {
        self.lookup(name).map(|f| FunctionInfo {
            name: name.to_owned(),
            config: f.config.clone(),
        })
    }

    fn define_if_absent(
        &self,
        name: &str,
        factory: &(dyn Fn(&str) -> FunctionConfig + Send + Sync),
    ) -> Result<bool> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock();
        let current = self.functions.load_full();
        if current.contains_key(name) {
            return Ok(false);
        }

        let config = factory(name);
        info!(function = name, config = ?config, "Defined function");

        let mut table = (*current).clone();
        table.insert(name.to_owned(), Arc::new(SimFunction::new(config)));
        self.functions.store(Arc::new(table));
        Ok(true)
    }

    fn deploy<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let function = self.lookup(name).ok_or(SimfaasError::FunctionNotFound)?;

            let claimed = {
                let now = Instant::now();
                let mut state = function.state.lock();
                match *state {
                    WarmState::Deploying => false,
                    WarmState::Warm { until } if until > now => {
                        *state = WarmState::Warm {
                            until: now + function.config.keep_warm,
                        };
                        false
                    }
                    _ => {
                        *state = WarmState::Deploying;
                        true
                    }
                }
            };

            if !claimed {
                debug!(function = name, "Deploy skipped, instance warm or deploying");
                return Ok(());
            }

            tokio::time::sleep(function.config.cold_start).await;
            function.mark_warm();
            debug!(function = name, "Instance deployed");
            Ok(())
        })
    }

    fn run<'a>(&'a self, name: &'a str, runtime: Option<Duration>) -> PlatformFuture<'a, ExecutionReport> {
        Box::pin(async move {
            self.ensure_open()?;
            let function = self.lookup(name).ok_or(SimfaasError::FunctionNotFound)?;

            let started_at = unix_micros();
            let cold_start = !matches!(
                function.current_state(Instant::now()),
                WarmState::Warm { .. }
            );
            if cold_start {
                tokio::time::sleep(function.config.cold_start).await;
            }

            let runtime = runtime.unwrap_or(function.config.runtime);
            tokio::time::sleep(runtime).await;
            function.mark_warm();

            Ok(ExecutionReport {
                function: name.to_owned(),
                cold_start,
                started_at,
                finished_at: unix_micros(),
                duration: runtime.as_secs_f64(),
                response: String::new(),
            })
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        info!("Simulated platform closed");
        Ok(())
    }
}

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn quick_config() -> FunctionConfig {
        FunctionConfig {
            runtime: Duration::from_millis(1),
            cold_start: Duration::from_millis(5),
            keep_warm: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_define_if_absent_runs_factory_once() {
        let platform = SimPlatform::new();
        let calls = AtomicUsize::new(0);
        let factory = |_name: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            quick_config()
        };

        assert!(platform.define_if_absent("f", &factory).unwrap());
        assert!(!platform.define_if_absent("f", &factory).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(platform.len(), 1);
        assert_eq!(platform.get("f").unwrap().config, quick_config());
    }

    #[test]
    fn test_concurrent_define_if_absent() {
        let platform = Arc::new(SimPlatform::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let platform = Arc::clone(&platform);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    let factory = |_name: &str| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        quick_config()
                    };
                    platform.define_if_absent("shared", &factory).unwrap()
                })
            })
            .collect();

        let created: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(created, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_run_is_cold_then_warm() {
        let platform = SimPlatform::new();
        platform.define("f", quick_config());

        let first = platform.run("f", None).await.unwrap();
        assert!(first.cold_start);
        assert!(platform.is_warm("f"));

        let second = platform.run("f", None).await.unwrap();
        assert!(!second.cold_start);
        assert_eq!(second.function, "f");
        assert!(second.finished_at >= second.started_at);
    }

    #[tokio::test]
    async fn test_runtime_override_reported() {
        let platform = SimPlatform::new();
        platform.define("f", quick_config());

        let report = platform.run("f", Some(Duration::from_millis(3))).await.unwrap();
        assert!((report.duration - 0.003).abs() < 1e-9);

        let report = platform.run("f", None).await.unwrap();
        assert!((report.duration - 0.001).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_deploy_warms_instance() {
        let platform = SimPlatform::new();
        platform.define("f", quick_config());
        assert!(!platform.is_warm("f"));

        platform.deploy("f").await.unwrap();
        assert!(platform.is_warm("f"));

        let report = platform.run("f", None).await.unwrap();
        assert!(!report.cold_start);
    }

    #[tokio::test]
    async fn test_keep_warm_expiry() {
        let platform = SimPlatform::new();
        platform.define(
            "f",
            FunctionConfig {
                keep_warm: Duration::ZERO,
                ..quick_config()
            },
        );

        platform.run("f", None).await.unwrap();
        assert!(!platform.is_warm("f"));
        assert!(platform.run("f", None).await.unwrap().cold_start);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let platform = SimPlatform::new();
        assert!(platform.get("missing").is_none());
        assert!(matches!(
            platform.run("missing", None).await,
            Err(SimfaasError::FunctionNotFound)
        ));
        assert!(matches!(
            platform.deploy("missing").await,
            Err(SimfaasError::FunctionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_closed_platform_rejects_work() {
        let platform = SimPlatform::new();
        platform.define("f", quick_config());
        platform.close().unwrap();

        assert!(matches!(
            platform.run("f", None).await,
            Err(SimfaasError::Platform(_))
        ));
        assert!(platform.define_if_absent("g", &|_: &str| quick_config()).is_err());
    }
}
