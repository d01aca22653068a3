//! Environment-driven emulator configuration.
//!
//! | Variable                     | Default          |
//! |------------------------------|------------------|
//! | `LISTEN_ADDR`                | `127.0.0.1:8888` |
//! | `CREATE_UNDEFINED_FUNCTIONS` | `true`           |
//! | `DEFAULT_RUNTIME_MS`         | `100`            |
//! | `COLD_START_MS`              | `500`            |
//! | `KEEP_WARM_MS`               | `60000`          |
//! | `WORKER_THREADS`             | available cores  |
//! | `CPU_PINNING`                | `true`           |
//!
//! Unparsable values fall back to the default with a warning.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::platform::{fixed_factory, FunctionConfig, FunctionFactory};

/// Environment variable for the listen address
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";

/// Environment variable toggling auto-creation of undefined functions
pub const ENV_CREATE_UNDEFINED: &str = "CREATE_UNDEFINED_FUNCTIONS";

/// Environment variable for the runtime of auto-created functions
pub const ENV_DEFAULT_RUNTIME_MS: &str = "DEFAULT_RUNTIME_MS";

/// Environment variable for the cold start of auto-created functions
pub const ENV_COLD_START_MS: &str = "COLD_START_MS";

/// Environment variable for the keep-warm window of auto-created functions
pub const ENV_KEEP_WARM_MS: &str = "KEEP_WARM_MS";

/// Environment variable for worker threads
pub const ENV_WORKER_THREADS: &str = "WORKER_THREADS";

/// Environment variable for CPU pinning
pub const ENV_CPU_PINNING: &str = "CPU_PINNING";

/// Emulator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatorConfig {
    /// Address to listen on (default: 127.0.0.1:8888)
    pub listen_addr: SocketAddr,
    /// Create functions on first reference
    pub create_undefined_functions: bool,
    /// Configuration given to auto-created functions
    pub default_function: FunctionConfig,
    /// Number of runtime worker threads
    pub worker_threads: usize,
    /// Pin runtime workers to CPU cores
    pub cpu_pinning: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 8888).into(),
            create_undefined_functions: true,
            default_function: FunctionConfig::default(),
            worker_threads: available_cores(),
            cpu_pinning: true,
        }
    }
}

impl EmulatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64))
        };

        Self {
            listen_addr: parse_or(&lookup, ENV_LISTEN_ADDR, defaults.listen_addr),
            create_undefined_functions: lookup(ENV_CREATE_UNDEFINED)
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.create_undefined_functions),
            default_function: FunctionConfig {
                runtime: millis(ENV_DEFAULT_RUNTIME_MS, defaults.default_function.runtime),
                cold_start: millis(ENV_COLD_START_MS, defaults.default_function.cold_start),
                keep_warm: millis(ENV_KEEP_WARM_MS, defaults.default_function.keep_warm),
            },
            worker_threads: match parse_or(&lookup, ENV_WORKER_THREADS, defaults.worker_threads) {
                0 => defaults.worker_threads,
                n => n,
            },
            cpu_pinning: lookup(ENV_CPU_PINNING)
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.cpu_pinning),
        }
    }

    /// Factory producing [`EmulatorConfig::default_function`] for every name.
    pub fn function_factory(&self) -> FunctionFactory {
        fixed_factory(self.default_function.clone())
    }
}

/// Parse `key`, warning and falling back to `default` on bad input.
fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(variable = key, value = %raw, "Invalid value, using default");
            default
        }
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    value != "0" && !value.eq_ignore_ascii_case("false")
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EmulatorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EmulatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, EmulatorConfig::default());
        assert_eq!(config.listen_addr.port(), 8888);
        assert!(config.create_undefined_functions);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_LISTEN_ADDR, "0.0.0.0:9000"),
            (ENV_CREATE_UNDEFINED, "false"),
            (ENV_DEFAULT_RUNTIME_MS, "250"),
            (ENV_COLD_START_MS, "0"),
            (ENV_KEEP_WARM_MS, "1000"),
            (ENV_WORKER_THREADS, "3"),
            (ENV_CPU_PINNING, "0"),
        ]);

        assert_eq!(config.listen_addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert!(!config.create_undefined_functions);
        assert_eq!(config.default_function.runtime, Duration::from_millis(250));
        assert_eq!(config.default_function.cold_start, Duration::ZERO);
        assert_eq!(config.default_function.keep_warm, Duration::from_secs(1));
        assert_eq!(config.worker_threads, 3);
        assert!(!config.cpu_pinning);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            (ENV_LISTEN_ADDR, "nowhere"),
            (ENV_DEFAULT_RUNTIME_MS, "soon"),
            (ENV_WORKER_THREADS, "0"),
        ]);
        let defaults = EmulatorConfig::default();

        assert_eq!(config.listen_addr, defaults.listen_addr);
        assert_eq!(config.default_function.runtime, defaults.default_function.runtime);
        assert_eq!(config.worker_threads, defaults.worker_threads);
    }

    #[test]
    fn test_function_factory_uses_default_function() {
        let config = config_from(&[(ENV_DEFAULT_RUNTIME_MS, "42")]);
        let factory = config.function_factory();
        assert_eq!(factory("any").runtime, Duration::from_millis(42));
    }
}
