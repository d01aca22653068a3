//! simfaas core - Fission protocol emulation over a simulated FaaS platform
//!
//! Exposes the Fission endpoints that load generators use (service lookup,
//! tap/pre-warm, function invocation) and answers them from a simulated
//! platform instead of real function containers.
//!
//! - **Router**: ordered wildcard routes, newest match wins
//! - **Custom responses**: per-function response generators resolved by key
//! - **Fission facade**: identity resolution, auto-creation, tap and run
//! - **Platform**: the simulation engine behind a trait, with [`SimPlatform`]
//!   as the in-process implementation

#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::unnecessary_to_owned)]

pub mod config;
pub mod custom;
pub mod error;
pub mod fission;
pub mod handlers;
pub mod platform;
pub mod router;
pub mod runtime;
pub mod server;
pub mod sim;

pub use config::EmulatorConfig;
pub use custom::{CustomHandler, CUSTOM_FN_HEADER};
pub use error::{Result, SimfaasError};
pub use fission::{Fission, Invocation};
pub use platform::{ExecutionReport, FunctionConfig, FunctionFactory, Platform};
pub use router::{Router, RouterBuilder};
pub use runtime::build_runtime;
pub use server::{FissionServer, ServerMetrics};
pub use sim::SimPlatform;
