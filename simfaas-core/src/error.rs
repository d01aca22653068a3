//! Error types for the emulation layer.
//!
//! Every failure the orchestrator can surface maps onto one of four kinds:
//! input errors, unknown functions, backend failures and serialization
//! failures. [`SimfaasError::status_code`] gives the status most endpoints
//! answer with; service lookup overrides it for unknown functions.

use thiserror::Error;

/// Result type alias for emulator operations.
pub type Result<T> = std::result::Result<T, SimfaasError>;

/// Core error type for the emulator.
#[derive(Error, Debug)]
pub enum SimfaasError {
    /// Malformed client input: bad JSON, unparsable parameter, empty URL.
    #[error("{0}")]
    Input(String),

    /// The function is unknown to the platform after auto-creation was applied.
    #[error("function not found")]
    FunctionNotFound,

    /// The resolver selected a key with no registered response generator.
    #[error("Parsed handler does not exist")]
    HandlerNotFound,

    /// A custom resolver or response generator failed.
    #[error("custom function error: {0}")]
    CustomFn(String),

    /// The platform rejected or failed an operation.
    #[error("platform error: {0}")]
    Platform(String),

    /// Request body could not be read
    #[error("body error: {0}")]
    Body(String),

    /// Execution report could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Route pattern failed to compile
    #[error("invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimfaasError {
    /// Returns the default HTTP status code for this error.
    ///
    /// Anything the invocation itself caused is a 400, including unknown
    /// functions. Service lookup answers unknown functions with 404 instead.
    #[inline]
    pub fn status_code(&self) -> u16 {
        match self {
            SimfaasError::Input(_)
            | SimfaasError::Body(_)
            | SimfaasError::FunctionNotFound
            | SimfaasError::HandlerNotFound
            | SimfaasError::CustomFn(_)
            | SimfaasError::Platform(_) => 400,
            SimfaasError::Serialization(_) | SimfaasError::Pattern(_) | SimfaasError::Io(_) => 500,
        }
    }
}
