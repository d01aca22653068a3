//! Custom response generators.
//!
//! A [`CustomHandler`] turns a function name into a registry key through a
//! resolver, then runs the generator stored under that key on the request
//! payload. Both the resolver and the registry are fixed once built, so a
//! handler can be shared across request tasks without synchronization.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SimfaasError};

/// Request header that enables the custom response overlay.
pub const CUSTOM_FN_HEADER: &str = "X-CustomFn";

/// A response generator: payload in, payload out.
pub type CustomFn = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Maps a function name to a generator key.
pub type Resolver = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Resolver that uses the function name itself as the key.
pub fn identity_resolver() -> Resolver {
    Arc::new(|name: &str| -> Result<String> { Ok(name.to_owned()) })
}

/// Resolver that keys on the part of the name before `delimiter`.
///
/// `resize-42` resolves to `resize` with `-` as delimiter. Names without the
/// delimiter resolve to themselves.
pub fn prefix_resolver(delimiter: char) -> Resolver {
    Arc::new(move |name: &str| -> Result<String> {
        let key = name.split(delimiter).next().unwrap_or_default();
        if key.is_empty() {
            return Err(SimfaasError::CustomFn(format!(
                "cannot derive handler key from function name {:?}",
                name
            )));
        }
        Ok(key.to_owned())
    })
}

/// Resolver plus generator registry.
#[derive(Clone)]
pub struct CustomHandler {
    resolver: Resolver,
    handlers: Arc<HashMap<String, CustomFn>>,
}

impl CustomHandler {
    /// Start building a handler around `resolver`.
    pub fn builder(resolver: Resolver) -> CustomHandlerBuilder {
        CustomHandlerBuilder {
            resolver,
            handlers: HashMap::new(),
        }
    }

    /// Resolve the generator for `fn_name` and run it on `payload`.
    ///
    /// The generator's output or error is returned as is.
    pub fn exec(&self, fn_name: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let key = (self.resolver)(fn_name)?;
        let generator = self
            .handlers
            .get(&key)
            .ok_or(SimfaasError::HandlerNotFound)?;
        generator(payload)
    }

    /// Check if a generator is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Number of registered generators.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no generators are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CustomHandler {
    /// Identity resolver with no generators; every lookup fails.
    fn default() -> Self {
        Self::builder(identity_resolver()).build()
    }
}

impl fmt::Debug for CustomHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("CustomHandler").field("handlers", &keys).finish()
    }
}

/// Builder collecting generators before the registry is frozen.
pub struct CustomHandlerBuilder {
    resolver: Resolver,
    handlers: HashMap<String, CustomFn>,
}

impl CustomHandlerBuilder {
    /// Register `generator` under `key`, replacing any previous one.
    pub fn handler<F>(mut self, key: impl Into<String>, generator: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.handlers.insert(key.into(), Arc::new(generator));
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> CustomHandler {
        CustomHandler {
            resolver: self.resolver,
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Generator that returns the payload unchanged.
pub fn echo(payload: &[u8]) -> Result<Vec<u8>> {
    Ok(payload.to_vec())
}
