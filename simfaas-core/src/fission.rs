//! Fission protocol emulation.
//!
//! [`Fission`] emulates the part of the Fission control plane and router
//! that load generators talk to, on top of any [`Platform`]:
//!
//! | Endpoint                    | Operation                          |
//! |-----------------------------|------------------------------------|
//! | `/v2/functions/.*`          | list stub, always `{}`             |
//! | `/v2/tapService`            | [`Fission::tap_service`]           |
//! | `/v2/getServiceForFunction` | [`Fission::get_service_for_function`] |
//! | `/fission-function/.*`      | [`Fission::run`]                   |
//!
//! Functions referenced before being declared are created on the fly when
//! `create_undefined_functions` is enabled.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http_body_util::BodyExt;
use hyper::body::Body;
use tracing::{debug, info, warn};

use crate::custom::{CustomHandler, CUSTOM_FN_HEADER};
use crate::error::{Result, SimfaasError};
use crate::handlers;
use crate::platform::{ExecutionReport, FunctionFactory, Platform};
use crate::router::{decode_path, Router};

/// Query parameter overriding the configured runtime, in seconds.
pub const RUNTIME_PARAM: &str = "runtime";

/// Emulated Fission facade over a simulated platform.
pub struct Fission {
    platform: Arc<dyn Platform>,
    fn_factory: FunctionFactory,
    create_undefined_functions: bool,
    custom_fn: CustomHandler,
}

impl Fission {
    /// Create a facade that creates undefined functions with `fn_factory`.
    ///
    /// Auto-creation is enabled and no custom generators are registered.
    pub fn new(platform: Arc<dyn Platform>, fn_factory: FunctionFactory) -> Self {
        Self {
            platform,
            fn_factory,
            create_undefined_functions: true,
            custom_fn: CustomHandler::default(),
        }
    }

    /// Enable or disable automatic creation of undefined functions.
    pub fn create_undefined_functions(mut self, enabled: bool) -> Self {
        self.create_undefined_functions = enabled;
        self
    }

    /// Install the custom response generators.
    pub fn custom_handler(mut self, custom_fn: CustomHandler) -> Self {
        self.custom_fn = custom_fn;
        self
    }

    /// The underlying platform.
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Start the platform.
    pub fn start(&self) -> Result<()> {
        self.platform.start()
    }

    /// Close the platform.
    pub fn close(&self) -> Result<()> {
        self.platform.close()
    }

    /// Map a function to its service name.
    ///
    /// The service name is the function name itself.
    pub fn get_service_for_function(&self, fn_name: &str) -> Result<String> {
        self.create_if_undefined(fn_name)?;
        let function = self
            .platform
            .get(fn_name)
            .ok_or(SimfaasError::FunctionNotFound)?;
        Ok(function.name)
    }

    /// Pre-warm the function behind `svc_url`.
    ///
    /// Returns as soon as the deploy is scheduled. The deploy runs on a
    /// detached task of the current Tokio runtime and its outcome is only
    /// logged. Fails with a platform error when called outside a runtime.
    pub fn tap_service(&self, svc_url: &str) -> Result<()> {
        if svc_url.is_empty() {
            return Err(SimfaasError::Input("no url provided to tap".into()));
        }
        let fn_name = svc_to_fn(svc_url);
        self.create_if_undefined(&fn_name)?;

        if self.platform.get(&fn_name).is_none() {
            return Err(SimfaasError::FunctionNotFound);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SimfaasError::Platform(format!("cannot schedule deploy: {}", e)))?;
        let platform = Arc::clone(&self.platform);
        runtime.spawn(async move {
            if let Err(e) = platform.deploy(&fn_name).await {
                warn!(function = %fn_name, error = %e, "Background deploy failed");
            }
        });
        Ok(())
    }

    /// Run a function invocation.
    ///
    /// The custom response overlay runs after the simulated execution, so
    /// its cost never shows up in the report timings.
    pub async fn run<B>(&self, invocation: Invocation<B>) -> Result<ExecutionReport>
    where
        B: Body,
        B::Error: Display,
    {
        let Invocation {
            function,
            runtime,
            custom_fn,
            body,
        } = invocation;

        self.create_if_undefined(&function)?;
        let mut report = self.platform.run(&function, runtime).await?;

        if custom_fn {
            let payload = body
                .collect()
                .await
                .map_err(|e| SimfaasError::Body(e.to_string()))?
                .to_bytes();
            let response = self.custom_fn.exec(&function, &payload)?;
            report.response = String::from_utf8_lossy(&response).into_owned();
            debug!(function = %function, bytes = response.len(), "Applied custom response");
        }

        Ok(report)
    }

    /// Build the router serving every emulated endpoint.
    ///
    /// Registration order matters: later patterns win on overlap.
    pub fn serve<B>(self: &Arc<Self>) -> Result<Router<B>>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Display,
    {
        let list = Arc::clone(self);
        let tap = Arc::clone(self);
        let lookup = Arc::clone(self);
        let run = Arc::clone(self);

        let router = Router::builder()
            .route("/v2/functions/.*", move |req: Request<B>| {
                let fission = Arc::clone(&list);
                async move { handlers::functions_get(&fission, req).await }
            })?
            .route("/v2/tapService", move |req: Request<B>| {
                let fission = Arc::clone(&tap);
                async move { handlers::tap_service(&fission, req).await }
            })?
            .route("/v2/getServiceForFunction", move |req: Request<B>| {
                let fission = Arc::clone(&lookup);
                async move { handlers::get_service_for_function(&fission, req).await }
            })?
            .route("/fission-function/.*", move |req: Request<B>| {
                let fission = Arc::clone(&run);
                async move { handlers::function_run(&fission, req).await }
            })?
            .build();
        Ok(router)
    }

    fn create_if_undefined(&self, fn_name: &str) -> Result<()> {
        if !self.create_undefined_functions || self.platform.get(fn_name).is_some() {
            return Ok(());
        }
        let created = self.platform.define_if_absent(fn_name, &*self.fn_factory)?;
        if created {
            info!(function = fn_name, "Created new function");
        }
        Ok(())
    }
}

/// Per-request invocation context, parsed once from the HTTP request.
#[derive(Debug)]
pub struct Invocation<B> {
    /// Function name, the last path segment
    pub function: String,
    /// Runtime override from the `runtime` query parameter
    pub runtime: Option<Duration>,
    /// Whether the custom function header was set
    pub custom_fn: bool,
    /// Request body, read only for custom functions
    pub body: B,
}

impl<B> Invocation<B> {
    /// Extract the invocation parameters from `req`.
    pub fn from_request(req: Request<B>) -> Result<Self> {
        let (parts, body) = req.into_parts();
        let runtime = parse_runtime(parts.uri.query())?;
        let custom_fn = parts
            .headers
            .get(CUSTOM_FN_HEADER)
            .map(|v| !v.as_bytes().is_empty())
            .unwrap_or(false);

        Ok(Self {
            function: function_name_from_path(&decode_path(parts.uri.path())).to_owned(),
            runtime,
            custom_fn,
            body,
        })
    }
}

impl Invocation<http_body_util::Empty<Bytes>> {
    /// Invocation of `function` with no body and no custom overlay.
    pub fn named(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            runtime: None,
            custom_fn: false,
            body: http_body_util::Empty::new(),
        }
    }
}

/// The last `/`-delimited segment of an already decoded `path`.
pub fn function_name_from_path(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Derive a function name from a service URL.
///
/// Uses the authority of the URL (host and port, without credentials)
/// exactly as written, so case and default ports are preserved. Strings that
/// do not parse as a URL with a host are taken verbatim.
pub fn svc_to_fn(svc: &str) -> String {
    match url::Url::parse(svc) {
        Ok(url) if url.has_host() => raw_host_port(svc).unwrap_or(svc).to_owned(),
        _ => svc.to_owned(),
    }
}

/// The `host[:port]` text of `svc`, sliced from the input without normalization.
fn raw_host_port(svc: &str) -> Option<&str> {
    let (_, rest) = svc.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    (!host.is_empty()).then_some(host)
}

/// Parse the `runtime` query parameter into a duration.
///
/// Absent or empty means no override.
fn parse_runtime(query: Option<&str>) -> Result<Option<Duration>> {
    let Some(raw) = query.and_then(|q| query_param(q, RUNTIME_PARAM)) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    let seconds: f64 = raw.parse().map_err(|e| {
        SimfaasError::Input(format!("invalid runtime {:?}: {}", raw, e))
    })?;
    Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|e| SimfaasError::Input(format!("invalid runtime {:?}: {}", raw, e)))
}

/// First value of `key` in a raw query string.
fn query_param(query: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
