//! HTTP wrappers around the [`Fission`] operations.
//!
//! Handlers never fail at the transport level: every error becomes a plain
//! text response whose status tells client mistakes (400) apart from
//! unknown functions (404) and encoding failures (500).

use std::fmt::Display;

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::{Result, SimfaasError};
use crate::fission::{Fission, Invocation};

/// Function metadata sent to `/v2/getServiceForFunction`.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
}

/// `/v2/functions/.*`: list stub, always an empty object.
pub async fn functions_get<B>(_fission: &Fission, _req: Request<B>) -> Response<Full<Bytes>> {
    text_response(StatusCode::OK, Bytes::from_static(b"{}"))
}

/// `/v2/tapService`: the body is the service URL to pre-warm.
#[instrument(skip_all)]
pub async fn tap_service<B>(fission: &Fission, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let bytes = match read_body(req).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read service to tap");
            return error_response(StatusCode::BAD_REQUEST, "failed to parse service to tap");
        }
    };
    let svc_url = String::from_utf8_lossy(&bytes);

    if let Err(e) = fission.tap_service(&svc_url) {
        warn!(service = %svc_url, error = %e, "Failed to prewarm");
        return error_response(StatusCode::BAD_REQUEST, "failed to parse service to tap");
    }

    info!(service = %svc_url, "Prewarm requested");
    text_response(StatusCode::OK, Bytes::new())
}

/// `/v2/getServiceForFunction`: JSON metadata in, service name out.
#[instrument(skip_all)]
pub async fn get_service_for_function<B>(fission: &Fission, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let bytes = match read_body(req).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to read function metadata")
        }
    };
    let meta: ObjectMeta = match serde_json::from_slice(&bytes) {
        Ok(meta) => meta,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to parse function metadata")
        }
    };

    match fission.get_service_for_function(&meta.name) {
        Ok(svc) => text_response(StatusCode::OK, Bytes::from(svc)),
        Err(e) => error_response(StatusCode::NOT_FOUND, &e.to_string()),
    }
}

/// `/fission-function/.*`: run the function named by the last path segment.
#[instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn function_run<B>(fission: &Fission, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let invocation = match Invocation::from_request(req) {
        Ok(invocation) => invocation,
        Err(e) => return failure_response(&e),
    };

    let report = match fission.run(invocation).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "Function run failed");
            return failure_response(&e);
        }
    };

    match serde_json::to_vec(&report) {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|_| internal_error()),
        Err(e) => failure_response(&SimfaasError::from(e)),
    }
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes>
where
    B: Body,
    B::Error: Display,
{
    let collected = req
        .into_body()
        .collect()
        .await
        .map_err(|e| SimfaasError::Body(e.to_string()))?;
    Ok(collected.to_bytes())
}

/// Error response with the default status of `err`.
fn failure_response(err: &SimfaasError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, &err.to_string())
}

/// Plain text error response, message terminated by a newline.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(Full::new(Bytes::from(format!("{}\n", message))))
        .unwrap_or_else(|_| internal_error())
}

fn text_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"internal error\n")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
