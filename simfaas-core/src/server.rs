//! HTTP/1.1 server for the emulated Fission endpoints.
//!
//! - One Tokio task per connection, hyper 1.x via `TokioIo`
//! - Every request dispatched through a frozen [`Router`]
//! - Lock-free request counters

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::fission::Fission;
use crate::router::Router;

/// Request counters.
///
/// Uses atomic counters for lock-free updates.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total requests handled
    pub requests_total: AtomicU64,
    /// Requests answered with a 4xx or 5xx status
    pub requests_failed: AtomicU64,
    /// Total handling time in microseconds
    pub processing_time_us: AtomicU64,
}

impl ServerMetrics {
    /// Record a completed request.
    #[inline]
    pub fn record_request(&self, status: u16, duration_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.processing_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Get average latency in microseconds.
    pub fn avg_latency_us(&self) -> u64 {
        let total = self.requests_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.processing_time_us.load(Ordering::Relaxed) / total
    }
}

struct ServerState {
    router: Router<Incoming>,
    metrics: Arc<ServerMetrics>,
}

/// The emulator's HTTP server.
pub struct FissionServer {
    state: Arc<ServerState>,
}

impl FissionServer {
    /// Create a server exposing every endpoint of `fission`.
    pub fn new(fission: Arc<Fission>) -> Result<Self> {
        Ok(Self::with_router(fission.serve()?))
    }

    /// Create a server around a prepared router.
    pub fn with_router(router: Router<Incoming>) -> Self {
        Self {
            state: Arc::new(ServerState {
                router,
                metrics: Arc::new(ServerMetrics::default()),
            }),
        }
    }

    /// Bind `addr` and serve until an accept error occurs.
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.run_on(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Fission emulator listening");

        loop {
            let (stream, peer_addr) = listener.accept().await?;

            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(state, req).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer_addr, error = %e, "Connection error");
                }
            });
        }
    }

    /// Shared request metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.state.metrics)
    }
}

#[instrument(skip(state, req), fields(method = %req.method(), uri = %req.uri()))]
async fn handle_request(
    state: Arc<ServerState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let start = Instant::now();
    let response = state.router.dispatch(req).await;

    let status = response.status();
    state
        .metrics
        .record_request(status.as_u16(), start.elapsed().as_micros() as u64);
    debug!(status = status.as_u16(), "Request handled");

    Ok(response)
}
