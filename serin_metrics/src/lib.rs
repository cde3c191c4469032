//! Prometheus metrics for shard routing and scatter-gather queries.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hyper::header::AUTHORIZATION;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, TextEncoder};

pub static ROUTE_REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("serin_route_requests_total", "Total key routing decisions").unwrap());
pub static ROUTE_CORRUPTION_TOTAL: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("serin_route_corruption_total", "Buckets that fell below every range start").unwrap());
pub static SCATTER_REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("serin_scatter_requests_total", "Total scatter-gather dispatches").unwrap());
pub static SCATTER_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("serin_scatter_failures_total", "Scatter-gather dispatches failed by at least one shard").unwrap());
pub static SCATTER_CANCELLED_TOTAL: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("serin_scatter_cancelled_total", "Scatter-gather dispatches cancelled by the caller").unwrap());
pub static COMBINE_WARNINGS_TOTAL: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("serin_combine_consistency_warnings_total", "Shard results disagreeing on shard-invariant fields").unwrap());
pub static TOPOLOGY_VERSION: Lazy<IntGauge> = Lazy::new(|| prometheus::register_int_gauge!("serin_topology_version", "Version of the published topology snapshot").unwrap());
pub static SHARD_COMMAND_LATENCY_SECS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("serin_shard_command_latency_seconds", "Per-shard command latency in seconds").buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]);
    prometheus::register_histogram!(opts).unwrap()
});

/// Credentials required by the `/metrics` endpoint.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into() }
    }

    fn header_value(&self) -> String {
        format!("Basic {}", B64.encode(format!("{}:{}", self.user, self.password)))
    }
}

/// Serve `/metrics` on `addr` from a background task.
pub async fn serve(addr: SocketAddr, auth: Option<BasicAuth>) -> Result<()> {
    let expected = Arc::new(auth.map(|a| a.header_value()));
    let make_svc = make_service_fn(move |_| {
        let expected = Arc::clone(&expected);
        async move { Ok::<_, hyper::Error>(service_fn(move |req| scrape(req, Arc::clone(&expected)))) }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    tracing::info!(%addr, "metrics exporter listening");
    tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!(error = %e, "metrics exporter stopped");
        }
    });
    Ok(())
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(buffer)
}

fn reply(code: StatusCode, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = code;
    resp
}

async fn scrape(req: Request<Body>, expected: Arc<Option<String>>) -> Result<Response<Body>, hyper::Error> {
    if req.uri().path() != "/metrics" {
        return Ok(reply(StatusCode::NOT_FOUND, Body::empty()));
    }
    if let Some(expected) = expected.as_deref() {
        let given = req.headers().get(AUTHORIZATION).and_then(|h| h.to_str().ok());
        if given != Some(expected) {
            return Ok(reply(StatusCode::UNAUTHORIZED, Body::empty()));
        }
    }
    Ok(match render() {
        Ok(text) => reply(StatusCode::OK, Body::from(text)),
        Err(e) => {
            tracing::error!(error = %e, "metrics encoding failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, Body::empty())
        }
    })
}
