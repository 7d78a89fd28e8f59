//! Metrics and health endpoint

use anyhow::Result;
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use proxy_engine::{Proxier, SyncMetrics};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Answer one request. `/healthz` reports ready only after every informer
/// has completed its first listing.
pub fn route(
    method: &Method,
    path: &str,
    initialized: bool,
    metrics: &SyncMetrics,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        (&Method::GET, "/healthz") if initialized => text_response(StatusCode::OK, "OK\n"),
        (&Method::GET, "/healthz") => {
            text_response(StatusCode::SERVICE_UNAVAILABLE, "informers not synced\n")
        }
        _ => text_response(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

async fn handle_request(
    req: Request<Incoming>,
    proxier: Arc<Proxier>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!("{} {}", req.method(), req.uri().path());
    Ok(route(
        req.method(),
        req.uri().path(),
        proxier.is_initialized(),
        proxier.metrics(),
    ))
}

/// Serve `/metrics` and `/healthz` on `addr` until `cancel` fires
pub async fn serve(
    addr: SocketAddr,
    proxier: Arc<Proxier>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let proxier = proxier.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, proxier.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}
