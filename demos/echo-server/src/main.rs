//! Echo server wrapped in the Wiretap layer.
//!
//! Run with: cargo run -p echo-server
//!
//! Configure through `WIRETAP_*` variables (or a `.env` file), then try:
//!
//! ```text
//! curl -H 'content-type: application/json' -d '{"user":"bob","password":"pw"}' localhost:8080/echo
//! curl localhost:8080/slow
//! ```
//!
//! Set `ECHO_LOG_FILE` to write records as JSON lines instead of logging them.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use wiretap::config::EnvConfig;
use wiretap::prelude::*;
use wiretap::tower::ServiceBuilder;
use wiretap::ClientAddr;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn respond(
    status: StatusCode,
    content_type: HeaderValue,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    respond(status, HeaderValue::from_static("text/plain"), body)
}

async fn handle(
    request: Request<ReplayBody<Incoming>>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match (request.method(), request.uri().path()) {
        (&Method::GET, "/health") => Ok(text(StatusCode::OK, "ok")),
        (&Method::GET, "/slow") => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(text(StatusCode::OK, "finally"))
        }
        (&Method::POST, "/echo") => {
            let content_type = request
                .headers()
                .get(CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
            let body = request.into_body().collect().await?.to_bytes();
            Ok(respond(StatusCode::OK, content_type, body))
        }
        _ => Ok(text(StatusCode::NOT_FOUND, "not found")),
    }
}

fn open_sink() -> Result<std::sync::Arc<dyn LogSink>, BoxError> {
    match std::env::var("ECHO_LOG_FILE") {
        Ok(path) => Ok(std::sync::Arc::new(JsonLinesSink::new(path)?)),
        Err(_) => Ok(std::sync::Arc::new(TracingSink)),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    wiretap::logging::init_tracing(false);

    let config = EnvConfig::from_env()?.into_config()?;
    let interceptor = Interceptor::with_shared_sink(config, open_sink()?)?;

    let addr: SocketAddr = "127.0.0.1:8080".parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("echo server listening on http://{}", addr);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => break,
        };

        let service = ServiceBuilder::new()
            .map_request(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(ClientAddr(remote_addr));
                request
            })
            .layer(WiretapLayer::new(interceptor.clone()))
            .service_fn(handle);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, TowerToHyperService::new(service))
                .await
            {
                error!("Connection error: {}", err);
            }
        });
    }

    info!("shutting down");
    interceptor.shutdown().await;
    Ok(())
}
