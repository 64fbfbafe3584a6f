//! HTTP service for the gate.
//!
//! Exposes `/gate` (GET and HEAD) plus `/health`. Each request runs the
//! full pipeline via `spawn_blocking` (the pipeline is filesystem-bound),
//! then this layer turns the decision into a response: a handoff emits
//! exactly one delivery header and no body; direct delivery streams the
//! file in bounded chunks with single-range support.
//!
//! Client disconnects during streaming are cooperative: the body stream is
//! dropped when the connection goes away and the gate stops reading,
//! without treating it as an error.

use anyhow::Result;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::gate::deliver::{
    RangeOutcome, STREAM_CHUNK_SIZE, cache_control, disposition, parse_range,
};
use crate::gate::{self, Delivery, GateRequest, cookies};

/// Header the rewrite rule uses for the shared gate marker.
const GATE_AUTH_HEADER: &str = "x-gate-auth";

/// Header the rewrite rule uses for the optional site token.
const GATE_SITE_HEADER: &str = "x-gate-site";

/// Header carrying the fronting server's software string, for
/// delivery-method auto-detection. Trusted like the gate headers above:
/// the fronting server must strip any client-supplied value and set its
/// own, otherwise a smuggled value can flip the handoff method under
/// `delivery_method = "auto"`.
const SERVER_SOFTWARE_HEADER: &str = "x-server-software";

pub struct Server {
    config_dir: PathBuf,
    bind: String,
    port: u16,
}

struct AppState {
    config_dir: PathBuf,
}

impl Server {
    pub fn new(config_dir: &Path, bind: &str, port: u16) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            bind: bind.to_string(),
            port,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let state = Arc::new(AppState {
            config_dir: self.config_dir.clone(),
        });
        let app = app(state);

        let addr: SocketAddr = format!("{}:{}", self.bind, self.port).parse()?;
        info!("Starting gate server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/gate", get(gate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct GateQuery {
    file: Option<String>,
}

async fn gate_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GateQuery>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let request = build_gate_request(query.file, &headers);
    let range = header_str(&headers, header::RANGE.as_str()).map(str::to_string);
    let head_only = method == Method::HEAD;

    let config_dir = state.config_dir.clone();
    let decision =
        tokio::task::spawn_blocking(move || gate::evaluate(&config_dir, &request)).await;

    match decision {
        Ok(Ok(Delivery::Handoff {
            header: handoff,
            location,
            content_type,
        })) => handoff_response(handoff.name(), &location, content_type.as_deref()),
        Ok(Ok(Delivery::Direct { path, content_type })) => {
            direct_response(&path, &content_type, range.as_deref(), head_only).await
        }
        Ok(Err(e)) => status_response(e.status()),
        Err(e) => {
            warn!("Gate task failed: {}", e);
            status_response(500)
        }
    }
}

fn build_gate_request(file: Option<String>, headers: &HeaderMap) -> GateRequest {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    GateRequest {
        file,
        marker: header_str(headers, GATE_AUTH_HEADER).map(str::to_string),
        site_token: header_str(headers, GATE_SITE_HEADER).map(str::to_string),
        host: header_str(headers, header::HOST.as_str()).map(str::to_string),
        server_software: header_str(headers, SERVER_SOFTWARE_HEADER).map(str::to_string),
        cookies: cookies::parse(
            headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        ),
        now,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Opaque status-only response. No diagnostic text reaches the client.
fn status_response(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    status.into_response()
}

/// Header handoff: one delivery header, optional content type, no body.
///
/// Nothing else is set; the web server performing the transfer owns
/// length, range, and caching for the file it sends.
fn handoff_response(
    header_name: &'static str,
    location: &str,
    content_type: Option<&str>,
) -> Response {
    let mut response = Response::new(Body::empty());

    let Ok(value) = HeaderValue::from_str(location) else {
        warn!("Handoff location not header-safe");
        return status_response(500);
    };
    response.headers_mut().insert(header_name, value);

    if let Some(ct) = content_type {
        if let Ok(value) = HeaderValue::from_str(ct) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }

    response
}

/// Direct streaming with single-range support.
async fn direct_response(
    path: &Path,
    content_type: &str,
    range: Option<&str>,
    head_only: bool,
) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            // Disappeared between the pipeline check and the open.
            warn!("File vanished before delivery: {}: {}", path.display(), e);
            return status_response(404);
        }
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!("Cannot stat {}: {}", path.display(), e);
            return status_response(404);
        }
    };

    let (status, start, end) = match range {
        None => (StatusCode::OK, 0, size.saturating_sub(1)),
        Some(spec) => match parse_range(spec, size) {
            RangeOutcome::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end),
            RangeOutcome::Unsatisfiable => {
                let mut response = status_response(416);
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                return response;
            }
        },
    };
    let body_len = if size == 0 { 0 } else { end - start + 1 };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body_len)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, cache_control(content_type));

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    builder = builder.header(
        header::CONTENT_DISPOSITION,
        disposition(content_type, &filename),
    );

    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, size),
        );
    }

    let body = if head_only || body_len == 0 {
        Body::empty()
    } else {
        if start > 0 {
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                warn!("Seek failed on {}: {}", path.display(), e);
                return status_response(404);
            }
        }
        Body::from_stream(stream_chunks(file, body_len))
    };

    match builder.body(body) {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed to build response: {}", e);
            status_response(500)
        }
    }
}

/// Yield the file in bounded chunks.
///
/// A read error terminates the stream with an error so the connection is
/// torn down instead of a short body passing as complete. A disconnected
/// client stops polling; the stream is dropped and nothing is logged as a
/// failure.
fn stream_chunks(
    mut file: tokio::fs::File,
    len: u64,
) -> impl futures::Stream<Item = std::io::Result<Bytes>> {
    async_stream::try_stream! {
        let mut remaining = len;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                // File truncated underneath us; fail the stream rather
                // than padding to the advertised length.
                Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "file shrank during delivery",
                ))?;
            }
            remaining -= n as u64;
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
}
