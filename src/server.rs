//! The monitoring HTTP server: a JSON status endpoint consumed by the
//! embedded status page (and anything else that wants to watch a run).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response};
use serde::Serialize;
use tracing::info;

use crate::collector::DataSnapshot;
use crate::ring::Ring;
use crate::shutdown::ShutdownReceiver;

static INDEX_HTML: &str = include_str!("webui/index.html");

/// The slice of benchmark state the monitoring server reads. Everything is
/// shared by `Arc`, so requests never touch the orchestrator itself.
pub struct StatusSource {
    pub ring: Arc<Ring<Arc<DataSnapshot>>>,
    pub workload_names: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub note: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StatusData {
    current_time: f64,
    note: String,
    workloads: Vec<String>,
    data_snapshots: Vec<Arc<DataSnapshot>>,
}

pub struct HttpServer {
    port: u16,
    source: Arc<StatusSource>,
}

impl HttpServer {
    pub fn new(port: u16, source: StatusSource) -> Self {
        Self {
            port,
            source: Arc::new(source),
        }
    }

    /// Serves until `shutdown` fires. In-flight requests are drained before
    /// returning.
    pub async fn run(self, mut shutdown: ShutdownReceiver) -> Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let source = self.source;

        let make_svc = make_service_fn(move |_| {
            let source = Arc::clone(&source);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let source = Arc::clone(&source);
                    async move { handle_request(&source, req) }
                }))
            }
        });

        let server = hyper::Server::try_bind(&addr)?
            .serve(make_svc)
            .with_graceful_shutdown(async move { shutdown.recv().await });

        info!("monitoring UI listening on http://{addr}");
        server.await.map_err(|e| anyhow!("HTTP server failed: {e}"))
    }
}

fn handle_request(
    source: &StatusSource,
    req: Request<Body>,
) -> Result<Response<Body>, hyper::Error> {
    // Disable CORS so the endpoint is usable as a plain API server.
    let res = Response::builder().header(hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");

    let res = match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/status") => {
            let status = StatusData {
                current_time: (Utc::now() - source.start_time)
                    .num_microseconds()
                    .unwrap_or(i64::MAX) as f64
                    / 1e6,
                note: source.note.clone(),
                workloads: source.workload_names.clone(),
                data_snapshots: source.ring.read_all_ordered(),
            };

            match serde_json::to_vec(&status) {
                Ok(body) => res
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body)),
                Err(e) => res
                    .status(500)
                    .header(CONTENT_TYPE, "text/plain")
                    .body(Body::from(e.to_string())),
            }
        }
        (&Method::GET, "/") | (&Method::GET, "/index.html") => res
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Body::from(INDEX_HTML)),
        _ => res
            .status(404)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::empty()),
    };

    Ok(res.unwrap())
}
