//! Local web UI and JSON API for kflashd.
//!
//! ## Endpoints
//!
//! - `GET /` - embedded single-page UI
//! - `GET /api/ports` - serial ports on this host
//! - `POST /api/flash` - flash an uploaded firmware file (multipart)
//! - `GET /api/krux/status` - cache state of one release
//! - `GET /api/krux/releases` - known release versions
//! - `POST /api/krux/download` - download and extract one release
//! - `POST /api/flash-krux` - flash a board from a release package
//!
//! Every `/api` route only answers loopback peers.

mod extract;
mod forms;
mod handlers;
mod response;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use anyhow::Context;
use axum::{
    Router,
    extract::{ConnectInfo, DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::context::AppContext;

pub use forms::{DEFAULT_BAUD_RATE, FlashOptions, parse_bool};
pub use response::ApiError;

/// Embedded HTML UI
const INDEX_HTML: &str = include_str!("assets/index.html");

/// Upper bound for any request body, firmware uploads included.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub fn router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/api/ports", get(handlers::list_ports))
        .route("/api/flash", post(handlers::flash_upload))
        .route("/api/krux/status", get(handlers::release_status))
        .route("/api/krux/releases", get(handlers::release_versions))
        .route("/api/krux/download", post(handlers::release_download))
        .route("/api/flash-krux", post(handlers::flash_release))
        .route_layer(middleware::from_fn(require_local));

    Router::new()
        .route("/", get(serve_index))
        .merge(api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(access_log))
        .with_state(ctx)
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// Peer addresses are attached to every request; the local-only guard
/// rejects requests that arrive without one.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr,
            ctx,
            shutdown_tx,
        }
    }

    /// Start the web server. Runs until shutdown() is called or Ctrl+C.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_addr))?;
        let addr = listener.local_addr()?;
        let url = format!("http://{addr}");
        info!(%addr, "Web UI listening on {url}");

        if self.ctx.config.open_browser {
            open_browser(&url);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown = async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = tokio::signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
            }
        };

        serve(listener, router(self.ctx.clone()), shutdown).await?;
        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

async fn require_local(request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match peer {
        Some(addr) if is_local(addr.ip()) => next.run(request).await,
        _ => {
            warn!(peer = ?peer, uri = %request.uri(), "Rejected non-local request");
            ApiError::forbidden().into_response()
        }
    }
}

async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        peer = ?peer,
        "HTTP request"
    );
    response
}

fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "windows") {
        let mut cmd = std::process::Command::new("cmd");
        cmd.args(["/C", "start", "", url]);
        cmd
    } else if cfg!(target_os = "macos") {
        let mut cmd = std::process::Command::new("open");
        cmd.arg(url);
        cmd
    } else {
        let mut cmd = std::process::Command::new("xdg-open");
        cmd.arg(url);
        cmd
    };

    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    if let Err(e) = command.spawn() {
        warn!(error = %e, %url, "Could not open a browser; open the URL manually");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn loopback_peers_are_local() {
        assert!(is_local(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_local(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))));
        assert!(is_local(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_local(IpAddr::V6(
            Ipv4Addr::LOCALHOST.to_ipv6_mapped()
        )));
    }

    #[test]
    fn remote_peers_are_not_local() {
        assert!(!is_local(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))));
        assert!(!is_local(IpAddr::V6(
            Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped()
        )));
        assert!(!is_local("fe80::1".parse().unwrap()));
    }
}
