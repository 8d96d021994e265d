use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use relayd_pool::ProxyConfig;

const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

enum Action {
    Reload,
    Interrupted,
    Terminated,
}

/// Why `serve` stopped, distinguishing the process exit codes the host
/// expects for a clean stop versus an interactive interrupt.
pub enum ExitReason {
    Clean,
    Interrupted,
}

/// A bind failure is reported separately from other startup/runtime
/// errors so the caller can map it to its own exit code.
pub enum ListenError {
    Bind(anyhow::Error),
    Other(anyhow::Error),
}

/// Binds `host:port`, serves `make_router()` until `SIGHUP` (reload) or
/// `SIGINT`/`SIGTERM` (stop), draining in-flight requests for up to five
/// seconds before acting on either. A reload re-reads `port` from
/// `config_path` and rebinds if it changed.
pub async fn serve(make_router: impl Fn() -> Router, host: String, mut port: u16, config_path: PathBuf) -> Result<ExitReason, ListenError> {
    let mut hangup = signal(SignalKind::hangup()).map_err(|err| ListenError::Other(err.into()))?;
    let mut terminate = signal(SignalKind::terminate()).map_err(|err| ListenError::Other(err.into()))?;

    loop {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let in_flight_for_middleware = in_flight.clone();
        let app = make_router().layer(middleware::from_fn(move |req: Request, next: Next| {
            track_in_flight(in_flight_for_middleware.clone(), req, next)
        }));

        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|err| ListenError::Other(anyhow::Error::new(err).context(format!("invalid bind address {host}:{port}"))))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| ListenError::Bind(anyhow::Error::new(err).context(format!("bind {addr}"))))?;
        info!(%addr, "listening");

        let mut server = Box::pin(axum::serve(listener, app));

        let action = tokio::select! {
            result = &mut server => {
                result.map_err(|err| ListenError::Other(anyhow::Error::new(err).context("listener accept loop failed")))?;
                return Ok(ExitReason::Clean);
            }
            _ = hangup.recv() => Action::Reload,
            _ = terminate.recv() => Action::Terminated,
            _ = tokio::signal::ctrl_c() => Action::Interrupted,
        };

        drop(server);
        drain(&in_flight, DRAIN_DEADLINE).await;

        match action {
            Action::Reload => {
                if let Some(new_port) = read_port(&config_path) {
                    if new_port != port {
                        info!(old = port, new = new_port, "reloading listener on new port");
                        port = new_port;
                    } else {
                        info!("SIGHUP received but port unchanged, rebinding in place");
                    }
                } else {
                    warn!("SIGHUP received but config could not be read, rebinding on the same port");
                }
            }
            Action::Terminated => return Ok(ExitReason::Clean),
            Action::Interrupted => return Ok(ExitReason::Interrupted),
        }
    }
}

async fn track_in_flight(counter: Arc<AtomicUsize>, req: Request, next: Next) -> Response {
    counter.fetch_add(1, Ordering::SeqCst);
    let response = next.run(req).await;
    counter.fetch_sub(1, Ordering::SeqCst);
    response
}

async fn drain(in_flight: &Arc<AtomicUsize>, deadline: Duration) {
    let start = tokio::time::Instant::now();
    while in_flight.load(Ordering::SeqCst) > 0 {
        if start.elapsed() >= deadline {
            warn!("drain deadline reached with requests still in flight");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn read_port(config_path: &PathBuf) -> Option<u16> {
    let body = std::fs::read(config_path).ok()?;
    ProxyConfig::from_json(&body).ok().map(|config| config.port)
}
