//! Application wiring.
//!
//! Everything process-wide lives in one [`AppState`] value passed
//! explicitly to the hub and the HTTP layer. Tests stand up complete
//! [`App`] instances on ephemeral ports.

use crate::http;
use crate::hub::{Hub, HubEvent};
use crate::metrics::Metrics;
use rfidbridge_core::Config;
use rfidbridge_sip::{SipConfig, SipError, SipPool};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const HUB_CHANNEL_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum ServerError {
    /// The pool could not be filled; the process must not start.
    #[error("SIP pool initialization failed: {0}")]
    PoolInit(#[from] SipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared process state: configuration, backend pool, metrics, and
/// the channel into the hub.
pub struct AppState {
    pub cfg: Config,
    pub pool: Arc<SipPool>,
    pub metrics: Arc<Metrics>,
    pub hub: mpsc::Sender<HubEvent>,
}

/// A running bridge instance.
pub struct App {
    state: Arc<AppState>,
    cancel: CancellationToken,
    http_addr: SocketAddr,
}

impl App {
    /// Fill the backend pool, start the hub and bind the HTTP surface.
    ///
    /// Fails (and the process should exit non-zero) when no backend
    /// sessions are obtainable.
    pub async fn start(cfg: Config) -> Result<App, ServerError> {
        let sip_cfg = SipConfig {
            server: cfg.sip_server.clone(),
            user: cfg.sip_user.clone(),
            pass: cfg.sip_pass.clone(),
            dept: cfg.sip_dept.clone(),
            connections: cfg.num_sip_connections,
            connect_timeout: Duration::from_secs(5),
            repair_backoff: Duration::from_secs(5),
        };
        let pool = Arc::new(SipPool::connect(sip_cfg).await?);
        Arc::clone(&pool).spawn_repair();

        let (hub_tx, hub_rx) = mpsc::channel(HUB_CHANNEL_DEPTH);
        let state = Arc::new(AppState {
            cfg,
            pool,
            metrics: Arc::new(Metrics::new()),
            hub: hub_tx,
        });

        tokio::spawn(Hub::new(Arc::clone(&state), hub_rx).run());

        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, state.cfg.http_port)).await?;
        let http_addr = listener.local_addr()?;
        info!(%http_addr, "HTTP server listening");

        let cancel = CancellationToken::new();
        tokio::spawn(http::serve(listener, Arc::clone(&state), cancel.clone()));

        Ok(App {
            state,
            cancel,
            http_addr,
        })
    }

    /// Address the HTTP surface is bound to. With a configured port of
    /// 0 this is where the ephemeral port shows up.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Stop accepting connections and tear down all sessions.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.state.hub.send(HubEvent::Shutdown).await;
    }
}
