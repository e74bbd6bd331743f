//! The authenticated backend connection pool.
//!
//! The pool holds a fixed number of logged-in SIP sessions, numbered
//! from 1. The slot number is baked into the login credentials, so
//! each slot maps to a distinct terminal account on the backend.
//!
//! Borrowing blocks until a session is available; a session that fails
//! mid-call is closed and queued for background repair, and the call is
//! retried once on a fresh session. The backend is known to drop idle
//! connections periodically, so the retry is load-bearing, not
//! defensive.

use crate::error::{Result, SipError};
use crate::message::SipResponse;
use futures::{SinkExt, StreamExt};
use rfidbridge_protocol::LineCodec;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct SipConfig {
    /// Backend address, host:port.
    pub server: String,

    /// Credential stems; the slot number is appended to both.
    pub user: String,
    pub pass: String,

    /// Location code sent in the login request.
    pub dept: String,

    /// Number of sessions to keep.
    pub connections: usize,

    /// Timeout for connecting and logging in a single session.
    pub connect_timeout: Duration,

    /// Delay between repair attempts for a broken slot.
    pub repair_backoff: Duration,
}

impl Default for SipConfig {
    fn default() -> Self {
        SipConfig {
            server: "localhost:6001".to_string(),
            user: "autouser".to_string(),
            pass: "autopass".to_string(),
            dept: "HUTL".to_string(),
            connections: 3,
            connect_timeout: Duration::from_secs(5),
            repair_backoff: Duration::from_secs(5),
        }
    }
}

/// One numbered, authenticated connection to the backend.
struct SipSession {
    id: usize,
    framed: Framed<TcpStream, LineCodec>,
}

impl SipSession {
    /// Connect and authenticate slot `id`.
    async fn login(cfg: &SipConfig, id: usize) -> Result<Self> {
        let connect = TcpStream::connect(&cfg.server);
        let stream = tokio::time::timeout(cfg.connect_timeout, connect)
            .await
            .map_err(|_| SipError::ConnectTimeout(cfg.connect_timeout.as_millis() as u64))??;

        let mut framed = Framed::new(stream, LineCodec::new());
        let msg = crate::message::login_msg(
            &format!("{}{}", cfg.user, id),
            &format!("{}{}", cfg.pass, id),
            &cfg.dept,
        );
        debug!(slot = id, "-> SIP {}", msg);
        framed.send(msg).await?;

        let reply = tokio::time::timeout(cfg.connect_timeout, framed.next())
            .await
            .map_err(|_| SipError::ConnectTimeout(cfg.connect_timeout.as_millis() as u64))?
            .ok_or(SipError::ConnectionClosed)??;
        debug!(slot = id, "<- SIP {}", reply);

        // Reply code 940 means rejected, 941 accepted.
        if reply.len() < 3 || reply.as_bytes()[2] == b'0' {
            return Err(SipError::LoginFailed { slot: id });
        }

        Ok(SipSession { id, framed })
    }

    /// One request/response turn.
    async fn call(&mut self, msg: &str) -> Result<String> {
        self.framed.send(msg).await?;
        self.framed
            .next()
            .await
            .ok_or(SipError::ConnectionClosed)?
            .map_err(SipError::from)
    }
}

/// Fixed-size pool of authenticated SIP sessions.
///
/// Cheap to share: wrap in an [`Arc`] and clone the handle into each
/// session task.
#[derive(Debug)]
pub struct SipPool {
    cfg: SipConfig,
    slots_tx: mpsc::Sender<SipSession>,
    slots_rx: Mutex<mpsc::Receiver<SipSession>>,
    broken_tx: mpsc::UnboundedSender<usize>,
    broken_rx: Mutex<Option<mpsc::UnboundedReceiver<usize>>>,
    available: AtomicUsize,
}

impl SipPool {
    /// Fill the pool by logging in every slot.
    ///
    /// Fails if any slot cannot be established; a bridge without its
    /// full backend capacity should not start.
    pub async fn connect(cfg: SipConfig) -> Result<Self> {
        info!(size = cfg.connections, server = %cfg.server, "filling SIP connection pool");

        let (slots_tx, slots_rx) = mpsc::channel(cfg.connections.max(1));
        let (broken_tx, broken_rx) = mpsc::unbounded_channel();
        let pool = SipPool {
            slots_tx,
            slots_rx: Mutex::new(slots_rx),
            broken_tx,
            broken_rx: Mutex::new(Some(broken_rx)),
            available: AtomicUsize::new(0),
            cfg,
        };

        for id in 1..=pool.cfg.connections {
            let session = SipSession::login(&pool.cfg, id).await?;
            pool.release(session);
        }

        Ok(pool)
    }

    /// Number of sessions currently available for borrowing.
    pub fn size(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    /// Perform one request/response turn against the backend.
    ///
    /// Borrows a session (waiting for one if necessary), sends `msg`,
    /// reads the single reply line and parses it. A session that turns
    /// out to be dead mid-call is replaced and the call retried once.
    pub async fn call(&self, msg: &str) -> Result<SipResponse> {
        let mut session = self.borrow().await?;
        debug!(slot = session.id, "-> SIP {}", msg);

        match session.call(msg).await {
            Ok(reply) => {
                debug!(slot = session.id, "<- SIP {}", reply);
                self.release(session);
                SipResponse::parse(&reply)
            }
            Err(e) if is_disconnect(&e) => {
                warn!(slot = session.id, error = %e, "SIP session dropped mid-call, retrying once");
                self.discard(session);

                let mut retry = self.borrow().await?;
                debug!(slot = retry.id, "-> SIP (retry) {}", msg);
                match retry.call(msg).await {
                    Ok(reply) => {
                        debug!(slot = retry.id, "<- SIP {}", reply);
                        self.release(retry);
                        SipResponse::parse(&reply)
                    }
                    Err(e) => {
                        self.discard(retry);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.discard(session);
                Err(e)
            }
        }
    }

    /// Spawn the background repair loop.
    ///
    /// Consumes broken slot numbers and re-logs them in, with backoff
    /// between attempts, returning repaired sessions to the pool.
    /// Without this task the pool capacity shrinks permanently as the
    /// backend drops connections.
    pub fn spawn_repair(self: Arc<Self>) -> JoinHandle<()> {
        let pool = self;
        tokio::spawn(async move {
            let mut broken_rx = match pool.broken_rx.lock().await.take() {
                Some(rx) => rx,
                None => return, // repair already running
            };
            while let Some(slot) = broken_rx.recv().await {
                loop {
                    match SipSession::login(&pool.cfg, slot).await {
                        Ok(session) => {
                            info!(slot, "SIP session repaired");
                            pool.release(session);
                            break;
                        }
                        Err(e) => {
                            warn!(slot, error = %e, "SIP repair attempt failed");
                            tokio::time::sleep(pool.cfg.repair_backoff).await;
                        }
                    }
                }
            }
        })
    }

    async fn borrow(&self) -> Result<SipSession> {
        let mut rx = self.slots_rx.lock().await;
        let session = rx.recv().await.ok_or(SipError::PoolClosed)?;
        self.available.fetch_sub(1, Ordering::Relaxed);
        Ok(session)
    }

    fn release(&self, session: SipSession) {
        self.available.fetch_add(1, Ordering::Relaxed);
        if self.slots_tx.try_send(session).is_err() {
            // Channel capacity equals pool size, so this cannot fill up
            // unless a session was duplicated somewhere.
            self.available.fetch_sub(1, Ordering::Relaxed);
            warn!("SIP pool overflow on release; dropping session");
        }
    }

    fn discard(&self, session: SipSession) {
        let slot = session.id;
        drop(session);
        let _ = self.broken_tx.send(slot);
    }
}

/// End-of-stream: the backend hung up on an idle session. Only this
/// case earns the single retry; any other error marks the session
/// unusable without retrying.
fn is_disconnect(e: &SipError) -> bool {
    match e {
        SipError::ConnectionClosed => true,
        SipError::Io(io) => io.kind() == ErrorKind::UnexpectedEof,
        SipError::Protocol(rfidbridge_core::Error::Io(io)) => {
            io.kind() == ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
