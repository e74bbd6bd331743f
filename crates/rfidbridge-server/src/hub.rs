//! The session manager.
//!
//! A single-task event loop that binds incoming UI connections to the
//! RFID unit on the same host. For each registration it dials the
//! unit, runs the version handshake, and spawns the session tasks: the
//! state machine plus the reader read/write loops. At most one session
//! exists per host; a new registration from a host displaces the old
//! session, which is torn down first.

use crate::app::AppState;
use crate::session::{SessionChannels, SessionFsm};
use futures::{SinkExt, StreamExt};
use rfidbridge_core::{UiEvent, UiRequest};
use rfidbridge_protocol::{LineCodec, ReaderCommand, VendorCodec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time allowed for dialing a reader and completing the version
/// handshake.
const READER_INIT_TIMEOUT: Duration = Duration::from_secs(5);

const CHANNEL_DEPTH: usize = 16;

/// Events consumed by the hub loop.
pub enum HubEvent {
    /// A UI connection arrived from `host`. The reply carries the
    /// session handle (or `None` when the reader could not be
    /// initialized) and the token that tears this connection down.
    Register {
        host: String,
        conn_id: u64,
        ui_tx: mpsc::Sender<UiEvent>,
        reply: oneshot::Sender<Registered>,
    },

    /// The UI connection with this id went away. Idempotent; a stale
    /// id from a displaced connection is ignored.
    Unregister { host: String, conn_id: u64 },

    /// Tear everything down and exit the loop.
    Shutdown,
}

/// Reply to a successful or failed registration.
pub struct Registered {
    /// Where to forward UI requests, absent when no session exists.
    pub session: Option<SessionHandle>,

    /// Cancelled when the hub tears this connection down (displacement
    /// or shutdown).
    pub cancel: CancellationToken,
}

/// Hand-off point between a UI connection and its session.
#[derive(Clone)]
pub struct SessionHandle {
    pub requests: mpsc::Sender<UiRequest>,
}

struct SessionEntry {
    conn_id: u64,
    cancel: CancellationToken,
    // Kept so the entry owns an event sender for the connection's
    // lifetime; dropped on teardown, which lets the UI writer finish.
    _ui_tx: mpsc::Sender<UiEvent>,
}

/// The session manager event loop.
pub struct Hub {
    state: Arc<AppState>,
    events: mpsc::Receiver<HubEvent>,
    sessions: HashMap<String, SessionEntry>,
}

impl Hub {
    pub fn new(state: Arc<AppState>, events: mpsc::Receiver<HubEvent>) -> Self {
        Hub {
            state,
            events,
            sessions: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        info!("hub started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register {
                    host,
                    conn_id,
                    ui_tx,
                    reply,
                } => {
                    self.register(host, conn_id, ui_tx, reply).await;
                }
                HubEvent::Unregister { host, conn_id } => self.unregister(&host, conn_id),
                HubEvent::Shutdown => break,
            }
        }

        for (host, entry) in self.sessions.drain() {
            info!(%host, "closing session on hub shutdown");
            entry.cancel.cancel();
        }
        info!("hub stopped");
    }

    async fn register(
        &mut self,
        host: String,
        conn_id: u64,
        ui_tx: mpsc::Sender<UiEvent>,
        reply: oneshot::Sender<Registered>,
    ) {
        // One session per host: displace the previous connection fully
        // before standing up the new one.
        if let Some(old) = self.sessions.remove(&host) {
            warn!(%host, "duplicate UI connection, closing the previous one");
            old.cancel.cancel();
        }

        info!(%host, "UI connected");
        let cancel = CancellationToken::new();

        let session = match self.init_reader(&host).await {
            Ok(framed) => Some(self.spawn_session(&host, framed, ui_tx.clone(), cancel.clone())),
            Err(e) => {
                // No retry: the user refreshes the UI page to try
                // again.
                error!(%host, error = %e, "RFID unit initialization failed");
                let _ = ui_tx.send(UiEvent::rfid_error()).await;
                None
            }
        };

        let connected = session.is_some();
        self.sessions.insert(
            host.clone(),
            SessionEntry {
                conn_id,
                cancel: cancel.clone(),
                _ui_tx: ui_tx.clone(),
            },
        );

        if connected {
            info!(%host, "RFID unit connected and initialized");
            let _ = ui_tx.send(UiEvent::connected()).await;
        }
        let _ = reply.send(Registered { session, cancel });
    }

    fn unregister(&mut self, host: &str, conn_id: u64) {
        // A stale id means a displaced connection unregistering after
        // its replacement took over; leave the replacement alone.
        let matches = self
            .sessions
            .get(host)
            .is_some_and(|entry| entry.conn_id == conn_id);
        if matches {
            if let Some(entry) = self.sessions.remove(host) {
                entry.cancel.cancel();
                info!(%host, "UI connection lost");
            }
        }
    }

    /// Dial the RFID unit and run the version handshake.
    async fn init_reader(
        &self,
        host: &str,
    ) -> Result<Framed<TcpStream, LineCodec>, rfidbridge_core::Error> {
        let addr = format!("{host}:{}", self.state.cfg.tcp_port);
        let init = async {
            let stream = TcpStream::connect(&addr).await?;
            let mut framed = Framed::new(stream, LineCodec::new());

            let mut vendor = VendorCodec::new();
            let req = vendor.encode(&ReaderCommand::InitVersion);
            debug!(%addr, "-> RFID {:?}", req);
            framed.send(req).await?;

            let line = framed
                .next()
                .await
                .ok_or_else(|| io_eof("reader closed during handshake"))??;
            debug!(%addr, "<- RFID {:?}", line);

            let resp = vendor.decode(&line)?;
            if !resp.ok {
                return Err(rfidbridge_core::Error::InvalidReaderResponse {
                    message: "unit answered NOK to version handshake".to_string(),
                });
            }
            Ok(framed)
        };

        tokio::time::timeout(READER_INIT_TIMEOUT, init)
            .await
            .map_err(|_| io_timeout("reader handshake timed out"))?
    }

    /// Spawn the state machine and the reader I/O loops.
    fn spawn_session(
        &self,
        host: &str,
        framed: Framed<TcpStream, LineCodec>,
        ui_tx: mpsc::Sender<UiEvent>,
        cancel: CancellationToken,
    ) -> SessionHandle {
        let (req_tx, req_rx) = mpsc::channel::<UiRequest>(CHANNEL_DEPTH);
        let (line_tx, line_rx) = mpsc::channel::<String>(CHANNEL_DEPTH);
        let (cmd_tx, cmd_rx) = mpsc::channel::<String>(CHANNEL_DEPTH);

        let (read_half, write_half) = framed.into_inner().into_split();
        tokio::spawn(reader_read_loop(
            FramedRead::new(read_half, LineCodec::new()),
            line_tx,
            cancel.clone(),
        ));
        tokio::spawn(reader_write_loop(
            FramedWrite::new(write_half, LineCodec::new()),
            cmd_rx,
        ));

        let branch = self.state.cfg.branch_for(host).to_string();
        let fsm = SessionFsm::new(
            host.to_string(),
            branch,
            Arc::clone(&self.state.pool),
            SessionChannels {
                from_ui: req_rx,
                from_reader: line_rx,
                to_reader: cmd_tx,
                to_ui: ui_tx,
                cancel,
            },
        );
        tokio::spawn(fsm.run());

        SessionHandle { requests: req_tx }
    }
}

fn io_eof(msg: &str) -> rfidbridge_core::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg.to_string()).into()
}

fn io_timeout(msg: &str) -> rfidbridge_core::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, msg.to_string()).into()
}

/// Forward reply lines from the unit into the session. Exits on
/// connection loss (closing the channel signals the session) or on
/// cancellation.
async fn reader_read_loop(
    mut framed: FramedRead<OwnedReadHalf, LineCodec>,
    line_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = framed.next() => match line {
                Some(Ok(line)) => {
                    if line_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "reader framing error");
                    break;
                }
                None => break,
            },
        }
    }
}

/// Write encoded commands to the unit. Exits when the session drops
/// its sender, then half-closes the stream so the unit observes an
/// orderly shutdown before the connection is dropped.
async fn reader_write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LineCodec>,
    mut cmd_rx: mpsc::Receiver<String>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        if let Err(e) = sink.send(cmd).await {
            warn!(error = %e, "reader write failed");
            break;
        }
    }
    let _ = sink.get_mut().shutdown().await;
}
