//! UI connection loops.
//!
//! Each staff browser holds one WebSocket connection carrying JSON
//! both ways. The writer drains the session's outbound event channel;
//! the reader parses requests and forwards them to the state machine
//! for as long as it is alive. Events for a disconnected client are
//! not buffered anywhere; they die with the channel.

use crate::app::AppState;
use crate::hub::{HubEvent, Registered};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rfidbridge_core::{Action, UiEvent, UiRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

const EVENT_CHANNEL_DEPTH: usize = 10;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Serve one upgraded WebSocket connection until it closes or the hub
/// tears it down.
pub async fn serve_connection<S>(ws: WebSocketStream<S>, host: String, state: Arc<AppState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    state.metrics.client_connected();

    let (events_tx, events_rx) = mpsc::channel::<UiEvent>(EVENT_CHANNEL_DEPTH);
    let (reply_tx, reply_rx) = oneshot::channel();

    let registered = if state
        .hub
        .send(HubEvent::Register {
            host: host.clone(),
            conn_id,
            ui_tx: events_tx.clone(),
            reply: reply_tx,
        })
        .await
        .is_ok()
    {
        reply_rx.await.ok()
    } else {
        None
    };

    if let Some(registered) = registered {
        let (sink, stream) = ws.split();
        let writer = tokio::spawn(write_loop(sink, events_rx, host.clone()));

        read_loop(stream, registered, events_tx, &host).await;

        let _ = state
            .hub
            .send(HubEvent::Unregister {
                host: host.clone(),
                conn_id,
            })
            .await;
        let _ = writer.await;
    } else {
        error!(%host, "hub rejected UI registration");
    }

    state.metrics.client_disconnected();
    debug!(%host, conn_id, "UI connection finished");
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut events_rx: mpsc::Receiver<UiEvent>,
    host: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(event) = events_rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!(%host, error = %e, "cannot serialize UI event");
                continue;
            }
        };
        debug!(%host, "-> UI {}", json);
        if sink.send(Message::text(json)).await.is_err() {
            // Writer exits; the manager observes the reader's exit.
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    registered: Registered,
    events_tx: mpsc::Sender<UiEvent>,
    host: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = registered.session;

    loop {
        let msg = tokio::select! {
            _ = registered.cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else { continue };
        if text.is_empty() {
            continue;
        }

        match serde_json::from_str::<UiRequest>(text) {
            Ok(req) => {
                debug!(%host, "<- UI {}", text);
                if let Some(handle) = &session {
                    if handle.requests.send(req).await.is_err() {
                        // The state machine stopped; this request and
                        // the ones after it are dropped.
                        warn!(%host, "session has terminated, dropping UI request");
                        session = None;
                    }
                }
            }
            Err(e) => {
                warn!(%host, "failed to parse UI request: {:?}", text);
                let event = UiEvent::user_error(
                    Action::Connect,
                    format!("Failed to parse the JSON request: {e}"),
                );
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}
