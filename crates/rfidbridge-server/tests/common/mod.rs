//! Shared test doubles: a scriptable RFID unit, a scriptable SIP
//! server, and a WebSocket client playing the staff UI.

use futures::{SinkExt, StreamExt};
use rfidbridge_core::{Config, UiEvent};
use rfidbridge_protocol::LineCodec;
use rfidbridge_server::App;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(5);

/// A fake RFID unit. Accepts one TCP connection at a time; commands
/// it receives surface on `commands`, replies are scripted through
/// `reply`. When the bridge drops a connection the unit goes back to
/// accepting, so displacement scenarios can reconnect.
pub struct DummyReader {
    pub port: u16,
    commands: mpsc::Receiver<String>,
    replies: mpsc::Sender<String>,
}

impl DummyReader {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (cmd_tx, commands) = mpsc::channel(32);
        let (replies, mut reply_rx) = mpsc::channel::<String>(32);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut framed = Framed::new(stream, LineCodec::new());
                loop {
                    tokio::select! {
                        line = framed.next() => match line {
                            Some(Ok(line)) => {
                                if cmd_tx.send(line).await.is_err() {
                                    return;
                                }
                            }
                            // Connection gone; accept the next one.
                            _ => break,
                        },
                        reply = reply_rx.recv() => match reply {
                            Some(reply) => {
                                if framed.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        DummyReader {
            port,
            commands,
            replies,
        }
    }

    /// Assert the next command from the bridge.
    pub async fn expect(&mut self, want: &str) {
        let got = tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for reader command {want:?}"))
            .expect("reader command channel closed");
        assert_eq!(got, want, "unexpected reader command");
    }

    /// Script the next reply to the bridge.
    pub async fn reply(&self, line: &str) {
        self.replies.send(line.to_string()).await.unwrap();
    }
}

/// How the fake SIP server behaves after accepting a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipMode {
    /// Authenticate, then answer requests from the scripted queue;
    /// close the connection when the queue is empty.
    Normal,
    /// Reject every login with 940.
    RejectLogin,
    /// Authenticate, then hang up as soon as a request arrives.
    DropOnRequest,
}

/// A fake SIP server.
pub struct DummySip {
    pub addr: String,
    responses: Arc<Mutex<VecDeque<String>>>,
}

impl DummySip {
    pub async fn start(mode: SipMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let responses: Arc<Mutex<VecDeque<String>>> = Arc::default();

        let scripted = Arc::clone(&responses);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_sip_conn(stream, mode, Arc::clone(&scripted)));
            }
        });

        DummySip { addr, responses }
    }

    /// Queue the response for the next request.
    pub fn respond(&self, line: &str) {
        self.responses.lock().unwrap().push_back(line.to_string());
    }
}

async fn serve_sip_conn(stream: TcpStream, mode: SipMode, scripted: Arc<Mutex<VecDeque<String>>>) {
    let mut framed = Framed::new(stream, LineCodec::new());

    // Login turn.
    if framed.next().await.is_none() {
        return;
    }
    let login_reply = if mode == SipMode::RejectLogin { "940" } else { "941" };
    if framed.send(login_reply).await.is_err() || mode == SipMode::RejectLogin {
        return;
    }

    // Request turns.
    while let Some(Ok(_request)) = framed.next().await {
        if mode == SipMode::DropOnRequest {
            return;
        }
        let Some(response) = scripted.lock().unwrap().pop_front() else {
            // Nothing scripted: drop the connection like a backend
            // reaping its client.
            return;
        };
        if framed.send(response).await.is_err() {
            return;
        }
    }
}

/// A WebSocket client standing in for the staff browser.
pub struct UiClient {
    pub ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl UiClient {
    pub async fn connect(app: &App) -> Self {
        let url = format!("ws://127.0.0.1:{}/ws", app.http_addr().port());
        let (ws, _) = tokio::time::timeout(WAIT, connect_async(url))
            .await
            .expect("timed out connecting to bridge")
            .expect("websocket handshake failed");
        UiClient { ws }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    /// Read events until a JSON text frame arrives.
    pub async fn recv_event(&mut self) -> UiEvent {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for UI event")
                .expect("websocket closed while waiting for UI event")
                .expect("websocket error while waiting for UI event");
            if let Ok(text) = msg.to_text() {
                if !text.is_empty() {
                    return serde_json::from_str(text).expect("malformed UI event");
                }
            }
        }
    }

    /// Assert that the server closes this connection.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for connection close")
            {
                None => return,
                Some(Err(_)) => return,
                Some(Ok(msg)) if msg.is_close() => return,
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Stand up a full bridge on ephemeral ports.
pub async fn start_app(reader_port: u16, sip_addr: &str) -> App {
    let cfg = Config {
        tcp_port: reader_port,
        http_port: 0,
        sip_server: sip_addr.to_string(),
        num_sip_connections: 1,
        ..Config::default()
    };
    App::start(cfg).await.expect("bridge failed to start")
}
