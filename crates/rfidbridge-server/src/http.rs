//! The HTTP surface: a status endpoint and the WebSocket upgrade.
//!
//! Two routes only. `GET /status` returns process metrics as JSON;
//! `GET /ws` promotes the request to the persistent UI message stream
//! and hands it to [`ui::serve_connection`].

use crate::app::AppState;
use crate::ui;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Accept connections until cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(serve_http_connection(stream, peer, Arc::clone(&state)));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                break;
            }
        }
    }
    info!("HTTP server stopped");
}

async fn serve_http_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { route(req, state, peer).await }
    });

    // `with_upgrades` keeps the connection alive past the 101 response
    // so the WebSocket can take it over.
    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        debug!(%peer, error = %e, "HTTP connection ended with error");
    }
}

async fn route(
    req: Request<Incoming>,
    state: Arc<AppState>,
    peer: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let response = if req.method() == Method::GET && path == "/status" {
        status_response(&state)
    } else if req.method() == Method::GET && path == "/ws" {
        upgrade_ws(req, state, peer)
    } else {
        plain_response(StatusCode::NOT_FOUND, "not found")
    };
    Ok(response)
}

fn status_response(state: &AppState) -> Response<Full<Bytes>> {
    let report = state.metrics.export(state.pool.size());
    match serde_json::to_vec(&report) {
        Ok(body) => {
            let mut resp = Response::new(Full::new(Bytes::from(body)));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp
        }
        Err(e) => {
            error!(error = %e, "cannot serialize status report");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Promote an HTTP request to a WebSocket session.
fn upgrade_ws(
    mut req: Request<Incoming>,
    state: Arc<AppState>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let is_websocket = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return plain_response(StatusCode::BAD_REQUEST, "Not a websocket handshake");
    };
    if !is_websocket {
        return plain_response(StatusCode::BAD_REQUEST, "Not a websocket handshake");
    }

    let accept_key = derive_accept_key(key.as_bytes());
    let host = peer.ip().to_string();

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                ui::serve_connection(ws, host, state).await;
            }
            Err(e) => warn!(%peer, error = %e, "websocket upgrade failed"),
        }
    });

    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = resp.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(&accept_key) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    resp
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp
}
