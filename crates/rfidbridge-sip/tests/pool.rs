//! Pool integration tests against a scripted in-process SIP server.

use futures::{SinkExt, StreamExt};
use rfidbridge_protocol::LineCodec;
use rfidbridge_sip::{SipConfig, SipError, SipPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

const CHECKIN_RESP: &str =
    "101YNN20140124    093621AOHUTL|AB03011143299001|AQhvmu|AJ316 salmer og sanger|AA1|CS783.4|";

fn test_config(addr: std::net::SocketAddr, connections: usize) -> SipConfig {
    SipConfig {
        server: addr.to_string(),
        connections,
        connect_timeout: Duration::from_secs(2),
        repair_backoff: Duration::from_millis(20),
        ..SipConfig::default()
    }
}

/// Accept connections forever; authenticate each and echo the canned
/// response to every request.
async fn run_accepting_server(listener: TcpListener, response: &'static str) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(async move {
            let mut framed = Framed::new(stream, LineCodec::new());
            // Login turn.
            if framed.next().await.is_none() {
                return;
            }
            framed.send("941").await.ok();
            // Request turns.
            while let Some(Ok(_)) = framed.next().await {
                if framed.send(response).await.is_err() {
                    return;
                }
            }
        });
    }
}

async fn serve_login(stream: TcpStream, reply: &str) -> Framed<TcpStream, LineCodec> {
    let mut framed = Framed::new(stream, LineCodec::new());
    framed.next().await.unwrap().unwrap();
    framed.send(reply).await.unwrap();
    framed
}

#[tokio::test]
async fn test_pool_fill_and_size() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_accepting_server(listener, CHECKIN_RESP));

    let pool = SipPool::connect(test_config(addr, 2)).await.unwrap();
    assert_eq!(pool.size(), 2);

    let resp = pool.call("09N...").await.unwrap();
    assert_eq!(resp.code(), "10");
    assert_eq!(resp.field("AJ"), "316 salmer og sanger");

    // Session returned after the call.
    assert_eq!(pool.size(), 2);
}

#[tokio::test]
async fn test_login_distinct_credentials_per_slot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut logins = Vec::new();
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, LineCodec::new());
            logins.push(framed.next().await.unwrap().unwrap());
            framed.send("941").await.unwrap();
            // Keep the connection open past pool construction.
            tokio::spawn(async move { while framed.next().await.is_some() {} });
        }
        logins
    });

    let _pool = SipPool::connect(test_config(addr, 2)).await.unwrap();
    let logins = server.await.unwrap();

    assert_eq!(logins[0], "9300CNautouser1|COautopass1|CPHUTL|");
    assert_eq!(logins[1], "9300CNautouser2|COautopass2|CPHUTL|");
}

#[tokio::test]
async fn test_rejected_login_aborts_fill() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_login(stream, "940").await;
    });

    let err = SipPool::connect(test_config(addr, 1)).await.unwrap_err();
    assert!(matches!(err, SipError::LoginFailed { slot: 1 }));
}

#[tokio::test]
async fn test_concurrent_calls_share_single_slot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_accepting_server(listener, CHECKIN_RESP));

    let pool = Arc::new(SipPool::connect(test_config(addr, 1)).await.unwrap());

    // Both callers must complete; the second waits for the slot.
    let a = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.call("09N first").await.unwrap() }
    });
    let b = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.call("09N second").await.unwrap() }
    });

    a.await.unwrap();
    b.await.unwrap();
    assert_eq!(pool.size(), 1);
}

#[tokio::test]
async fn test_mid_call_retry_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First connection: log in, then hang up, simulating the
        // backend reaping an idle session.
        let (stream, _) = listener.accept().await.unwrap();
        let framed = serve_login(stream, "941").await;
        drop(framed);

        // Second connection (the repair): serve the call.
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = serve_login(stream, "941").await;
        framed.next().await.unwrap().unwrap();
        framed.send(CHECKIN_RESP).await.unwrap();
        // Hold the stream open until the test finishes.
        while framed.next().await.is_some() {}
    });

    let pool = Arc::new(SipPool::connect(test_config(addr, 1)).await.unwrap());
    Arc::clone(&pool).spawn_repair();

    let resp = pool.call("09N retry me").await.unwrap();
    assert_eq!(resp.field("AB"), "03011143299001");
    assert_eq!(pool.size(), 1);
}
