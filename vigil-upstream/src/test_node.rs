//! Loopback servers standing in for ledger nodes and edge devices.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Serve `app` over HTTP on an ephemeral port; returns the base URL.
pub async fn spawn_http(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Accept up to `max_sockets` WebSocket clients, handing each to `handler`
/// with its 0-based accept order. The listener is closed afterwards so later
/// dials are refused. Returns the `ws://` URL and a live accept counter.
pub async fn spawn_ws<F, Fut>(max_sockets: usize, handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        for n in 0..max_sockets {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(socket) = tokio_tungstenite::accept_async(tcp).await else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handler(n, socket));
        }
    });
    (format!("ws://{addr}"), accepted)
}

/// Next JSON-RPC request on the socket, skipping control frames.
pub async fn next_request(socket: &mut ServerSocket) -> Option<Value> {
    while let Some(Ok(message)) = socket.next().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

pub fn reply(id: &Value, result: Value) -> Message {
    Message::Text(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
}
