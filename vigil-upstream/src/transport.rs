//! JSON-RPC transports for ledger nodes.
//!
//! [`HttpRpcTransport`] issues one POST per call. [`WsRpcTransport`] keeps a
//! single WebSocket open and serialises calls over it, matching responses by
//! request id and skipping anything else the node pushes. It redials when the
//! node drops the socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{http, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use vigil_core::{ConnectionError, UpstreamError};

use crate::connector::{Connection, Credentials, Dialer};
use crate::edge::EdgeConnection;

/// Which transport a [`TransportDialer`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// JSON-RPC over HTTP POST.
    Http,
    /// JSON-RPC over a persistent WebSocket.
    Ws,
    /// Edge device dashboard API over HTTP GET.
    Edge,
}

impl TransportKind {
    /// Pick the ledger transport from the endpoint scheme.
    pub fn for_ledger_endpoint(endpoint: &str) -> Result<Self, ConnectionError> {
        match parse_scheme(endpoint)?.as_str() {
            "ws" | "wss" => Ok(Self::Ws),
            "http" | "https" => Ok(Self::Http),
            other => Err(invalid_endpoint(
                endpoint,
                format!("unsupported scheme {other:?}, expected ws, wss, http or https"),
            )),
        }
    }

    pub fn validate_http(endpoint: &str) -> Result<(), ConnectionError> {
        match parse_scheme(endpoint)?.as_str() {
            "http" | "https" => Ok(()),
            other => Err(invalid_endpoint(
                endpoint,
                format!("unsupported scheme {other:?}, expected http or https"),
            )),
        }
    }
}

fn parse_scheme(endpoint: &str) -> Result<String, ConnectionError> {
    reqwest::Url::parse(endpoint)
        .map(|url| url.scheme().to_ascii_lowercase())
        .map_err(|e| invalid_endpoint(endpoint, e.to_string()))
}

fn invalid_endpoint(endpoint: &str, reason: impl Into<String>) -> ConnectionError {
    ConnectionError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.into(),
    }
}

/// Headers sent with every HTTP request to the upstream.
pub(crate) fn auth_headers(credentials: &Credentials) -> Result<HeaderMap, UpstreamError> {
    let mut headers = HeaderMap::new();
    if let Some(value) = credentials.authorization() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value)
                .map_err(|e| UpstreamError::transport("build headers", e))?,
        );
    }
    Ok(headers)
}

/// Map a reqwest failure, keeping timeouts distinct.
pub(crate) fn request_error(operation: &str, timeout: Duration, err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout(operation, timeout)
    } else {
        UpstreamError::transport(operation, err)
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

impl RpcResponse {
    fn into_result(self, method: &str) -> Result<Value, UpstreamError> {
        if let Some(error) = self.error {
            return Err(UpstreamError::Rpc {
                operation: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| UpstreamError::decode(method, "response has neither result nor error"))
    }
}

fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// JSON-RPC over HTTP POST.
pub struct HttpRpcTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpcTransport {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(auth_headers(credentials)?)
            .build()
            .map_err(|e| UpstreamError::transport("build client", e))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl Connection for HttpRpcTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_connected(&self) -> bool {
        self.raw_call("eth_blockNumber", json!([])).await.is_ok()
    }

    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request_body(id, method, params))
            .send()
            .await
            .map_err(|e| request_error(method, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                operation: method.to_string(),
                status: status.as_u16(),
            });
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::decode(method, e))?;
        body.into_result(method)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open_socket(endpoint: &str, credentials: &Credentials) -> Result<WsStream, UpstreamError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| UpstreamError::transport("connect", e))?;
    if let Some(value) = credentials.authorization() {
        request.headers_mut().insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_str(&value)
                .map_err(|e| UpstreamError::transport("connect", e))?,
        );
    }

    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| UpstreamError::transport("connect", e))?;
    Ok(stream)
}

/// Errors after which the socket cannot carry another call.
fn is_socket_failure(err: &UpstreamError) -> bool {
    matches!(err, UpstreamError::Closed | UpstreamError::Transport { .. })
}

/// Send one request and read frames until the response with `id` arrives.
///
/// Notifications, responses to abandoned calls and unparseable frames are
/// skipped. Pings are answered.
async fn exchange(
    stream: &mut WsStream,
    id: u64,
    method: &str,
    params: Value,
) -> Result<Value, UpstreamError> {
    let payload = request_body(id, method, params).to_string();
    stream
        .send(Message::Text(payload))
        .await
        .map_err(|e| UpstreamError::transport(method, e))?;

    let expected = json!(id);
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let response: RpcResponse = match serde_json::from_str(&text) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring unparseable WebSocket frame");
                        continue;
                    }
                };
                if response.id == expected {
                    return response.into_result(method);
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                stream
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| UpstreamError::transport(method, e))?;
            }
            Some(Ok(Message::Close(_))) | None => return Err(UpstreamError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(UpstreamError::transport(method, e)),
        }
    }
}

/// JSON-RPC over a single persistent WebSocket.
///
/// A dropped socket is redialed on the next call. A call that finds an
/// already-open socket dead is retried once on a fresh one; `eth_call` is
/// read-only so the retry is safe.
pub struct WsRpcTransport {
    endpoint: String,
    credentials: Credentials,
    stream: Mutex<Option<WsStream>>,
    open: AtomicBool,
    timeout: Duration,
    next_id: AtomicU64,
}

impl WsRpcTransport {
    pub async fn connect(
        endpoint: impl Into<String>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let endpoint = endpoint.into();
        let stream = open_socket(&endpoint, credentials).await?;

        Ok(Self {
            endpoint,
            credentials: credentials.clone(),
            stream: Mutex::new(Some(stream)),
            open: AtomicBool::new(true),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// The socket in `slot`, dialing a new one if it was dropped.
    async fn ensure_open<'a>(
        &self,
        slot: &'a mut Option<WsStream>,
    ) -> Result<&'a mut WsStream, UpstreamError> {
        if slot.is_none() {
            let stream = open_socket(&self.endpoint, &self.credentials).await?;
            tracing::info!(endpoint = %self.endpoint, "WebSocket reconnected");
            *slot = Some(stream);
            self.open.store(true, Ordering::Relaxed);
        }
        slot.as_mut().ok_or(UpstreamError::Closed)
    }

    async fn call(&self, id: u64, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let mut slot = self.stream.lock().await;
        let mut may_retry = slot.is_some();

        loop {
            let stream = self.ensure_open(&mut *slot).await?;
            match exchange(stream, id, method, params.clone()).await {
                Err(e) if is_socket_failure(&e) => {
                    *slot = None;
                    self.open.store(false, Ordering::Relaxed);
                    if !may_retry {
                        return Err(e);
                    }
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "WebSocket dropped, redialing");
                    may_retry = false;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl Connection for WsRpcTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Reports the socket state. A dropped socket gets one redial attempt so
    /// a recovered node reads as live again.
    async fn is_connected(&self) -> bool {
        if self.open.load(Ordering::Relaxed) {
            return true;
        }
        let mut slot = self.stream.lock().await;
        matches!(
            tokio::time::timeout(self.timeout, self.ensure_open(&mut *slot)).await,
            Ok(Ok(_))
        )
    }

    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tokio::time::timeout(self.timeout, self.call(id, method, params))
            .await
            .map_err(|_| UpstreamError::timeout(method, self.timeout))?
    }
}

/// Builds a new transport of a given kind on every dial.
#[derive(Debug, Clone)]
pub struct TransportDialer {
    kind: TransportKind,
    endpoint: String,
    credentials: Credentials,
    timeout: Duration,
}

impl TransportDialer {
    pub fn new(
        kind: TransportKind,
        endpoint: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            credentials,
            timeout,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}

#[async_trait]
impl Dialer for TransportDialer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dial(&self) -> Result<Arc<dyn Connection>, UpstreamError> {
        let conn: Arc<dyn Connection> = match self.kind {
            TransportKind::Http => Arc::new(HttpRpcTransport::new(
                self.endpoint.clone(),
                &self.credentials,
                self.timeout,
            )?),
            TransportKind::Ws => Arc::new(
                WsRpcTransport::connect(self.endpoint.clone(), &self.credentials, self.timeout)
                    .await?,
            ),
            TransportKind::Edge => Arc::new(EdgeConnection::new(
                self.endpoint.clone(),
                &self.credentials,
                self.timeout,
            )?),
        };
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_node::{next_request, reply, spawn_http, spawn_ws, ServerSocket};
    use axum::{http::StatusCode, routing::post, Json, Router};

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn ws(url: &str) -> WsRpcTransport {
        WsRpcTransport::connect(url, &Credentials::none(), TIMEOUT)
            .await
            .unwrap()
    }

    async fn block_number(conn: &dyn Connection) -> Result<Value, UpstreamError> {
        conn.raw_call("eth_blockNumber", json!([])).await
    }

    #[test]
    fn test_ledger_scheme_selection() {
        assert_eq!(
            TransportKind::for_ledger_endpoint("wss://node.example/ws/v3/key").unwrap(),
            TransportKind::Ws
        );
        assert_eq!(
            TransportKind::for_ledger_endpoint("ws://127.0.0.1:8546").unwrap(),
            TransportKind::Ws
        );
        assert_eq!(
            TransportKind::for_ledger_endpoint("http://127.0.0.1:8545").unwrap(),
            TransportKind::Http
        );
        assert_eq!(
            TransportKind::for_ledger_endpoint("HTTPS://node.example").unwrap(),
            TransportKind::Http
        );
        assert!(TransportKind::for_ledger_endpoint("not a url").is_err());
        assert!(TransportKind::for_ledger_endpoint("ftp://node.example").is_err());
    }

    #[test]
    fn test_edge_requires_http() {
        assert!(TransportKind::validate_http("https://abc.ngrok-free.app").is_ok());
        assert!(TransportKind::validate_http("ws://abc").is_err());
    }

    #[test]
    fn test_rpc_response_result() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":"0x2a"}"#).unwrap();
        assert_eq!(response.id, json!(7));
        assert_eq!(response.into_result("eth_call").unwrap(), json!("0x2a"));
    }

    #[test]
    fn test_rpc_response_error() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#,
        )
        .unwrap();
        let err = response.into_result("eth_call").unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Rpc {
                operation: "eth_call".to_string(),
                code: -32000,
                message: "execution reverted".to_string(),
            }
        );
    }

    #[test]
    fn test_rpc_response_empty_is_decode_error() {
        let response: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(matches!(
            response.into_result("eth_call"),
            Err(UpstreamError::Decode { .. })
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let body = request_body(3, "eth_call", json!([{"to": "0x00"}, "latest"]));
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 3);
        assert_eq!(body["method"], "eth_call");
        assert_eq!(body["params"][1], "latest");
    }

    #[test]
    fn test_auth_headers() {
        let headers = auth_headers(&Credentials::bearer("tok")).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert!(auth_headers(&Credentials::none()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_round_trip_and_rpc_error() {
        let app = Router::new().route(
            "/",
            post(|Json(body): Json<Value>| async move {
                match body["method"].as_str() {
                    Some("eth_blockNumber") => {
                        Json(json!({"jsonrpc": "2.0", "id": body["id"], "result": "0x10"}))
                    }
                    _ => Json(json!({
                        "jsonrpc": "2.0",
                        "id": body["id"],
                        "error": {"code": -32601, "message": "method not found"}
                    })),
                }
            }),
        );
        let url = spawn_http(app).await;
        let transport = HttpRpcTransport::new(format!("{url}/"), &Credentials::none(), TIMEOUT).unwrap();

        assert_eq!(block_number(&transport).await.unwrap(), json!("0x10"));
        assert!(transport.is_connected().await);
        assert!(matches!(
            transport.raw_call("eth_mine", json!([])).await,
            Err(UpstreamError::Rpc { code: -32601, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_status_and_timeout() {
        let app = Router::new()
            .route("/fail", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/slow",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"}))
                }),
            );
        let url = spawn_http(app).await;

        let failing =
            HttpRpcTransport::new(format!("{url}/fail"), &Credentials::none(), TIMEOUT).unwrap();
        assert!(matches!(
            block_number(&failing).await,
            Err(UpstreamError::Status { status: 500, .. })
        ));
        assert!(!failing.is_connected().await);

        let slow = HttpRpcTransport::new(
            format!("{url}/slow"),
            &Credentials::none(),
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(block_number(&slow).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_ws_skips_unrelated_frames_and_answers_pings() {
        let (url, _) = spawn_ws(1, |_, mut socket: ServerSocket| async move {
            while let Some(request) = next_request(&mut socket).await {
                let noise = [
                    Message::Text(
                        r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{}}"#.to_string(),
                    ),
                    reply(&json!(9999), json!("0xdead")),
                    Message::Text("not json".to_string()),
                    Message::Ping(b"hb".to_vec()),
                ];
                for message in noise {
                    if socket.send(message).await.is_err() {
                        return;
                    }
                }
                // Hold the answer until the client has ponged.
                loop {
                    match socket.next().await {
                        Some(Ok(Message::Pong(payload))) if payload == b"hb" => break,
                        Some(Ok(_)) => {}
                        _ => return,
                    }
                }
                if socket.send(reply(&request["id"], json!("0x2a"))).await.is_err() {
                    return;
                }
            }
        })
        .await;

        let transport = ws(&url).await;
        assert_eq!(block_number(&transport).await.unwrap(), json!("0x2a"));
        assert_eq!(block_number(&transport).await.unwrap(), json!("0x2a"));
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_ws_redials_after_node_closes_socket() {
        let (url, accepted) = spawn_ws(2, |n, mut socket: ServerSocket| async move {
            while let Some(request) = next_request(&mut socket).await {
                let result = json!(format!("0x{}", n + 1));
                if socket.send(reply(&request["id"], result)).await.is_err() {
                    return;
                }
                if n == 0 {
                    let _ = socket.close(None).await;
                    return;
                }
            }
        })
        .await;

        let transport = ws(&url).await;
        assert_eq!(block_number(&transport).await.unwrap(), json!("0x1"));
        assert_eq!(block_number(&transport).await.unwrap(), json!("0x2"));
        assert_eq!(block_number(&transport).await.unwrap(), json!("0x2"));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_ws_unreachable_after_close_reports_disconnected() {
        let (url, _) = spawn_ws(1, |_, mut socket: ServerSocket| async move {
            if let Some(request) = next_request(&mut socket).await {
                let _ = socket.send(reply(&request["id"], json!("0x1"))).await;
            }
            let _ = socket.close(None).await;
        })
        .await;

        let transport = ws(&url).await;
        assert_eq!(block_number(&transport).await.unwrap(), json!("0x1"));

        let err = block_number(&transport).await.unwrap_err();
        assert!(is_socket_failure(&err), "unexpected error: {err:?}");
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_ws_unanswered_call_times_out() {
        let (url, _) = spawn_ws(1, |_, mut socket: ServerSocket| async move {
            while next_request(&mut socket).await.is_some() {}
        })
        .await;

        let transport =
            WsRpcTransport::connect(url.as_str(), &Credentials::none(), Duration::from_millis(100))
                .await
                .unwrap();
        let err = transport.raw_call("eth_call", json!([])).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(transport.is_connected().await);
    }
}
