//! Upstream connection establishment with fixed-delay retry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use vigil_core::{ConnectionError, UpstreamError};

use crate::transport::{TransportDialer, TransportKind};

/// Connection attempts made before giving up.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Delay between failed connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bound on any single upstream call, including each dial.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How many times to dial and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Attempts actually made. Zero is treated as one.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Optional bearer credential presented to the upstream.
#[derive(Clone, Default)]
pub struct Credentials {
    bearer: Option<SecretString>,
}

impl Credentials {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            bearer: Some(SecretString::new(token.into())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer.is_none()
    }

    /// Value for an `Authorization` header, if any.
    pub fn authorization(&self) -> Option<String> {
        self.bearer
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bearer {
            Some(_) => write!(f, "Credentials(Bearer [REDACTED])"),
            None => write!(f, "Credentials(None)"),
        }
    }
}

/// A live upstream connection.
///
/// Ledger transports interpret `raw_call` as a JSON-RPC method with
/// positional `params`; the edge transport interprets `method` as a request
/// path and ignores `params`.
#[async_trait]
pub trait Connection: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Liveness check. Answers from known state where it can and makes at
    /// most one request or dial otherwise. Never retries.
    async fn is_connected(&self) -> bool;

    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, UpstreamError>;
}

/// Produces a fresh [`Connection`] for each connection attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn dial(&self) -> Result<Arc<dyn Connection>, UpstreamError>;
}

/// Establishes upstream connections under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl Default for UpstreamConnector {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_CALL_TIMEOUT)
    }
}

impl UpstreamConnector {
    pub fn new(policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            policy,
            call_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Connect to a ledger node. `ws://` and `wss://` endpoints get a
    /// persistent WebSocket transport, `http://` and `https://` endpoints a
    /// request/response transport.
    pub async fn connect_ledger(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        let kind = TransportKind::for_ledger_endpoint(endpoint)?;
        let dialer = TransportDialer::new(kind, endpoint, credentials.clone(), self.call_timeout);
        self.establish(&dialer).await
    }

    /// Connect to an edge device serving the dashboard API at `base_url`.
    pub async fn connect_edge(
        &self,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        TransportKind::validate_http(base_url)?;
        let dialer = TransportDialer::new(
            TransportKind::Edge,
            base_url,
            credentials.clone(),
            self.call_timeout,
        );
        self.establish(&dialer).await
    }

    /// Dial until a connection reports itself live or attempts run out.
    ///
    /// A dial that succeeds but fails its liveness probe counts as a failed
    /// attempt. There is no delay after the final attempt.
    pub async fn establish<D>(&self, dialer: &D) -> Result<Arc<dyn Connection>, ConnectionError>
    where
        D: Dialer + ?Sized,
    {
        let max = self.policy.max_attempts();
        let endpoint = dialer.endpoint().to_string();
        let mut last_error = String::new();

        for attempt in 1..=max {
            tracing::info!(attempt, max, endpoint = %endpoint, "Attempting upstream connection");

            match tokio::time::timeout(self.call_timeout, dialer.dial()).await {
                Ok(Ok(conn)) => {
                    if conn.is_connected().await {
                        tracing::info!(attempt, endpoint = %endpoint, "Connected to upstream");
                        return Ok(conn);
                    }
                    last_error = "liveness probe failed after dial".to_string();
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = UpstreamError::timeout("connect", self.call_timeout).to_string(),
            }
            tracing::warn!(attempt, max, endpoint = %endpoint, error = %last_error, "Connection attempt failed");

            if attempt < max {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        tracing::error!(attempts = max, endpoint = %endpoint, "Failed to connect to upstream after retries");
        Err(ConnectionError::RetriesExhausted {
            endpoint,
            attempts: max,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubConnection {
        live: bool,
    }

    #[async_trait]
    impl Connection for StubConnection {
        fn endpoint(&self) -> &str {
            "stub://ledger"
        }

        async fn is_connected(&self) -> bool {
            self.live
        }

        async fn raw_call(&self, _method: &str, _params: Value) -> Result<Value, UpstreamError> {
            Ok(Value::Null)
        }
    }

    /// Fails until attempt `succeed_on` (1-based); `None` never succeeds.
    struct FlakyDialer {
        attempts: AtomicU32,
        succeed_on: Option<u32>,
        dead_on_arrival: bool,
    }

    impl FlakyDialer {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                attempts: AtomicU32::new(0),
                succeed_on,
                dead_on_arrival: false,
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dialer for FlakyDialer {
        fn endpoint(&self) -> &str {
            "stub://ledger"
        }

        async fn dial(&self) -> Result<Arc<dyn Connection>, UpstreamError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.succeed_on {
                Some(n) if attempt >= n => Ok(Arc::new(StubConnection {
                    live: !self.dead_on_arrival,
                })),
                _ => Err(UpstreamError::transport("connect", "connection refused")),
            }
        }
    }

    fn expect_failure(result: Result<Arc<dyn Connection>, ConnectionError>) -> ConnectionError {
        match result {
            Ok(conn) => panic!("unexpectedly connected to {}", conn.endpoint()),
            Err(e) => e,
        }
    }

    fn connector(attempts: u32) -> UpstreamConnector {
        UpstreamConnector::new(
            RetryPolicy::new(attempts, Duration::ZERO),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(5));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn test_credentials_redacted() {
        let creds = Credentials::bearer("s3cret");
        assert_eq!(creds.authorization().as_deref(), Some("Bearer s3cret"));
        assert!(!format!("{creds:?}").contains("s3cret"));
        assert!(Credentials::none().authorization().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_exhausts_exact_attempts() {
        let dialer = FlakyDialer::new(None);
        let err = expect_failure(connector(3).establish(&dialer).await);

        assert_eq!(dialer.attempts(), 3);
        match err {
            ConnectionError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_second_attempt() {
        let dialer = FlakyDialer::new(Some(2));
        let conn = connector(3).establish(&dialer).await.unwrap();

        assert_eq!(dialer.attempts(), 2);
        assert!(conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_dead_connection_counts_as_failure() {
        let dialer = FlakyDialer {
            dead_on_arrival: true,
            ..FlakyDialer::new(Some(1))
        };
        let err = expect_failure(connector(2).establish(&dialer).await);
        assert_eq!(dialer.attempts(), 2);
        assert!(matches!(err, ConnectionError::RetriesExhausted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_final_attempt() {
        let dialer = FlakyDialer::new(None);
        let connector =
            UpstreamConnector::new(RetryPolicy::new(3, Duration::from_secs(5)), DEFAULT_CALL_TIMEOUT);

        let started = tokio::time::Instant::now();
        expect_failure(connector.establish(&dialer).await);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_invalid_ledger_scheme_rejected() {
        let err = expect_failure(
            connector(1)
                .connect_ledger("ftp://node:21", &Credentials::none())
                .await,
        );
        assert!(matches!(err, ConnectionError::InvalidEndpoint { .. }));
    }
}
