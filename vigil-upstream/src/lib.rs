//! VIGIL Upstream - Ledger and Edge Clients
//!
//! Everything that talks to the outside world on the read path:
//!
//! - [`connector`]: the [`Connection`] capability and the retrying
//!   [`UpstreamConnector`] that establishes one at startup.
//! - [`transport`]: JSON-RPC over HTTP and over WebSocket.
//! - [`abi`]: call encoding and return decoding for the anomaly contract.
//! - [`ledger`] and [`edge`]: the two [`RecordSource`] implementations.
//! - [`store`]: [`RecordStore`], the best-effort full read placed behind the
//!   dashboard's `TimedCache`.

pub mod abi;
pub mod connector;
pub mod edge;
pub mod ledger;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_node;

pub use connector::{
    Connection, Credentials, Dialer, RetryPolicy, UpstreamConnector, DEFAULT_CALL_TIMEOUT,
};
pub use edge::{EdgeConnection, EdgeSource, RemoteArtifactStore};
pub use ledger::{ContractAddress, LedgerSource};
pub use store::{BestEffort, RecordSource, RecordStore, ANOMALY_LOG_KEY};
pub use transport::{HttpRpcTransport, TransportDialer, TransportKind, WsRpcTransport};
