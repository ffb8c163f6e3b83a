//! Anomaly log stored in a ledger contract, read with `eth_call`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use vigil_core::{AnomalyRecord, ConfigError, UpstreamError};

use crate::abi;
use crate::connector::Connection;
use crate::store::RecordSource;

/// A 20-byte contract address, normalised to lowercase `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractAddress(String);

impl ContractAddress {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidValue {
                field: "CONTRACT_ADDRESS".to_string(),
                value: raw.to_string(),
                reason: "expected 20 bytes of hex".to_string(),
            });
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads `getAnomalyCount()` and `getAnomaly(i)` from the anomaly contract.
pub struct LedgerSource {
    conn: Arc<dyn Connection>,
    contract: ContractAddress,
}

impl LedgerSource {
    pub fn new(conn: Arc<dyn Connection>, contract: ContractAddress) -> Self {
        Self { conn, contract }
    }

    pub fn contract(&self) -> &ContractAddress {
        &self.contract
    }

    async fn call(&self, operation: &str, data: String) -> Result<Vec<u8>, UpstreamError> {
        let params = json!([{ "to": self.contract.as_str(), "data": data }, "latest"]);
        let result = self.conn.raw_call("eth_call", params).await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| UpstreamError::decode(operation, "eth_call result is not a hex string"))?;
        abi::decode_hex(encoded).map_err(|e| UpstreamError::decode(operation, e))
    }
}

#[async_trait]
impl RecordSource for LedgerSource {
    fn name(&self) -> &'static str {
        "ledger"
    }

    async fn count(&self) -> Result<u64, UpstreamError> {
        let data = self
            .call("getAnomalyCount", abi::encode_get_anomaly_count())
            .await?;
        abi::decode_uint(&data).map_err(|e| UpstreamError::decode("getAnomalyCount", e))
    }

    async fn record_at(&self, index: u64) -> Result<AnomalyRecord, UpstreamError> {
        let data = self
            .call("getAnomaly", abi::encode_get_anomaly(index))
            .await?;
        let raw = abi::decode_anomaly(&data).map_err(|e| UpstreamError::decode("getAnomaly", e))?;
        // The contract stores no timestamp; records are stamped when read.
        Ok(AnomalyRecord::new(
            index,
            raw.folder,
            raw.frame,
            raw.error,
            Utc::now(),
        ))
    }

    async fn is_connected(&self) -> bool {
        self.conn.is_connected().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::test_encoding::{encode_anomaly, encode_uint};
    use crate::store::RecordStore;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Answers `eth_call` from a fixed list of (folder, frame, error) rows.
    struct FakeNode {
        rows: Vec<(&'static str, u64, &'static str)>,
        corrupt_index: Option<u64>,
        calls: Mutex<Vec<Value>>,
    }

    impl FakeNode {
        fn new(rows: Vec<(&'static str, u64, &'static str)>) -> Self {
            Self {
                rows,
                corrupt_index: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connection for FakeNode {
        fn endpoint(&self) -> &str {
            "http://fake-node"
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn raw_call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
            assert_eq!(method, "eth_call");
            self.calls.lock().unwrap().push(params.clone());

            let data = params[0]["data"].as_str().unwrap_or_default().to_string();
            let bytes = abi::decode_hex(&data).unwrap();
            let (selector, args) = bytes.split_at(4);

            let out = if selector == abi::GET_ANOMALY_COUNT {
                encode_uint(self.rows.len() as u64)
            } else if selector == abi::GET_ANOMALY {
                let index = abi::decode_uint(args).unwrap();
                if Some(index) == self.corrupt_index {
                    vec![0u8; 16]
                } else {
                    let (folder, frame, error) = self.rows[index as usize];
                    encode_anomaly(folder, frame, error)
                }
            } else {
                return Err(UpstreamError::Rpc {
                    operation: "eth_call".to_string(),
                    code: -32000,
                    message: "execution reverted".to_string(),
                });
            };
            Ok(Value::String(format!("0x{}", hex::encode(out))))
        }
    }

    const CONTRACT: &str = "0x279FcACc1eB244BBD7Be138D34F3f562Da179dd5";

    fn source(node: FakeNode) -> (Arc<FakeNode>, LedgerSource) {
        let node = Arc::new(node);
        let source = LedgerSource::new(node.clone(), ContractAddress::parse(CONTRACT).unwrap());
        (node, source)
    }

    #[test]
    fn test_contract_address_parse() {
        let address = ContractAddress::parse(CONTRACT).unwrap();
        assert_eq!(address.as_str(), "0x279fcacc1eb244bbd7be138d34f3f562da179dd5");
        assert!(ContractAddress::parse("0x1234").is_err());
        assert!(ContractAddress::parse("0xzz9FcACc1eB244BBD7Be138D34F3f562Da179dd5").is_err());
        assert!(ContractAddress::parse("279FcACc1eB244BBD7Be138D34F3f562Da179dd5").is_ok());
    }

    #[tokio::test]
    async fn test_count_and_record() {
        let (node, source) = source(FakeNode::new(vec![("video_3", 42, "0.87"), ("video_5", 7, "1.2")]));

        assert_eq!(source.count().await.unwrap(), 2);
        let record = source.record_at(0).await.unwrap();
        assert_eq!(record.index, 0);
        assert_eq!(record.folder, "video_3");
        assert_eq!(record.frame, 42);
        assert_eq!(record.error, "0.87");

        let calls = node.calls.lock().unwrap();
        assert_eq!(calls[0][0]["to"], "0x279fcacc1eb244bbd7be138d34f3f562da179dd5");
        assert_eq!(calls[0][1], "latest");
    }

    #[tokio::test]
    async fn test_corrupt_record_dropped_by_fetch_all() {
        let mut node = FakeNode::new(vec![
            ("video_1", 1, "0.1"),
            ("video_2", 2, "0.2"),
            ("video_3", 3, "0.3"),
        ]);
        node.corrupt_index = Some(1);
        let (_node, source) = source(node);
        let store = RecordStore::new(Arc::new(source));

        let result = store.fetch_all().await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.dropped, 1);
        assert_eq!(result.items[1].folder, "video_3");
    }

    #[tokio::test]
    async fn test_decode_failure_is_decode_error() {
        let mut node = FakeNode::new(vec![("video_1", 1, "0.1")]);
        node.corrupt_index = Some(0);
        let (_node, source) = source(node);
        assert!(matches!(
            source.record_at(0).await,
            Err(UpstreamError::Decode { .. })
        ));
    }
}
