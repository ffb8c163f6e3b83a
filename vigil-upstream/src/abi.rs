//! Call encoding and return decoding for the anomaly log contract.
//!
//! The contract exposes:
//!
//! ```text
//! getAnomalyCount() returns (uint256)
//! getAnomaly(uint256 index) returns (string folder, uint256 frame, string error)
//! ```
//!
//! Only the subset of the Solidity ABI those two signatures need is handled
//! here: 32-byte big-endian words, and dynamic strings addressed by offset.

use thiserror::Error;

/// Selector of `getAnomalyCount()`.
pub const GET_ANOMALY_COUNT: [u8; 4] = [0x9a, 0xc2, 0x28, 0x04];

/// Selector of `getAnomaly(uint256)`.
pub const GET_ANOMALY: [u8; 4] = [0x22, 0xfa, 0x22, 0xe9];

const WORD: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("return data truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("value at byte {offset} does not fit in 64 bits")]
    Overflow { offset: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// One decoded `getAnomaly` return tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAnomaly {
    pub folder: String,
    pub frame: u64,
    pub error: String,
}

fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn encode_u64(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Calldata for `getAnomalyCount()`.
pub fn encode_get_anomaly_count() -> String {
    to_hex(&GET_ANOMALY_COUNT)
}

/// Calldata for `getAnomaly(index)`.
pub fn encode_get_anomaly(index: u64) -> String {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&GET_ANOMALY);
    data.extend_from_slice(&encode_u64(index));
    to_hex(&data)
}

/// Decode a `0x`-prefixed hex string as returned by `eth_call`.
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, AbiError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    hex::decode(digits).map_err(|e| AbiError::InvalidHex(e.to_string()))
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::Overflow { offset })?;
    data.get(offset..end).ok_or(AbiError::Truncated {
        needed: end,
        available: data.len(),
    })
}

fn u64_at(data: &[u8], offset: usize) -> Result<u64, AbiError> {
    let word = word_at(data, offset)?;
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow { offset });
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}

fn usize_at(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    usize::try_from(u64_at(data, offset)?).map_err(|_| AbiError::Overflow { offset })
}

fn string_at(data: &[u8], offset: usize) -> Result<String, AbiError> {
    let len = usize_at(data, offset)?;
    let start = offset + WORD;
    let end = start.checked_add(len).ok_or(AbiError::Overflow { offset })?;
    let bytes = data.get(start..end).ok_or(AbiError::Truncated {
        needed: end,
        available: data.len(),
    })?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

/// Decode a single `uint256` return value.
pub fn decode_uint(data: &[u8]) -> Result<u64, AbiError> {
    u64_at(data, 0)
}

/// Decode the `(string, uint256, string)` returned by `getAnomaly`.
pub fn decode_anomaly(data: &[u8]) -> Result<RawAnomaly, AbiError> {
    let folder_offset = usize_at(data, 0)?;
    let frame = u64_at(data, WORD)?;
    let error_offset = usize_at(data, 2 * WORD)?;
    Ok(RawAnomaly {
        folder: string_at(data, folder_offset)?,
        frame,
        error: string_at(data, error_offset)?,
    })
}
