// src/store/record.rs

//! On-disk store record
//!
//! Format: a single line `{crc32_hex}|{json}\n`, the same framing the
//! transaction journal uses. The CRC covers the JSON text exactly.

use crate::error::{Error, Result};

use super::StoreState;

/// Serialize a state into record text
pub fn encode(state: &StoreState) -> Result<String> {
    let json = serde_json::to_string(state)?;
    let crc = crc32fast::hash(json.as_bytes());
    Ok(format!("{:08x}|{}\n", crc, json))
}

/// Parse and validate record text
///
/// Any framing, checksum, parse or consistency failure is reported as
/// `Error::StoreCorruption`.
pub fn decode(text: &str) -> Result<StoreState> {
    let line = text.trim_end_matches(['\n', '\r']);
    if line.contains('\n') {
        return Err(Error::StoreCorruption(
            "record contains more than one line".to_string(),
        ));
    }

    let (crc_text, json) = line
        .split_once('|')
        .ok_or_else(|| Error::StoreCorruption("record is missing its checksum".to_string()))?;

    let expected = u32::from_str_radix(crc_text, 16)
        .map_err(|_| Error::StoreCorruption(format!("invalid checksum field '{}'", crc_text)))?;
    let actual = crc32fast::hash(json.as_bytes());
    if expected != actual {
        return Err(Error::StoreCorruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }

    let state: StoreState = serde_json::from_str(json)
        .map_err(|e| Error::StoreCorruption(format!("unreadable record: {}", e)))?;
    state.check_consistency()?;
    Ok(state)
}
