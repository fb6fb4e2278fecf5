/*!
*  Wire format of the DID history log.
*
*  The log is newline-delimited JSON. Line 0 is the header array
*  `[history_proto, base_proto, meta]`; every following line is an entry
*  array `[log_hash, version_id, timestamp, patch, proofs]`. The entry hash
*  chains over the previous hash, so the whole file is tamper-evident from
*  the header onwards.
*/

use crate::{BASE_PROTO, DIDWebNextError, HISTORY_PROTO, multiformats, proof::DataIntegrityProof};
use json_patch::Patch;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Header line of a history log: `[history_proto, base_proto, meta]`
#[derive(Clone, Debug)]
pub struct LogHeader {
    pub history_proto: String,
    pub base_proto: String,
    pub meta: Value,
}

impl LogHeader {
    pub fn new() -> Self {
        Self {
            history_proto: HISTORY_PROTO.to_string(),
            base_proto: BASE_PROTO.to_string(),
            meta: json!({}),
        }
    }

    /// Parses and validates a header line. Both protocol identifiers must
    /// match the versions this crate implements.
    pub fn parse(line: &str) -> Result<Self, DIDWebNextError> {
        let header: Value = serde_json::from_str(line).map_err(|e| {
            DIDWebNextError::MalformedLog(format!("Header not parsable: {e}"))
        })?;
        let Some(parts) = header.as_array() else {
            return Err(DIDWebNextError::MalformedLog(
                "Header is not a JSON array".to_string(),
            ));
        };
        if parts.len() != 3 {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Header has {} elements, expected 3",
                parts.len()
            )));
        }
        let (Some(history_proto), Some(base_proto)) = (parts[0].as_str(), parts[1].as_str())
        else {
            return Err(DIDWebNextError::MalformedLog(
                "Header protocol identifiers must be strings".to_string(),
            ));
        };
        if history_proto != HISTORY_PROTO {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Unsupported history version: {history_proto}"
            )));
        }
        if base_proto != BASE_PROTO {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Unsupported protocol: {base_proto}"
            )));
        }
        Ok(Self {
            history_proto: history_proto.to_string(),
            base_proto: base_proto.to_string(),
            meta: parts[2].clone(),
        })
    }

    pub fn to_line(&self) -> Result<String, DIDWebNextError> {
        serde_json::to_string(&json!([self.history_proto, self.base_proto, self.meta])).map_err(
            |e| DIDWebNextError::MalformedLog(format!("Couldn't serialize header: {e}")),
        )
    }

    /// The hash seeding the chain: `format_hash(sha256(base_proto))`.
    pub fn seed_hash(&self) -> Result<String, DIDWebNextError> {
        multiformats::format_hash(&Sha256::digest(self.base_proto.as_bytes()))
    }
}

impl Default for LogHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// One version of the DID as recorded in the log:
/// `[log_hash, version_id, timestamp, patch, proofs]`
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// Chained content hash of this entry (multibase base58btc multihash)
    pub version_hash: String,
    /// 1-based version number
    pub version_id: u64,
    /// RFC 3339 timestamp, seconds precision, `Z` suffix
    pub timestamp: String,
    /// RFC 6902 patch against the previous document
    pub patch: Patch,
    /// Data-integrity proofs over the patched document
    pub proofs: Vec<DataIntegrityProof>,
}

impl LogEntry {
    /// Parses one entry line. The line must be a JSON array of exactly five
    /// elements with the expected element types.
    pub fn parse(line: &str) -> Result<Self, DIDWebNextError> {
        let parts: Value = serde_json::from_str(line).map_err(|e| {
            DIDWebNextError::MalformedLog(format!("Log entry not parsable: {e}"))
        })?;
        let Some(parts) = parts.as_array() else {
            return Err(DIDWebNextError::MalformedLog(
                "Log entry is not a JSON array".to_string(),
            ));
        };
        if parts.len() != 5 {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Log entry has {} elements, expected 5",
                parts.len()
            )));
        }
        let Some(version_hash) = parts[0].as_str() else {
            return Err(DIDWebNextError::MalformedLog(
                "Log entry hash must be a string".to_string(),
            ));
        };
        let Some(version_id) = parts[1].as_u64() else {
            return Err(DIDWebNextError::MalformedLog(
                "Log entry version ID must be a positive integer".to_string(),
            ));
        };
        let Some(timestamp) = parts[2].as_str() else {
            return Err(DIDWebNextError::MalformedLog(
                "Log entry timestamp must be a string".to_string(),
            ));
        };
        let patch: Patch = serde_json::from_value(parts[3].clone()).map_err(|e| {
            DIDWebNextError::MalformedLog(format!("Invalid patch in log entry: {e}"))
        })?;
        let proofs: Vec<DataIntegrityProof> =
            serde_json::from_value(parts[4].clone()).map_err(|e| {
                DIDWebNextError::MalformedLog(format!("Invalid proofs in log entry: {e}"))
            })?;
        Ok(Self {
            version_hash: version_hash.to_string(),
            version_id,
            timestamp: timestamp.to_string(),
            patch,
            proofs,
        })
    }

    pub fn to_line(&self) -> Result<String, DIDWebNextError> {
        serde_json::to_string(&json!([
            &self.version_hash,
            self.version_id,
            &self.timestamp,
            &self.patch,
            &self.proofs,
        ]))
        .map_err(|e| DIDWebNextError::MalformedLog(format!("Couldn't serialize log entry: {e}")))
    }
}

/// Chained content hash over `(prev_hash, version_id, timestamp, patch)`:
/// the canonicalized four-element array is hashed with sha2-256 and wrapped
/// as a multibase multihash.
pub fn log_line_hash(
    prev_hash: &str,
    version_id: u64,
    timestamp: &str,
    patch: &Patch,
) -> Result<String, DIDWebNextError> {
    let jcs = serde_json_canonicalizer::to_string(&json!([prev_hash, version_id, timestamp, patch]))
        .map_err(|e| {
            DIDWebNextError::MalformedLog(format!("Couldn't canonicalize log line: {e}"))
        })?;
    multiformats::format_hash(&Sha256::digest(jcs.as_bytes()))
}
