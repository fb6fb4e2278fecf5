/*!
*  Per-version document state.
*
*  A [`DocumentState`] is the resolved DID Document after applying log
*  entries `1..=version_id`, together with the controller set and
*  authentication key map needed to authorize the *next* entry. States are
*  built by the history iterator and immutable once yielded.
*/

use crate::{
    DIDWebNextError,
    log_entry::{LogEntry, log_line_hash},
    proof::DataIntegrityProof,
    scid,
};
use ahash::HashMap;
use chrono::{DateTime, FixedOffset};
use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only verification method type accepted
pub const MULTIKEY_TYPE: &str = "Multikey";

/// A verification method from a DID Document.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_multibase: String,
}

/// Aggregate metadata over a loaded history.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Timestamp of version 1
    pub created: String,
    /// Timestamp of the latest loaded version
    pub updated: String,
    pub deactivated: bool,
    pub version_id: u64,
}

/// The resolved state after applying log entries `1..=version_id`.
#[derive(Clone, Debug)]
pub struct DocumentState {
    /// The DID Document at this version
    pub document: Value,
    /// 1-based version number, dense across the log
    pub version_id: u64,
    /// Chained content hash of this entry
    pub version_hash: String,
    /// Parsed entry timestamp
    pub timestamp: DateTime<FixedOffset>,
    /// Timestamp exactly as recorded in the log line (hash input)
    pub timestamp_raw: String,
    /// DIDs authorized to update this document; defaults to `[id]`
    pub controllers: Vec<String>,
    /// Fully-qualified method id to verification method, for the methods the
    /// document's `authentication` set references
    pub auth_keys: HashMap<String, VerificationMethod>,
    /// Derived from `document.deactivated == true`
    pub deactivated: bool,
    /// Proofs carried by this entry
    pub proofs: Vec<DataIntegrityProof>,
    /// Hash this entry chains from (the header seed for version 1)
    previous_hash: String,
    /// Patch recorded in this entry (hash input)
    patch: Patch,
}

impl DocumentState {
    /// Builds the state for one log entry on top of `prev_state`.
    /// `prev_hash` is the predecessor's `version_hash`, or the header-seeded
    /// hash when this is the first entry.
    pub fn load_history_line(
        entry: LogEntry,
        prev_state: Option<&DocumentState>,
        prev_hash: &str,
    ) -> Result<Self, DIDWebNextError> {
        let LogEntry {
            version_hash,
            version_id,
            timestamp,
            patch,
            proofs,
        } = entry;

        // version numbers are dense, starting at 1
        let expected = prev_state.map_or(1, |prev| prev.version_id + 1);
        if version_id != expected {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Log entry version ID ({version_id}) out of order, expected {expected}"
            )));
        }

        let mut document = prev_state.map_or(Value::Null, |prev| prev.document.clone());
        json_patch::patch(&mut document, &patch).map_err(|e| {
            DIDWebNextError::MalformedLog(format!(
                "Couldn't apply patch for version {version_id}: {e}"
            ))
        })?;
        if !document.is_object() {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Version {version_id} patch produced an invalid document"
            )));
        }

        let parsed_ts = DateTime::parse_from_rfc3339(&timestamp).map_err(|e| {
            DIDWebNextError::MalformedLog(format!("Invalid timestamp ({timestamp}): {e}"))
        })?;
        if let Some(prev) = prev_state
            && parsed_ts < prev.timestamp
        {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Version {version_id} timestamp ({timestamp}) precedes the previous entry ({})",
                prev.timestamp_raw
            )));
        }

        let Some(doc_id) = document.get("id").and_then(Value::as_str).map(str::to_string)
        else {
            return Err(DIDWebNextError::MalformedLog(format!(
                "Version {version_id} document is missing a string id"
            )));
        };
        if let Some(prev) = prev_state {
            let prev_id = prev.document_id();
            if doc_id != prev_id {
                return Err(DIDWebNextError::IdentityDrift(format!(
                    "Document ID has changed ({prev_id} to {doc_id})"
                )));
            }
        } else {
            let (derived_id, _) = scid::update_scid(&document, None)?;
            if doc_id != derived_id {
                return Err(DIDWebNextError::IdentityDrift(format!(
                    "Document ID ({doc_id}) does not match its SCID derivation ({derived_id})"
                )));
            }
        }

        let controllers = parse_controllers(&document, &doc_id)?;
        let auth_keys = parse_auth_keys(&document, &doc_id)?;
        let deactivated = document
            .get("deactivated")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            document,
            version_id,
            version_hash,
            timestamp: parsed_ts,
            timestamp_raw: timestamp,
            controllers,
            auth_keys,
            deactivated,
            proofs,
            previous_hash: prev_hash.to_string(),
            patch,
        })
    }

    /// Recomputes the chained hash for this entry and compares it against
    /// the recorded value.
    pub fn check_version_hash(&self) -> Result<(), DIDWebNextError> {
        let check = log_line_hash(
            &self.previous_hash,
            self.version_id,
            &self.timestamp_raw,
            &self.patch,
        )?;
        if check != self.version_hash {
            return Err(DIDWebNextError::ChainBroken(format!(
                "Version {} hash mismatch: recorded {}, calculated {check}",
                self.version_id, self.version_hash
            )));
        }
        Ok(())
    }

    /// The DID this history describes. Guaranteed to be present on any
    /// constructed state.
    pub fn document_id(&self) -> &str {
        self.document
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Normalizes the `controller` member: absent means self-controlled, a bare
/// string is a singleton list.
fn parse_controllers(document: &Value, doc_id: &str) -> Result<Vec<String>, DIDWebNextError> {
    match document.get("controller") {
        None => Ok(vec![doc_id.to_string()]),
        Some(Value::String(controller)) => Ok(vec![controller.clone()]),
        Some(Value::Array(list)) => list
            .iter()
            .map(|controller| {
                controller
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        DIDWebNextError::MalformedLog(
                            "Controller entries must be strings".to_string(),
                        )
                    })
            })
            .collect(),
        Some(_) => Err(DIDWebNextError::MalformedLog(
            "Invalid controllers".to_string(),
        )),
    }
}

/// Parses `verificationMethod` and `authentication`, returning the map of
/// authorized authentication keys. Authentication entries are either string
/// references to a method of this DID or inline method objects.
fn parse_auth_keys(
    document: &Value,
    doc_id: &str,
) -> Result<HashMap<String, VerificationMethod>, DIDWebNextError> {
    let mut methods: HashMap<String, VerificationMethod> = HashMap::default();
    if let Some(vmethods) = document.get("verificationMethod") {
        let Some(vmethods) = vmethods.as_array() else {
            return Err(DIDWebNextError::MalformedLog(
                "Invalid verification methods".to_string(),
            ));
        };
        for method in vmethods {
            register_method(parse_verification_method(method, doc_id)?, &mut methods)?;
        }
    }

    let mut auth_keys: HashMap<String, VerificationMethod> = HashMap::default();
    if let Some(auths) = document.get("authentication") {
        let Some(auths) = auths.as_array() else {
            return Err(DIDWebNextError::MalformedLog(
                "Invalid authentication".to_string(),
            ));
        };
        for auth in auths {
            let method_id = match auth {
                Value::String(reference) => {
                    let resolved = if reference.starts_with('#') {
                        format!("{doc_id}{reference}")
                    } else {
                        reference.clone()
                    };
                    if !resolved.starts_with(&format!("{doc_id}#")) {
                        return Err(DIDWebNextError::AuthorityMissing(
                            "Only local authentication keys are supported".to_string(),
                        ));
                    }
                    if !methods.contains_key(&resolved) {
                        return Err(DIDWebNextError::AuthorityMissing(format!(
                            "Invalid authentication key reference ({resolved})"
                        )));
                    }
                    resolved
                }
                Value::Object(_) => {
                    register_method(parse_verification_method(auth, doc_id)?, &mut methods)?
                }
                _ => {
                    return Err(DIDWebNextError::MalformedLog(
                        "Invalid authentication entry".to_string(),
                    ));
                }
            };
            if let Some(method) = methods.get(&method_id) {
                auth_keys.insert(method_id, method.clone());
            }
        }
    }
    Ok(auth_keys)
}

/// Parses a single verification method, resolving a leading `#` in its id
/// against the DID. Non-Multikey methods are rejected rather than ignored.
fn parse_verification_method(
    method: &Value,
    doc_id: &str,
) -> Result<VerificationMethod, DIDWebNextError> {
    let mut method: VerificationMethod = serde_json::from_value(method.clone())
        .map_err(|e| DIDWebNextError::MalformedLog(format!("Invalid verification method: {e}")))?;
    if method.method_type != MULTIKEY_TYPE {
        return Err(DIDWebNextError::CryptoRejected(format!(
            "Unsupported verification method type: {}",
            method.method_type
        )));
    }
    if method.id.starts_with('#') {
        method.id = format!("{doc_id}{}", method.id);
    }
    Ok(method)
}

fn register_method(
    method: VerificationMethod,
    methods: &mut HashMap<String, VerificationMethod>,
) -> Result<String, DIDWebNextError> {
    let method_id = method.id.clone();
    if methods.insert(method_id.clone(), method).is_some() {
        return Err(DIDWebNextError::MalformedLog(format!(
            "Duplicate verification method ID ({method_id})"
        )));
    }
    Ok(method_id)
}
