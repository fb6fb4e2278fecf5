/*!
*   Write path for a webnext DID: genesis document construction, directory
*   provisioning, and appending new versions to the history log.
*/

use crate::{
    DID_CONTEXT, DI_CONTEXT, DIDWebNextError, LOG_FILENAME, METHOD, MKEY_CONTEXT,
    SCID_PLACEHOLDER,
    history::{HistoryOptions, load_history_from_file},
    keystore::{KeyStore, SigningKey},
    log_entry::{LogEntry, LogHeader, log_line_hash},
    proof::eddsa_sign,
    scid::update_scid,
    state::DocumentState,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Timestamp for a new log entry: RFC 3339, seconds precision, UTC.
pub fn new_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builds a standard genesis document for `domain` from a set of signing
/// keys. The id carries the SCID placeholder until provisioning derives the
/// real identifier.
pub fn genesis_document(
    domain: &str,
    keys: &[SigningKey],
) -> Result<Value, DIDWebNextError> {
    let did = format!("did:{METHOD}:{domain}:{SCID_PLACEHOLDER}");
    let mut authentication = Vec::new();
    let mut methods = Vec::new();
    for sk in keys {
        let kid = format!("{did}#{}", sk.kid());
        authentication.push(Value::String(kid.clone()));
        methods.push(json!({
            "id": kid,
            "type": "Multikey",
            "controller": did,
            "publicKeyMultibase": sk.public_multikey()?,
        }));
    }
    Ok(json!({
        "@context": [DID_CONTEXT, DI_CONTEXT, MKEY_CONTEXT],
        "id": did,
        "authentication": authentication,
        "verificationMethod": methods,
    }))
}

/// Generates an ed25519 inception key and provisions a new DID under
/// `parent_dir`. Returns the document directory, which is named after the
/// derived DID.
pub async fn auto_provision(
    parent_dir: &Path,
    domain: &str,
    pass_key: &str,
) -> Result<PathBuf, DIDWebNextError> {
    let sk = SigningKey::generate()?;
    info!("Generated inception key (ed25519): {}", sk.kid());
    let genesis = genesis_document(domain, std::slice::from_ref(&sk))?;
    manual_provision(parent_dir, &genesis, &sk, pass_key).await
}

/// Provisions a new DID from a caller-supplied genesis document: derives the
/// SCID, creates the document directory, seeds the log, stores the inception
/// key, and writes version 1.
pub async fn manual_provision(
    parent_dir: &Path,
    document: &Value,
    sk: &SigningKey,
    pass_key: &str,
) -> Result<PathBuf, DIDWebNextError> {
    let (doc_id, doc_v1) = update_scid(document, Some(1))?;
    info!("Initialized document: {doc_id}");

    // derivation must be stable when re-run over its own output
    let (check_id, _) = update_scid(&doc_v1, None)?;
    if check_id != doc_id {
        return Err(DIDWebNextError::IdentityDrift(format!(
            "SCID derivation is not stable ({check_id} != {doc_id})"
        )));
    }

    let doc_dir = parent_dir.join(&doc_id);
    fs::create_dir(&doc_dir).map_err(|e| {
        DIDWebNextError::IoError(format!(
            "Couldn't create document directory {}: {e}",
            doc_dir.display()
        ))
    })?;
    let init_hash = init_log(&doc_dir)?;

    let store = KeyStore::provision(&doc_dir, pass_key).await?;
    store.insert_key(sk).await?;
    store.close().await?;

    write_document(&doc_dir, &doc_v1, None, &init_hash, 1, &new_timestamp(), sk)?;

    Ok(doc_dir)
}

/// Writes the log header line and returns the seeded hash for entry 1.
pub fn init_log(doc_dir: &Path) -> Result<String, DIDWebNextError> {
    let header = LogHeader::new();
    let path = doc_dir.join(LOG_FILENAME);
    fs::write(&path, format!("{}\n", header.to_line()?)).map_err(|e| {
        DIDWebNextError::IoError(format!("Couldn't write log file {}: {e}", path.display()))
    })?;
    header.seed_hash()
}

/// Appends one version to the log: computes the patch against
/// `prev_document`, chains the hash, signs the document with the entry hash
/// as challenge, and writes the versioned snapshot plus `did.json`.
pub fn write_document(
    doc_dir: &Path,
    document: &Value,
    prev_document: Option<&Value>,
    prev_hash: &str,
    version_id: u64,
    timestamp: &str,
    sk: &SigningKey,
) -> Result<(), DIDWebNextError> {
    let patch = json_patch::diff(prev_document.unwrap_or(&Value::Null), document);
    let cur_hash = log_line_hash(prev_hash, version_id, timestamp, &patch)?;
    let proof = eddsa_sign(document, sk, &cur_hash)?;

    let entry = LogEntry {
        version_hash: cur_hash,
        version_id,
        timestamp: timestamp.to_string(),
        patch,
        proofs: vec![proof],
    };
    let log_path = doc_dir.join(LOG_FILENAME);
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| {
            DIDWebNextError::IoError(format!(
                "Couldn't open log file {}: {e}",
                log_path.display()
            ))
        })?;
    log.write_all(format!("{}\n", entry.to_line()?).as_bytes())
        .map_err(|e| {
            DIDWebNextError::IoError(format!(
                "Couldn't append to log file {}: {e}",
                log_path.display()
            ))
        })?;

    let pretty = serde_json::to_string_pretty(document)
        .map_err(|e| DIDWebNextError::IoError(format!("Couldn't serialize document: {e}")))?;
    for name in [format!("did-v{version_id}.json"), "did.json".to_string()] {
        let path = doc_dir.join(&name);
        fs::write(&path, &pretty).map_err(|e| {
            DIDWebNextError::IoError(format!("Couldn't write {}: {e}", path.display()))
        })?;
    }
    debug!("Wrote document v{version_id} to {}", doc_dir.display());
    Ok(())
}

/// Loads the history to its tail with full verification, then writes the
/// current contents of `did.json` as the next version, signed with a key
/// the previous version authorized.
pub async fn update_document(
    doc_dir: &Path,
    pass_key: &str,
) -> Result<Value, DIDWebNextError> {
    let doc_path = doc_dir.join("did.json");
    let log_path = doc_dir.join(LOG_FILENAME);
    if !doc_path.is_file() {
        return Err(DIDWebNextError::IoError(format!(
            "Missing document file: {}",
            doc_path.display()
        )));
    }
    if !log_path.is_file() {
        return Err(DIDWebNextError::IoError(format!(
            "Missing log file: {}",
            log_path.display()
        )));
    }

    let (prev_state, _) = load_history_from_file(&log_path, HistoryOptions::verified()).await?;

    let raw = fs::read_to_string(&doc_path).map_err(|e| {
        DIDWebNextError::IoError(format!("Couldn't read {}: {e}", doc_path.display()))
    })?;
    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| DIDWebNextError::MalformedLog(format!("Invalid document format: {e}")))?;
    if !document.is_object() {
        return Err(DIDWebNextError::MalformedLog(
            "Invalid document format".to_string(),
        ));
    }
    let version_id = prev_state.version_id + 1;

    // the new entry is verified against the previous version's keys, so the
    // signer must come from that set
    let kid = select_signing_kid(&document, &prev_state)?;

    let store = KeyStore::open(doc_dir, pass_key).await?;
    let sk = match store.fetch_key(&kid).await {
        Ok(Some(sk)) => sk,
        Ok(None) => {
            store.close().await?;
            return Err(DIDWebNextError::KeyStoreError(format!(
                "Key not found: {kid}"
            )));
        }
        Err(e) => {
            store.close().await?;
            return Err(e);
        }
    };
    store.close().await?;

    write_document(
        doc_dir,
        &document,
        Some(&prev_state.document),
        &prev_state.version_hash,
        version_id,
        &new_timestamp(),
        &sk,
    )?;
    Ok(document)
}

/// Picks the signing key id for an update: the first entry of the updated
/// document's `authentication` set that the previous version authorized.
/// Returns the local fragment, which is the id the key store holds.
fn select_signing_kid(
    document: &Value,
    prev_state: &DocumentState,
) -> Result<String, DIDWebNextError> {
    let Some(doc_id) = document.get("id").and_then(Value::as_str) else {
        return Err(DIDWebNextError::MalformedLog(
            "Document is missing a string id".to_string(),
        ));
    };
    if let Some(auths) = document.get("authentication").and_then(Value::as_array) {
        for auth in auths {
            let Some(reference) = auth
                .as_str()
                .or_else(|| auth.get("id").and_then(Value::as_str))
            else {
                continue;
            };
            let resolved = if reference.starts_with('#') {
                format!("{doc_id}{reference}")
            } else {
                reference.to_string()
            };
            if prev_state.auth_keys.contains_key(&resolved)
                && let Some((_, fragment)) = resolved.split_once('#')
            {
                return Ok(fragment.to_string());
            }
        }
    }
    Err(DIDWebNextError::AuthorityMissing(
        "No authorized signing key available for update".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_document_shape() {
        let sk = SigningKey::generate().expect("Couldn't generate signing key");
        let doc = genesis_document("example.com", std::slice::from_ref(&sk)).unwrap();

        assert_eq!(
            doc["id"],
            format!("did:webnext:example.com:{SCID_PLACEHOLDER}")
        );
        assert_eq!(doc["@context"].as_array().unwrap().len(), 3);
        let auth = doc["authentication"].as_array().unwrap();
        let methods = doc["verificationMethod"].as_array().unwrap();
        assert_eq!(auth.len(), 1);
        assert_eq!(methods.len(), 1);
        assert_eq!(auth[0], methods[0]["id"]);
        assert_eq!(methods[0]["type"], "Multikey");
        assert!(
            methods[0]["publicKeyMultibase"]
                .as_str()
                .unwrap()
                .starts_with("z6Mk")
        );
    }

    #[test]
    fn timestamps_are_seconds_utc() {
        let ts = new_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        // no fractional seconds
        assert!(!ts.contains('.'));
    }
}
