/*!
*  Self-certifying identifier (SCID) derivation.
*
*  The SCID is the final colon-separated segment of the DID and commits to
*  the entire genesis document: the document is canonicalized with the SCID
*  segment replaced by a placeholder, hashed, and the truncated base32 digest
*  becomes the identifier. Re-running the derivation over its own output
*  yields the same id, which is what makes version 1 self-certifying.
*/

use crate::{DIDWebNextError, SCID_PLACEHOLDER};
use multibase::Base;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Number of base32 characters kept from the digest
const SCID_LENGTH: usize = 24;

/// Derives (or re-derives) the SCID for `document` and substitutes it into
/// every occurrence of the document id. Returns the updated id and document.
///
/// `scid_ver` defaults to the leading digit of the current SCID segment, or
/// 1 when it has none; only version 1 is supported.
pub fn update_scid(
    document: &Value,
    scid_ver: Option<u32>,
) -> Result<(String, Value), DIDWebNextError> {
    let Some(doc_id) = document.get("id").and_then(Value::as_str) else {
        return Err(DIDWebNextError::IdentityDrift(
            "Missing document ID".to_string(),
        ));
    };

    let mut id_parts: Vec<&str> = doc_id.split(':').collect();
    if id_parts.first() != Some(&"did") || id_parts.len() < 4 {
        return Err(DIDWebNextError::IdentityDrift(format!(
            "Invalid document ID: {doc_id}"
        )));
    }
    let Some(old_scid) = id_parts.pop() else {
        return Err(DIDWebNextError::IdentityDrift(format!(
            "Invalid document ID: {doc_id}"
        )));
    };

    let scid_ver = match scid_ver {
        Some(ver) => ver,
        None => old_scid
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .unwrap_or(1),
    };
    if scid_ver != 1 {
        return Err(DIDWebNextError::IdentityDrift(format!(
            "Only SCID version 1 is supported, got {scid_ver}"
        )));
    }

    id_parts.push(SCID_PLACEHOLDER);
    let placeholder_id = id_parts.join(":");

    // Hash input is the canonical document with the placeholder id
    // substituted for the current id wherever it occurs
    let norm = serde_json_canonicalizer::to_string(document)
        .map_err(|e| {
            DIDWebNextError::IdentityDrift(format!("Couldn't canonicalize document: {e}"))
        })?
        .replace(doc_id, &placeholder_id);
    let digest = Sha256::digest(norm.as_bytes());
    let scid: String = Base::Base32Lower
        .encode(digest)
        .chars()
        .take(SCID_LENGTH)
        .collect();
    debug!("Derived SCID {scid} for {doc_id}");

    id_parts.pop();
    id_parts.push(&scid);
    let updated_id = id_parts.join(":");

    let updated = serde_json::to_string(document)
        .map_err(|e| DIDWebNextError::IdentityDrift(format!("Couldn't serialize document: {e}")))?
        .replace(doc_id, &updated_id);
    let document = serde_json::from_str(&updated).map_err(|e| {
        DIDWebNextError::IdentityDrift(format!("Couldn't rebuild document with SCID: {e}"))
    })?;

    Ok((updated_id, document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derive_from_placeholder() {
        let doc = json!({"id": "did:webnext:example.com:{{SCID}}"});
        let (did, updated) = update_scid(&doc, Some(1)).unwrap();
        assert_eq!(did, "did:webnext:example.com:ff4c2yf5ga75mjnl3ww3vo5u");
        assert_eq!(updated["id"], did.as_str());
    }

    #[test]
    fn derivation_is_idempotent() {
        let doc = json!({
            "id": "did:webnext:example.com:{{SCID}}",
            "controller": "did:webnext:example.com:{{SCID}}",
        });
        let (did, updated) = update_scid(&doc, Some(1)).unwrap();
        let (rederived, again) = update_scid(&updated, None).unwrap();
        assert_eq!(rederived, did);
        assert_eq!(again, updated);
        // the placeholder substitution reached every occurrence
        assert_eq!(updated["controller"], did.as_str());
    }

    #[test]
    fn scid_shape() {
        let doc = json!({"id": "did:webnext:example.com:{{SCID}}"});
        let (did, _) = update_scid(&doc, Some(1)).unwrap();
        let scid = did.rsplit(':').next().unwrap();
        assert_eq!(scid.len(), 24);
        assert!(
            scid.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn rejects_unsupported_scid_version() {
        let doc = json!({"id": "did:webnext:example.com:2abcdef"});
        assert!(matches!(
            update_scid(&doc, None),
            Err(DIDWebNextError::IdentityDrift(_))
        ));
    }

    #[test]
    fn rejects_short_or_foreign_ids() {
        for id in ["did:webnext:nodomain", "urn:webnext:a:b:c", "did"] {
            let doc = json!({ "id": id });
            assert!(update_scid(&doc, None).is_err(), "accepted {id}");
        }
        assert!(update_scid(&json!({"no_id": true}), None).is_err());
    }
}
