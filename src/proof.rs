/*!
*  Data-integrity proofs over DID Documents, cryptosuite `eddsa-jcs-2022`.
*
*  The signature input is `sha256(JCS(document)) || sha256(JCS(proof))`,
*  where the document excludes any `proof` member and the proof options
*  exclude `proofValue`. Proofs are bound to the log entry hash through the
*  `challenge` field.
*/

use crate::{
    DIDWebNextError, keystore::SigningKey, multiformats, state::VerificationMethod,
};
use aries_askar::kms::{KeyAlg, LocalKey};
use chrono::{SecondsFormat, Utc};
use multibase::Base;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// The only proof type accepted
pub const PROOF_TYPE: &str = "DataIntegrityProof";

/// The only cryptosuite accepted
pub const CRYPTOSUITE: &str = "eddsa-jcs-2022";

/// The only proof purpose accepted
pub const PROOF_PURPOSE: &str = "authentication";

/// An embedded data-integrity proof.
///
/// `created` is kept as the wire string so re-serializing the proof for
/// verification reproduces the signed bytes exactly.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrityProof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub cryptosuite: String,
    pub verification_method: String,
    pub created: String,
    pub challenge: String,
    pub proof_purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_value: Option<String>,
}

/// Signs `document` with `sk`, binding the proof to `challenge` (the entry
/// hash). The document must not yet contain a `proof` member.
pub fn eddsa_sign(
    document: &Value,
    sk: &SigningKey,
    challenge: &str,
) -> Result<DataIntegrityProof, DIDWebNextError> {
    let Some(did) = document.get("id").and_then(Value::as_str) else {
        return Err(DIDWebNextError::IdentityDrift(
            "Document is missing an id".to_string(),
        ));
    };
    let mut proof = DataIntegrityProof {
        proof_type: PROOF_TYPE.to_string(),
        cryptosuite: CRYPTOSUITE.to_string(),
        verification_method: format!("{did}#{}", sk.kid()),
        created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        challenge: challenge.to_string(),
        proof_purpose: PROOF_PURPOSE.to_string(),
        proof_value: None,
    };
    let sig_input = signature_input(document, &proof)?;
    let signature = sk.sign(&sig_input)?;
    proof.proof_value = Some(multibase::encode(Base::Base58Btc, signature));
    Ok(proof)
}

/// Verifies `proof` over `document` using `method`'s public key. The
/// document may still carry its `proof` member; it is removed before
/// hashing.
pub fn verify_proof(
    document: &Value,
    proof: &DataIntegrityProof,
    method: &VerificationMethod,
) -> Result<(), DIDWebNextError> {
    if proof.proof_type != PROOF_TYPE {
        return Err(DIDWebNextError::CryptoRejected(format!(
            "Unsupported proof type: {}",
            proof.proof_type
        )));
    }
    if proof.proof_purpose != PROOF_PURPOSE {
        return Err(DIDWebNextError::CryptoRejected(format!(
            "Expected authentication proof purpose, got: {}",
            proof.proof_purpose
        )));
    }
    if proof.cryptosuite != CRYPTOSUITE {
        return Err(DIDWebNextError::CryptoRejected(format!(
            "Unsupported cryptosuite: {}",
            proof.cryptosuite
        )));
    }

    let key_bytes = multiformats::decode_multikey(&method.public_key_multibase)?;
    let key = LocalKey::from_public_bytes(KeyAlg::Ed25519, &key_bytes).map_err(|e| {
        DIDWebNextError::CryptoRejected(format!("Invalid ed25519 public key: {e}"))
    })?;

    let Some(proof_value) = &proof.proof_value else {
        return Err(DIDWebNextError::CryptoRejected(
            "Proof is missing proofValue".to_string(),
        ));
    };
    let signature = multiformats::decode_multibase(proof_value)?;

    let mut unsigned = document.clone();
    if let Some(obj) = unsigned.as_object_mut() {
        obj.remove("proof");
    }
    let sig_input = signature_input(&unsigned, proof)?;

    let verified = key
        .verify_signature(&sig_input, &signature, None)
        .map_err(|e| {
            DIDWebNextError::CryptoRejected(format!("Signature verification failed: {e}"))
        })?;
    if !verified {
        return Err(DIDWebNextError::CryptoRejected(
            "Invalid proof signature".to_string(),
        ));
    }
    debug!("Proof by {} verified", proof.verification_method);
    Ok(())
}

/// `sha256(JCS(document)) || sha256(JCS(proof-without-proofValue))`
fn signature_input(
    document: &Value,
    proof: &DataIntegrityProof,
) -> Result<Vec<u8>, DIDWebNextError> {
    let doc_jcs = serde_json_canonicalizer::to_string(document).map_err(|e| {
        DIDWebNextError::CryptoRejected(format!("Couldn't canonicalize document: {e}"))
    })?;
    let mut options = proof.clone();
    options.proof_value = None;
    let options_jcs = serde_json_canonicalizer::to_string(&options).map_err(|e| {
        DIDWebNextError::CryptoRejected(format!("Couldn't canonicalize proof options: {e}"))
    })?;

    let mut sig_input = Sha256::digest(doc_jcs.as_bytes()).to_vec();
    sig_input.extend_from_slice(&Sha256::digest(options_jcs.as_bytes()));
    Ok(sig_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MULTIKEY_TYPE;
    use serde_json::json;

    fn method_for(sk: &SigningKey, did: &str) -> VerificationMethod {
        VerificationMethod {
            id: format!("{did}#{}", sk.kid()),
            method_type: MULTIKEY_TYPE.to_string(),
            controller: did.to_string(),
            public_key_multibase: sk.public_multikey().unwrap(),
        }
    }

    #[test]
    fn sign_and_verify() {
        let sk = SigningKey::generate().expect("Couldn't generate signing key");
        let did = "did:webnext:example.com:ff4c2yf5ga75mjnl3ww3vo5u";
        let doc = json!({"id": did, "alsoKnownAs": ["did:web:example.com"]});

        let proof = eddsa_sign(&doc, &sk, "zChallengeHash").unwrap();
        assert_eq!(proof.proof_type, PROOF_TYPE);
        assert_eq!(proof.challenge, "zChallengeHash");
        assert!(proof.proof_value.as_deref().unwrap().starts_with('z'));

        verify_proof(&doc, &proof, &method_for(&sk, did)).expect("Proof should verify");
    }

    #[test]
    fn verify_rejects_tampered_document() {
        let sk = SigningKey::generate().expect("Couldn't generate signing key");
        let did = "did:webnext:example.com:ff4c2yf5ga75mjnl3ww3vo5u";
        let doc = json!({"id": did});
        let proof = eddsa_sign(&doc, &sk, "zChallengeHash").unwrap();

        let tampered = json!({"id": did, "alsoKnownAs": ["did:web:evil.example"]});
        assert!(matches!(
            verify_proof(&tampered, &proof, &method_for(&sk, did)),
            Err(DIDWebNextError::CryptoRejected(_))
        ));
    }

    #[test]
    fn verify_rejects_tampered_options() {
        let sk = SigningKey::generate().expect("Couldn't generate signing key");
        let did = "did:webnext:example.com:ff4c2yf5ga75mjnl3ww3vo5u";
        let doc = json!({"id": did});
        let mut proof = eddsa_sign(&doc, &sk, "zChallengeHash").unwrap();
        proof.challenge = "zOtherHash".to_string();

        assert!(verify_proof(&doc, &proof, &method_for(&sk, did)).is_err());
    }

    #[test]
    fn verify_rejects_wrong_suite_type_purpose() {
        let sk = SigningKey::generate().expect("Couldn't generate signing key");
        let did = "did:webnext:example.com:ff4c2yf5ga75mjnl3ww3vo5u";
        let doc = json!({"id": did});
        let proof = eddsa_sign(&doc, &sk, "zChallengeHash").unwrap();
        let method = method_for(&sk, did);

        let mut wrong = proof.clone();
        wrong.proof_type = "Ed25519Signature2020".to_string();
        assert!(matches!(
            verify_proof(&doc, &wrong, &method),
            Err(DIDWebNextError::CryptoRejected(_))
        ));

        let mut wrong = proof.clone();
        wrong.cryptosuite = "ecdsa-jcs-2019".to_string();
        assert!(matches!(
            verify_proof(&doc, &wrong, &method),
            Err(DIDWebNextError::CryptoRejected(_))
        ));

        let mut wrong = proof;
        wrong.proof_purpose = "assertionMethod".to_string();
        assert!(matches!(
            verify_proof(&doc, &wrong, &method),
            Err(DIDWebNextError::CryptoRejected(_))
        ));
    }

    #[test]
    fn verify_ignores_embedded_proof_member() {
        // A document that already embeds the proof verifies the same as one
        // without it, since `proof` is stripped before hashing
        let sk = SigningKey::generate().expect("Couldn't generate signing key");
        let did = "did:webnext:example.com:ff4c2yf5ga75mjnl3ww3vo5u";
        let doc = json!({"id": did});
        let proof = eddsa_sign(&doc, &sk, "zChallengeHash").unwrap();

        let mut embedded = doc.clone();
        embedded["proof"] = serde_json::to_value(&proof).unwrap();
        verify_proof(&embedded, &proof, &method_for(&sk, did))
            .expect("Proof should verify with embedded proof member");
    }
}
