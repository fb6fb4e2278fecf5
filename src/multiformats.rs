/*!
*  Self-describing binary encodings used throughout the DID log: multibase,
*  multihash (sha2-256) and the ed25519-pub multicodec.
*/

use crate::DIDWebNextError;
use multibase::Base;
use multihash::Multihash;

/// Multihash code for sha2-256
const SHA2_256: u64 = 0x12;

/// Unsigned-varint multicodec prefix for an ed25519 public key
const ED25519_PUB: [u8; 2] = [0xed, 0x01];

/// Name of the only key codec this crate accepts
pub const ED25519_PUB_NAME: &str = "ed25519-pub";

/// Wraps a sha2-256 digest in a multihash and encodes it as multibase
/// base58btc. Every content hash recorded in a webnext log has this form.
pub fn format_hash(digest: &[u8]) -> Result<String, DIDWebNextError> {
    let wrapped = Multihash::<32>::wrap(SHA2_256, digest).map_err(|e| {
        DIDWebNextError::MalformedLog(format!("Couldn't create multihash encoding: {e}"))
    })?;
    Ok(multibase::encode(Base::Base58Btc, wrapped.to_bytes()))
}

/// Decodes a multibase string. Base58btc and base32-lower are the encodings
/// that appear in a webnext log; any base the prefix identifies is accepted.
pub fn decode_multibase(input: &str) -> Result<Vec<u8>, DIDWebNextError> {
    let (_, bytes) = multibase::decode(input).map_err(|e| {
        DIDWebNextError::MalformedLog(format!("Invalid multibase string ({input}): {e}"))
    })?;
    Ok(bytes)
}

/// Prefixes raw ed25519 public key bytes with the ed25519-pub multicodec.
pub fn multicodec_wrap(public_key: &[u8]) -> Vec<u8> {
    let mut wrapped = ED25519_PUB.to_vec();
    wrapped.extend_from_slice(public_key);
    wrapped
}

/// Strips the multicodec prefix, returning the codec name and the key bytes.
/// Only ed25519-pub is recognized.
pub fn multicodec_unwrap(bytes: &[u8]) -> Result<(&'static str, &[u8]), DIDWebNextError> {
    match bytes.strip_prefix(ED25519_PUB.as_slice()) {
        Some(key) => Ok((ED25519_PUB_NAME, key)),
        None => Err(DIDWebNextError::CryptoRejected(format!(
            "Unsupported multicodec prefix: {:02x?}",
            &bytes[..bytes.len().min(2)]
        ))),
    }
}

/// Encodes an ed25519 public key as a Multikey: multibase base58btc over the
/// multicodec-wrapped key bytes.
pub fn encode_multikey(public_key: &[u8]) -> String {
    multibase::encode(Base::Base58Btc, multicodec_wrap(public_key))
}

/// Decodes a Multikey back to raw ed25519 public key bytes.
pub fn decode_multikey(multikey: &str) -> Result<Vec<u8>, DIDWebNextError> {
    let decoded = decode_multibase(multikey)?;
    let (_, key) = multicodec_unwrap(&decoded)?;
    Ok(key.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BASE_PROTO;
    use sha2::{Digest, Sha256};

    #[test]
    fn format_hash_base_proto() {
        // Known vector: the hash that seeds every webnext chain
        let digest = Sha256::digest(BASE_PROTO.as_bytes());
        assert_eq!(
            format_hash(&digest).unwrap(),
            "zQmekt4YnthWV8EdLx2cQE6Wfi7J6j6Z16GFAZbTaU4jB55"
        );
    }

    #[test]
    fn multikey_round_trip() {
        let key = [0x01_u8; 32];
        let multikey = encode_multikey(&key);
        assert_eq!(multikey, "z6MkeXBLjYiSvqnhFb6D7sHm8yKm4jV45wwBFRaatf1cfZ76");
        assert_eq!(decode_multikey(&multikey).unwrap(), key.to_vec());
    }

    #[test]
    fn multicodec_unwrap_rejects_unknown_codec() {
        // secp256k1-pub prefix
        let result = multicodec_unwrap(&[0xe7, 0x01, 0xab]);
        assert!(matches!(result, Err(DIDWebNextError::CryptoRejected(_))));
    }

    #[test]
    fn decode_multibase_base32_lower() {
        let encoded = multibase::encode(Base::Base32Lower, b"hello");
        assert_eq!(decode_multibase(&encoded).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn decode_multibase_rejects_garbage() {
        assert!(matches!(
            decode_multibase("!!not-multibase"),
            Err(DIDWebNextError::MalformedLog(_))
        ));
    }
}
