/*!
*  Askar-backed key vault and the ed25519 signing key wrapper.
*
*  Each DID directory carries a single encrypted sqlite store
*  (`keys.sqlite`) holding the signing keys for that DID. The store is
*  opened through scoped sessions that are released before returning on
*  every path.
*/

use crate::{DIDWebNextError, STORE_FILENAME, multiformats};
use aries_askar::{
    PassKey, Store, StoreKeyMethod,
    kms::{KeyAlg, LocalKey},
};
use std::path::Path;
use tracing::debug;

/// An ed25519 signing key held in memory, together with the key id used to
/// reference it from verification methods.
pub struct SigningKey {
    key: LocalKey,
    kid: String,
}

impl SigningKey {
    /// Generates a fresh ed25519 key. The kid defaults to the key's JWK
    /// thumbprint.
    pub fn generate() -> Result<Self, DIDWebNextError> {
        let key = LocalKey::generate(KeyAlg::Ed25519, false).map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't generate signing key: {e}"))
        })?;
        Self::from_key(key, None)
    }

    /// Wraps an existing key. Only ed25519 keys are accepted.
    pub fn from_key(key: LocalKey, kid: Option<&str>) -> Result<Self, DIDWebNextError> {
        if key.algorithm() != KeyAlg::Ed25519 {
            return Err(DIDWebNextError::CryptoRejected(format!(
                "Unsupported key algorithm: {:?}",
                key.algorithm()
            )));
        }
        let kid = match kid {
            Some(kid) => kid.to_string(),
            None => key.to_jwk_thumbprint(None).map_err(|e| {
                DIDWebNextError::KeyStoreError(format!("Couldn't compute key thumbprint: {e}"))
            })?,
        };
        Ok(Self { key, kid })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Raw 32-byte public key.
    pub fn public_bytes(&self) -> Result<Vec<u8>, DIDWebNextError> {
        Ok(self
            .key
            .to_public_bytes()
            .map_err(|e| {
                DIDWebNextError::KeyStoreError(format!("Couldn't export public key: {e}"))
            })?
            .to_vec())
    }

    /// Multikey form of the public key (multibase base58btc over the
    /// ed25519-pub multicodec).
    pub fn public_multikey(&self) -> Result<String, DIDWebNextError> {
        Ok(multiformats::encode_multikey(&self.public_bytes()?))
    }

    /// Signs `message`, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, DIDWebNextError> {
        Ok(self
            .key
            .sign_message(message, None)
            .map_err(|e| DIDWebNextError::KeyStoreError(format!("Signing failed: {e}")))?
            .to_vec())
    }

    pub(crate) fn key(&self) -> &LocalKey {
        &self.key
    }
}

/// Handle to a DID directory's encrypted key store.
pub struct KeyStore {
    store: Store,
}

impl KeyStore {
    fn uri(doc_dir: &Path) -> String {
        format!("sqlite://{}", doc_dir.join(STORE_FILENAME).display())
    }

    /// The store key is derived deterministically from the passphrase.
    fn store_key(pass_key: &str) -> Result<PassKey<'static>, DIDWebNextError> {
        Store::new_raw_key(Some(pass_key.as_bytes())).map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't derive store key: {e}"))
        })
    }

    /// Creates the key store for a freshly provisioned DID directory.
    pub async fn provision(doc_dir: &Path, pass_key: &str) -> Result<Self, DIDWebNextError> {
        let store = Store::provision(
            &Self::uri(doc_dir),
            StoreKeyMethod::RawKey,
            Self::store_key(pass_key)?,
            None,
            false,
        )
        .await
        .map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't provision key store: {e}"))
        })?;
        debug!("Provisioned key store in {}", doc_dir.display());
        Ok(Self { store })
    }

    /// Opens an existing key store.
    pub async fn open(doc_dir: &Path, pass_key: &str) -> Result<Self, DIDWebNextError> {
        let store = Store::open(
            &Self::uri(doc_dir),
            Some(StoreKeyMethod::RawKey),
            Self::store_key(pass_key)?,
            None,
        )
        .await
        .map_err(|e| DIDWebNextError::KeyStoreError(format!("Couldn't open key store: {e}")))?;
        Ok(Self { store })
    }

    /// Stores a signing key under its kid.
    pub async fn insert_key(&self, sk: &SigningKey) -> Result<(), DIDWebNextError> {
        let mut session = self.store.session(None).await.map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't open store session: {e}"))
        })?;
        session
            .insert_key(sk.kid(), sk.key(), None, None, None)
            .await
            .map_err(|e| {
                DIDWebNextError::KeyStoreError(format!("Couldn't store key {}: {e}", sk.kid()))
            })
    }

    /// Fetches a signing key by kid, or `None` when the store has no key
    /// under that id.
    pub async fn fetch_key(&self, kid: &str) -> Result<Option<SigningKey>, DIDWebNextError> {
        let mut session = self.store.session(None).await.map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't open store session: {e}"))
        })?;
        let Some(entry) = session.fetch_key(kid, false).await.map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't fetch key {kid}: {e}"))
        })?
        else {
            return Ok(None);
        };
        let key = entry.load_local_key().map_err(|e| {
            DIDWebNextError::KeyStoreError(format!("Couldn't load key {kid}: {e}"))
        })?;
        Ok(Some(SigningKey::from_key(key, Some(kid))?))
    }

    /// Closes the store, releasing the backing file.
    pub async fn close(self) -> Result<(), DIDWebNextError> {
        self.store
            .close()
            .await
            .map_err(|e| DIDWebNextError::KeyStoreError(format!("Couldn't close key store: {e}")))
    }
}
