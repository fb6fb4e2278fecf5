/*!
*   DID method with a self-certifying identifier and a hash-chained,
*   self-verifying history ("did:webnext").
*
*   Every version of a DID Document is recorded as one line of an
*   append-only log: a JSON patch against the previous version, the chained
*   content hash, and a data-integrity proof produced by a key that the
*   *previous* version authorized. Replaying the log reconstructs and
*   verifies any version of the document.
*/

use thiserror::Error;

pub mod create;
pub mod history;
pub mod keystore;
pub mod log_entry;
pub mod multiformats;
pub mod prelude;
pub mod proof;
pub mod scid;
pub mod state;

/// DID method name
pub const METHOD: &str = "webnext";

/// Magic string standing in for the SCID while it is being derived
pub const SCID_PLACEHOLDER: &str = "{{SCID}}";

/// History log protocol identifier (header element 0)
pub const HISTORY_PROTO: &str = "history:1";

/// Base DID protocol identifier (header element 1); also seeds the hash chain
pub const BASE_PROTO: &str = "did:webnext:1";

/// Log file name inside a document directory
pub const LOG_FILENAME: &str = "did-history.log";

/// Key store file name inside a document directory
pub const STORE_FILENAME: &str = "keys.sqlite";

/// DID core JSON-LD context
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

/// Data Integrity JSON-LD context
pub const DI_CONTEXT: &str = "https://w3id.org/security/data-integrity/v2";

/// Multikey JSON-LD context
pub const MKEY_CONTEXT: &str = "https://w3id.org/security/multikey/v1";

/// Error types for the webnext method
#[derive(Error, Debug)]
pub enum DIDWebNextError {
    /// The DID is missing from the prior controllers, or a proof references
    /// a verification method the prior state did not authorize
    #[error("AuthorityMissing: {0}")]
    AuthorityMissing(String),
    /// A recorded entry hash does not match the recomputed chain hash
    #[error("ChainBroken: {0}")]
    ChainBroken(String),
    /// Unsupported proof type, cryptosuite or key codec, or a signature
    /// failed to verify
    #[error("CryptoRejected: {0}")]
    CryptoRejected(String),
    /// A requested versionId / versionTime cutoff was never reached
    #[error("CutoffUnmet: {0}")]
    CutoffUnmet(String),
    /// SCID derivation failed at version 1, or the document id changed in a
    /// later version
    #[error("IdentityDrift: {0}")]
    IdentityDrift(String),
    #[error("IoError: {0}")]
    IoError(String),
    #[error("KeyStoreError: {0}")]
    KeyStoreError(String),
    /// The log could not be parsed, or a line violates the entry format
    #[error("MalformedLog: {0}")]
    MalformedLog(String),
}
