//! Convenience re-exports for common types.
//!
//! ```
//! use didwebnext_rs::prelude::*;
//! ```

pub use crate::DIDWebNextError;
pub use crate::create::{
    auto_provision, genesis_document, manual_provision, update_document, write_document,
};
pub use crate::history::{
    HistoryOptions, iter_history, load_history, load_history_from_file, verify_state_proofs,
};
pub use crate::keystore::{KeyStore, SigningKey};
pub use crate::state::{DocumentMetadata, DocumentState, VerificationMethod};
