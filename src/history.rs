/*!
*  Streaming traversal of a DID history log.
*
*  The iterator reads one line at a time from an async source, applies the
*  entry's patch, enforces the hash chain, and yields immutable
*  [`DocumentState`] snapshots in version order. A sliding window keeps the
*  previous state available so entry `n` can be verified against the
*  authentication keys of entry `n-1`; the inception entry bootstraps
*  against itself.
*/

use crate::{
    DIDWebNextError,
    log_entry::{LogEntry, LogHeader},
    proof::verify_proof,
    state::{DocumentMetadata, DocumentState},
};
use chrono::{DateTime, FixedOffset};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

/// Per-state verification hook. Receives the state about to be yielded, the
/// previous state (`None` at version 1), and whether traversal is about to
/// finish.
pub type VerifyState = Box<
    dyn Fn(&DocumentState, Option<&DocumentState>, bool) -> Result<(), DIDWebNextError>
        + Send
        + Sync,
>;

/// Traversal controls for [`iter_history`] and [`load_history`].
#[derive(Default)]
pub struct HistoryOptions {
    /// Stop at exactly this version
    pub version_id: Option<u64>,
    /// Stop at the latest version with a timestamp at or before this instant
    pub version_time: Option<DateTime<FixedOffset>>,
    /// Optional hook run on every state before it is yielded
    pub verify_state: Option<VerifyState>,
}

impl HistoryOptions {
    /// Options with the standard signature verification policy installed.
    pub fn verified() -> Self {
        Self {
            verify_state: Some(Box::new(|state, prev_state, _done| {
                verify_state_proofs(state, prev_state)
            })),
            ..Self::default()
        }
    }
}

/// Standard signature policy for one state: the DID must appear in the prior
/// controllers, and every proof must verify against an authentication key of
/// the prior state. Version 1 is checked against its own controllers and
/// keys (the inception bootstrap).
pub fn verify_state_proofs(
    state: &DocumentState,
    prev_state: Option<&DocumentState>,
) -> Result<(), DIDWebNextError> {
    let prev = prev_state.unwrap_or(state);
    let did = state.document_id();

    if !prev.controllers.iter().any(|controller| controller == did) {
        return Err(DIDWebNextError::AuthorityMissing(format!(
            "DID ({did}) missing from prior controllers"
        )));
    }
    if state.proofs.is_empty() {
        return Err(DIDWebNextError::AuthorityMissing(format!(
            "Version {} carries no proof",
            state.version_id
        )));
    }
    for proof in &state.proofs {
        let method_id = if proof.verification_method.starts_with('#') {
            format!("{did}{}", proof.verification_method)
        } else {
            proof.verification_method.clone()
        };
        let Some(method) = prev.auth_keys.get(&method_id) else {
            return Err(DIDWebNextError::AuthorityMissing(format!(
                "Cannot resolve verification method ({method_id})"
            )));
        };
        verify_proof(&state.document, proof, method)?;
    }
    Ok(())
}

/// Pull-based history traversal. Construct with [`iter_history`] and drain
/// with [`HistoryIterator::next_state`].
pub struct HistoryIterator<R> {
    lines: Lines<R>,
    options: HistoryOptions,
    /// Seed hash from the header, used for the first entry
    seed_hash: String,
    prev_state: Option<DocumentState>,
    /// Entry parsed ahead of the one being yielded
    pending: Option<DocumentState>,
    started: bool,
    done: bool,
    yielded: bool,
}

/// Starts a history traversal over an async line source.
pub fn iter_history<R: AsyncBufRead + Unpin>(
    reader: R,
    options: HistoryOptions,
) -> HistoryIterator<R> {
    HistoryIterator {
        lines: reader.lines(),
        options,
        seed_hash: String::new(),
        prev_state: None,
        pending: None,
        started: false,
        done: false,
        yielded: false,
    }
}

impl<R: AsyncBufRead + Unpin> HistoryIterator<R> {
    /// Returns the next verified state, or `None` once the traversal has
    /// finished. Any violation ends the traversal with an error; a partial
    /// history is never silently accepted.
    pub async fn next_state(&mut self) -> Result<Option<DocumentState>, DIDWebNextError> {
        if !self.started {
            self.read_header().await?;
        }
        while !self.done {
            let state = self.pending.take();
            self.advance(state.as_ref()).await?;
            let Some(state) = state else {
                // header with no entries
                break;
            };
            if Some(state.version_id) == self.options.version_id || self.pending.is_none() {
                self.done = true;
            }
            state.check_version_hash()?;
            if let Some(verify_state) = &self.options.verify_state {
                verify_state(&state, self.prev_state.as_ref(), self.done)?;
            }
            debug!("History entry {} verified", state.version_id);
            self.yielded = true;
            self.prev_state = Some(state.clone());
            return Ok(Some(state));
        }
        self.finish()
    }

    async fn read_header(&mut self) -> Result<(), DIDWebNextError> {
        let Some(line) = self.next_line().await? else {
            return Err(DIDWebNextError::MalformedLog(
                "History log is empty".to_string(),
            ));
        };
        let header = LogHeader::parse(&line)?;
        self.seed_hash = header.seed_hash()?;
        self.started = true;
        // prime the window with the first entry
        self.advance(None).await
    }

    /// Parses the next line into the pending slot. Sets `done` when the
    /// parsed entry lies beyond the `version_time` cutoff, so the current
    /// state becomes the final one yielded.
    async fn advance(&mut self, prev: Option<&DocumentState>) -> Result<(), DIDWebNextError> {
        let Some(line) = self.next_line().await? else {
            self.pending = None;
            return Ok(());
        };
        let entry = LogEntry::parse(&line)?;
        let prev_hash = prev.map_or(self.seed_hash.as_str(), |state| state.version_hash.as_str());
        let next = DocumentState::load_history_line(entry, prev, prev_hash)?;
        if let Some(version_time) = self.options.version_time
            && version_time < next.timestamp
        {
            self.done = true;
        }
        self.pending = Some(next);
        Ok(())
    }

    /// Next non-blank line from the source.
    async fn next_line(&mut self) -> Result<Option<String>, DIDWebNextError> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(line) => return Ok(line),
                Err(e) => {
                    return Err(DIDWebNextError::MalformedLog(format!(
                        "Failed to read line from history: {e}"
                    )));
                }
            }
        }
    }

    /// Terminal bookkeeping: report unmet cutoffs or an empty history.
    fn finish(&self) -> Result<Option<DocumentState>, DIDWebNextError> {
        if self.yielded {
            if let Some(version_id) = self.options.version_id
                && self.prev_state.as_ref().map(|state| state.version_id) != Some(version_id)
            {
                return Err(DIDWebNextError::CutoffUnmet(format!(
                    "Cannot resolve versionId: {version_id}"
                )));
            }
            return Ok(None);
        }
        if let Some(version_id) = self.options.version_id {
            Err(DIDWebNextError::CutoffUnmet(format!(
                "Cannot resolve versionId: {version_id}"
            )))
        } else if let Some(version_time) = self.options.version_time {
            Err(DIDWebNextError::CutoffUnmet(format!(
                "Cannot resolve versionTime: {}",
                version_time.to_rfc3339()
            )))
        } else {
            Err(DIDWebNextError::MalformedLog(
                "Empty document history".to_string(),
            ))
        }
    }
}

/// Consumes a history and returns the final state with aggregate metadata.
pub async fn load_history<R: AsyncBufRead + Unpin>(
    reader: R,
    options: HistoryOptions,
) -> Result<(DocumentState, DocumentMetadata), DIDWebNextError> {
    let mut states = iter_history(reader, options);
    let mut created = None;
    let mut latest = None;

    // the iterator yields at least one state or fails
    while let Some(state) = states.next_state().await? {
        if created.is_none() {
            created = Some(state.timestamp_raw.clone());
        }
        latest = Some(state);
    }
    let Some(latest) = latest else {
        return Err(DIDWebNextError::MalformedLog(
            "Empty document history".to_string(),
        ));
    };

    let metadata = DocumentMetadata {
        created: created.unwrap_or_else(|| latest.timestamp_raw.clone()),
        updated: latest.timestamp_raw.clone(),
        deactivated: latest.deactivated,
        version_id: latest.version_id,
    };
    Ok((latest, metadata))
}

/// Opens a log file and loads the history it contains.
pub async fn load_history_from_file(
    path: impl AsRef<Path>,
    options: HistoryOptions,
) -> Result<(DocumentState, DocumentMetadata), DIDWebNextError> {
    let file = tokio::fs::File::open(path.as_ref()).await.map_err(|e| {
        DIDWebNextError::IoError(format!(
            "Failed to open log file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    load_history(BufReader::new(file), options).await
}
