/*!
*  Adversarial scenarios: tampered log lines and unauthorized signers must
*  fail the load, never degrade it.
*/

use anyhow::Result;
use didwebnext_rs::{LOG_FILENAME, create::new_timestamp, prelude::*};
use serde_json::{Value, json};
use std::{fs, path::Path};

async fn load_verified(doc_dir: &Path) -> Result<DocumentState, DIDWebNextError> {
    load_history_from_file(doc_dir.join(LOG_FILENAME), HistoryOptions::verified())
        .await
        .map(|(state, _)| state)
}

/// Flips the final seconds digit of the entry timestamp on one log line.
fn tamper_timestamp(line: &str) -> String {
    let mut entry: Value = serde_json::from_str(line).expect("Log line should parse");
    let ts = entry[2].as_str().expect("Timestamp should be a string");
    let (head, tail) = ts.split_at(ts.len() - 2);
    let flipped = if tail.starts_with('0') { "1Z" } else { "0Z" };
    entry[2] = Value::String(format!("{head}{flipped}"));
    serde_json::to_string(&entry).expect("Log line should serialize")
}

#[tokio::test]
async fn tampered_timestamp_breaks_the_chain() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let doc_dir = auto_provision(parent.path(), "example.com", "password").await?;

    let log_path = doc_dir.join(LOG_FILENAME);
    let log = fs::read_to_string(&log_path)?;
    let mut lines: Vec<String> = log.lines().map(str::to_string).collect();
    lines[1] = tamper_timestamp(&lines[1]);
    fs::write(&log_path, format!("{}\n", lines.join("\n")))?;

    let result = load_verified(&doc_dir).await;
    assert!(matches!(result, Err(DIDWebNextError::ChainBroken(_))));
    Ok(())
}

#[tokio::test]
async fn tampered_document_content_breaks_the_chain() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let doc_dir = auto_provision(parent.path(), "example.com", "password").await?;

    // rewrite the patched-in domain inside the genesis patch
    let log_path = doc_dir.join(LOG_FILENAME);
    let log = fs::read_to_string(&log_path)?;
    let tampered = log.replace("example.com", "evil.example");
    assert_ne!(tampered, log);
    fs::write(&log_path, tampered)?;

    let result = load_verified(&doc_dir).await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn unauthorized_signer_is_rejected_on_load() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let doc_dir = auto_provision(parent.path(), "example.com", "password").await?;
    let tail = load_verified(&doc_dir).await?;

    // append v2 signed by a key version 1 never authorized
    let rogue = SigningKey::generate()?;
    let mut doc = tail.document.clone();
    doc["alsoKnownAs"] = json!(["did:web:evil.example"]);
    write_document(
        &doc_dir,
        &doc,
        Some(&tail.document),
        &tail.version_hash,
        tail.version_id + 1,
        &new_timestamp(),
        &rogue,
    )?;

    let result = load_verified(&doc_dir).await;
    assert!(matches!(
        result,
        Err(DIDWebNextError::AuthorityMissing(_) | DIDWebNextError::CryptoRejected(_))
    ));
    Ok(())
}

#[tokio::test]
async fn truncated_entry_line_is_rejected() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let doc_dir = auto_provision(parent.path(), "example.com", "password").await?;

    let log_path = doc_dir.join(LOG_FILENAME);
    let log = fs::read_to_string(&log_path)?;
    let mut lines: Vec<String> = log.lines().map(str::to_string).collect();
    // drop the proofs element
    let mut entry: Value = serde_json::from_str(&lines[1])?;
    entry.as_array_mut().unwrap().pop();
    lines[1] = serde_json::to_string(&entry)?;
    fs::write(&log_path, format!("{}\n", lines.join("\n")))?;

    let result = load_verified(&doc_dir).await;
    assert!(matches!(result, Err(DIDWebNextError::MalformedLog(_))));
    Ok(())
}
