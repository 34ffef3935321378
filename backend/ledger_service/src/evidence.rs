//! Deposit evidence storage.
//!
//! The ledger only keeps the reference string returned by [`EvidenceStore::save`];
//! the bytes live wherever the store puts them.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use ledger_core::{AccountId, LedgerError, Result};
use tracing::{info, warn};

/// Largest accepted proof upload (5 MiB).
pub const MAX_EVIDENCE_BYTES: usize = 5 * 1024 * 1024;

/// A proof-of-payment upload as received from the client.
#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl EvidenceUpload {
    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(LedgerError::EvidenceRequired);
        }
        if self.bytes.len() > MAX_EVIDENCE_BYTES {
            return Err(LedgerError::Validation(
                "payment screenshot exceeds the 5 MiB limit".into(),
            ));
        }
        Ok(())
    }
}

pub trait EvidenceStore: Send + Sync {
    /// Persist `upload` and return its reference.
    fn save<'a>(&'a self, owner: AccountId, upload: EvidenceUpload) -> BoxFuture<'a, Result<String>>;

    /// Delete the blob behind `reference`.
    fn remove<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Release evidence without waiting on it. Failures are logged only.
pub fn discard_in_background(store: std::sync::Arc<dyn EvidenceStore>, reference: String) {
    tokio::spawn(async move {
        match store.remove(&reference).await {
            Ok(()) => info!("Evidence {reference} released"),
            Err(e) => warn!("Failed to release evidence {reference}: {e}"),
        }
    });
}

/// Keep `[A-Za-z0-9._-]`, replace anything else with `_`.
fn sanitize(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

// ─────────────────────────────────────────────────────────
// Filesystem store
// ─────────────────────────────────────────────────────────

/// Stores uploads as flat files under one directory.
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsEvidenceStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf> {
        if reference.is_empty()
            || reference.contains(['/', '\\'])
            || reference.starts_with('.')
        {
            return Err(LedgerError::Validation(format!(
                "invalid evidence reference '{reference}'"
            )));
        }
        Ok(self.root.join(reference))
    }
}

fn io_error(err: std::io::Error) -> LedgerError {
    LedgerError::StorageUnavailable(format!("evidence storage: {err}"))
}

impl EvidenceStore for FsEvidenceStore {
    fn save<'a>(&'a self, owner: AccountId, upload: EvidenceUpload) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.root).await.map_err(io_error)?;
            let nonce: u32 = rand::random();
            let reference = format!(
                "{owner}-{}-{:08x}-{}",
                chrono::Utc::now().timestamp_millis(),
                nonce,
                sanitize(&upload.file_name)
            );
            let path = self.path_for(&reference)?;
            tokio::fs::write(&path, &upload.bytes).await.map_err(io_error)?;
            Ok(reference)
        })
    }

    fn remove<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.path_for(reference)?;
            tokio::fs::remove_file(path).await.map_err(io_error)
        })
    }
}

// ─────────────────────────────────────────────────────────
// In-memory store (tests)
// ─────────────────────────────────────────────────────────

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    files: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    next: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MemoryEvidenceStore {
    pub fn contains(&self, reference: &str) -> bool {
        self.files.lock().unwrap().contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[cfg(test)]
impl EvidenceStore for MemoryEvidenceStore {
    fn save<'a>(&'a self, owner: AccountId, upload: EvidenceUpload) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let n = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let reference = format!("{owner}-{n}-{}", sanitize(&upload.file_name));
            self.files
                .lock()
                .unwrap()
                .insert(reference.clone(), upload.bytes);
            Ok(reference)
        })
    }

    fn remove<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.files
                .lock()
                .unwrap()
                .remove(reference)
                .map(|_| ())
                .ok_or_else(|| LedgerError::StorageUnavailable(format!("no evidence {reference}")))
        })
    }
}
