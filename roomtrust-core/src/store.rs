//! Trust store implementations.
//!
//! - [`InMemoryTrustStore`]: process-lifetime records.
//! - [`FileTrustStore`]: a JSON document guarded by a SHA-256 digest. A file
//!   that cannot be read, parsed or whose digest does not match makes the store
//!   unavailable; it is never partially trusted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RoomTrustError, RoomTrustResult};
use crate::ports::TrustStore;
use crate::trust::{PeerTrustRecord, TrustKey};

/// Records held in memory only.
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
    records: HashMap<TrustKey, PeerTrustRecord>,
}

impl InMemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TrustStore for InMemoryTrustStore {
    fn load(&self, key: &TrustKey) -> RoomTrustResult<Option<PeerTrustRecord>> {
        Ok(self.records.get(key).cloned())
    }

    fn store(&mut self, record: PeerTrustRecord) -> RoomTrustResult<()> {
        self.records.insert(record.key.clone(), record);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    digest: String,
    records: Vec<PeerTrustRecord>,
}

fn digest(records: &[PeerTrustRecord]) -> RoomTrustResult<String> {
    let bytes = serde_json::to_vec(records)?;
    let hash = Sha256::digest(&bytes);
    Ok(base64::engine::general_purpose::STANDARD.encode(hash))
}

fn unavailable(path: &Path, reason: impl std::fmt::Display) -> RoomTrustError {
    RoomTrustError::StoreUnavailable(format!("{}: {}", path.display(), reason))
}

/// Records persisted to a JSON file.
#[derive(Debug)]
pub struct FileTrustStore {
    path: PathBuf,
    records: BTreeMap<TrustKey, PeerTrustRecord>,
    failure: Option<String>,
}

impl FileTrustStore {
    /// Open the store at `path`. A missing file is an empty store; a corrupt
    /// one leaves the store unavailable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::read(&path) {
            Ok(records) => {
                tracing::debug!(path = %path.display(), records = records.len(), "trust store opened");
                Self {
                    path,
                    records,
                    failure: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "trust store unavailable, every peer starts unknown");
                Self {
                    path,
                    records: BTreeMap::new(),
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_available(&self) -> bool {
        self.failure.is_none()
    }

    fn read(path: &Path) -> RoomTrustResult<BTreeMap<TrustKey, PeerTrustRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(unavailable(path, e)),
        };
        let document: StoreDocument =
            serde_json::from_slice(&bytes).map_err(|e| unavailable(path, e))?;
        if digest(&document.records)? != document.digest {
            return Err(unavailable(path, "digest mismatch"));
        }
        Ok(document
            .records
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect())
    }

    fn flush(&self) -> RoomTrustResult<()> {
        let records: Vec<PeerTrustRecord> = self.records.values().cloned().collect();
        let document = StoreDocument {
            digest: digest(&records)?,
            records,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| unavailable(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| unavailable(&self.path, e))
    }

    fn check_available(&self) -> RoomTrustResult<()> {
        match &self.failure {
            Some(reason) => Err(RoomTrustError::StoreUnavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

impl TrustStore for FileTrustStore {
    fn load(&self, key: &TrustKey) -> RoomTrustResult<Option<PeerTrustRecord>> {
        self.check_available()?;
        Ok(self.records.get(key).cloned())
    }

    fn store(&mut self, record: PeerTrustRecord) -> RoomTrustResult<()> {
        // A corrupt file is left in place for inspection.
        self.check_available()?;
        self.records.insert(record.key.clone(), record);
        self.flush()
    }
}
