//! Append-only session store for extraction results.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!   index.json        ordered list of session ids
//!   <id>.json         one SessionResult, pretty-printed
//!   raw/
//!     <id>.txt        verbatim model output for that session
//! ```
//!
//! Records are plain pretty-printed JSON so a stored session can be
//! inspected or diffed with nothing but a text editor. Every save
//! generates a fresh UUID; records are never mutated — re-running an
//! extraction on the same drawing yields a new session, and the old one
//! stays readable.
//!
//! ## Concurrency
//!
//! Record files are written once under a unique id, so they need no
//! locking. The index is the only shared mutable file; updates to it are
//! serialized by a process-wide mutex and every write goes through a
//! temp-file-plus-rename so a crash never leaves a half-written index.
//! Multi-process coordination is out of scope — one writer process at a
//! time.

use crate::bom::{Bom, Provenance};
use crate::error::BomError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Serializes index read-modify-write cycles within this process.
static INDEX_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// One stored extraction session.
///
/// Immutable once written; `raw_archive` points at the verbatim model
/// output so a result can always be re-normalized or audited later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub bom: Bom,
    pub provenance: Provenance,
    /// Path of the archived raw model output, relative to the store root.
    pub raw_archive: PathBuf,
    pub saved_at: DateTime<Utc>,
}

/// Filesystem-backed result store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BomError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("raw")).map_err(|e| BomError::OutputWrite {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one extraction result; returns the fresh session id.
    ///
    /// Write order matters for crash safety: raw archive first, then the
    /// record, then the index. A session is only discoverable once all
    /// three exist.
    pub fn save(
        &self,
        bom: &Bom,
        provenance: &Provenance,
        raw_text: &str,
    ) -> Result<String, BomError> {
        let session_id = Uuid::new_v4().to_string();
        let raw_rel = PathBuf::from("raw").join(format!("{session_id}.txt"));

        write_atomic(&self.root.join(&raw_rel), raw_text.as_bytes())?;

        let record = SessionResult {
            session_id: session_id.clone(),
            bom: bom.clone(),
            provenance: provenance.clone(),
            raw_archive: raw_rel,
            saved_at: Utc::now(),
        };
        let json =
            serde_json::to_vec_pretty(&record).map_err(|e| BomError::Internal(e.to_string()))?;
        write_atomic(&self.record_path(&session_id), &json)?;

        {
            let _guard = INDEX_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let mut ids = self.read_index()?;
            ids.push(session_id.clone());
            let json =
                serde_json::to_vec_pretty(&ids).map_err(|e| BomError::Internal(e.to_string()))?;
            write_atomic(&self.index_path(), &json)?;
        }

        info!(
            "Saved session {} ({} items, {})",
            session_id,
            bom.items.len(),
            bom.source.label()
        );
        Ok(session_id)
    }

    /// Load a stored session by id.
    pub fn load(&self, session_id: &str) -> Result<SessionResult, BomError> {
        let path = self.record_path(session_id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BomError::NotFound {
                    session_id: session_id.to_string(),
                    root: self.root.clone(),
                })
            }
            Err(e) => {
                return Err(BomError::StoreCorrupted {
                    root: self.root.clone(),
                    detail: format!("cannot read '{}': {e}", path.display()),
                })
            }
        };

        let record: SessionResult =
            serde_json::from_slice(&bytes).map_err(|e| BomError::StoreCorrupted {
                root: self.root.clone(),
                detail: format!("record '{session_id}' is not valid JSON: {e}"),
            })?;
        debug!("Loaded session {}", session_id);
        Ok(record)
    }

    /// Read the archived raw model output for a session.
    pub fn load_raw(&self, session_id: &str) -> Result<String, BomError> {
        let record = self.load(session_id)?;
        let path = self.root.join(&record.raw_archive);
        std::fs::read_to_string(&path).map_err(|e| BomError::StoreCorrupted {
            root: self.root.clone(),
            detail: format!("raw archive '{}' unreadable: {e}", path.display()),
        })
    }

    /// All session ids, oldest first.
    pub fn list(&self) -> Result<Vec<String>, BomError> {
        let _guard = INDEX_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        self.read_index()
    }

    fn read_index(&self) -> Result<Vec<String>, BomError> {
        let path = self.index_path();
        match std::fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| BomError::StoreCorrupted {
                    root: self.root.clone(),
                    detail: format!("index.json is not valid JSON: {e}"),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(BomError::StoreCorrupted {
                root: self.root.clone(),
                detail: format!("index.json unreadable: {e}"),
            }),
        }
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }
}

/// Write bytes to `path` via a temp file in the same directory plus an
/// atomic rename, so readers never observe a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BomError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| BomError::OutputWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(bytes).map_err(|e| BomError::OutputWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.persist(path).map_err(|e| BomError::OutputWrite {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::{BomLineItem, SourceRef, Unit};

    fn sample_bom() -> Bom {
        Bom {
            source: SourceRef::page("doors.pdf", 2),
            items: vec![BomLineItem {
                identifier: "A1".into(),
                description: "Steel bracket".into(),
                quantity: 4,
                unit: Unit::Piece,
                unit_weight_kg: Some(0.45),
                notes: Some("anodized".into()),
            }],
            extracted_at: Utc::now(),
            partial: false,
            diagnostics: vec![],
        }
    }

    fn sample_provenance() -> Provenance {
        Provenance {
            source_path: "doors.pdf".into(),
            page_index: Some(2),
            model: Some("gpt-4o".into()),
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn save_load_roundtrip_is_deep_equal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let bom = sample_bom();
        let prov = sample_provenance();

        let id = store.save(&bom, &prov, "{\"items\": []}").unwrap();
        let loaded = store.load(&id).unwrap();

        assert_eq!(loaded.session_id, id);
        assert_eq!(loaded.bom, bom);
        assert_eq!(loaded.provenance, prov);
        assert_eq!(store.load_raw(&id).unwrap(), "{\"items\": []}");
    }

    #[test]
    fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let err = store.load("no-such-session").unwrap_err();
        assert!(matches!(err, BomError::NotFound { .. }));
    }

    #[test]
    fn each_save_gets_a_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let bom = sample_bom();
        let prov = sample_provenance();

        let a = store.save(&bom, &prov, "raw-a").unwrap();
        let b = store.save(&bom, &prov, "raw-b").unwrap();
        assert_ne!(a, b);

        // Both remain loadable; earlier records are never touched.
        assert_eq!(store.load_raw(&a).unwrap(), "raw-a");
        assert_eq!(store.load_raw(&b).unwrap(), "raw-b");
    }

    #[test]
    fn list_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let bom = sample_bom();
        let prov = sample_provenance();

        let a = store.save(&bom, &prov, "1").unwrap();
        let b = store.save(&bom, &prov, "2").unwrap();
        let c = store.save(&bom, &prov, "3").unwrap();
        assert_eq!(store.list().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn corrupted_record_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad-id.json"), b"{ not json").unwrap();
        let err = store.load("bad-id").unwrap_err();
        assert!(matches!(err, BomError::StoreCorrupted { .. }));
    }
}
