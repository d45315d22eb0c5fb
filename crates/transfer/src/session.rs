//! Durable checkpoints of in-progress multipart uploads.
//!
//! A checkpoint is written after every store-confirmed part and removed
//! once the remote store has assembled the object. The JSON layout keeps
//! the field names of the gateway's multipart records (`uploadId`,
//! `sourceFile`, `destination`, `partsUploaded`).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use maap_s3_protocol::PartRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::plan::UploadPlan;
use crate::Error;

/// The unit of resumability: one multipart upload of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    #[serde(rename = "uploadId")]
    session_id: String,
    #[serde(rename = "sourceFile")]
    source_path: PathBuf,
    #[serde(rename = "destination")]
    destination_key: String,
    total_size: u64,
    part_size: u64,
    part_count: u32,
    /// Unique by part number, strictly ascending.
    #[serde(rename = "partsUploaded", default)]
    completed_parts: Vec<PartRecord>,
    updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates a session with no completed parts.
    pub fn new(
        session_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        destination_key: impl Into<String>,
        plan: &UploadPlan,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source_path: source_path.into(),
            destination_key: destination_key.into(),
            total_size: plan.total_size(),
            part_size: plan.part_size(),
            part_count: plan.part_count(),
            completed_parts: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Upload id issued by the remote store.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn destination_key(&self) -> &str {
        &self.destination_key
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Store-confirmed parts, ascending by part number.
    pub fn completed_parts(&self) -> &[PartRecord] {
        &self.completed_parts
    }

    /// Returns `true` if the session was laid out for exactly this plan.
    pub fn matches_plan(&self, plan: &UploadPlan) -> bool {
        self.part_count == plan.part_count()
            && self.part_size == plan.part_size()
            && self.total_size == plan.total_size()
    }

    /// Records a store-confirmed part.
    ///
    /// Rejects part numbers outside `1..=part_count` and parts that are
    /// already recorded; the list stays sorted.
    pub fn record_part(&mut self, part: PartRecord) -> Result<(), Error> {
        if part.part_number == 0 || part.part_number > self.part_count {
            return Err(Error::InvalidInput(format!(
                "part {} outside 1..={}",
                part.part_number, self.part_count
            )));
        }
        match self
            .completed_parts
            .binary_search_by_key(&part.part_number, |p| p.part_number)
        {
            Ok(_) => Err(Error::InvalidInput(format!(
                "part {} already recorded",
                part.part_number
            ))),
            Err(idx) => {
                self.completed_parts.insert(idx, part);
                self.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    /// Part numbers not yet confirmed by the store, ascending.
    pub fn outstanding_parts(&self) -> Vec<u32> {
        let mut done = self.completed_parts.iter().map(|p| p.part_number).peekable();
        let mut outstanding = Vec::new();
        for n in 1..=self.part_count {
            if done.peek() == Some(&n) {
                done.next();
            } else {
                outstanding.push(n);
            }
        }
        outstanding
    }

    pub fn is_complete(&self) -> bool {
        self.completed_parts.len() == self.part_count as usize && self.validate().is_ok()
    }

    /// Bytes covered by the completed parts.
    pub fn uploaded_bytes(&self) -> u64 {
        self.completed_parts
            .iter()
            .map(|p| {
                let offset = u64::from(p.part_number - 1) * self.part_size;
                std::cmp::min(self.part_size, self.total_size.saturating_sub(offset))
            })
            .sum()
    }

    /// The part list for the completion request.
    ///
    /// Fails with [`Error::InvalidInput`] unless the completed parts cover
    /// `1..=part_count` with no gaps and no duplicates.
    pub fn manifest(&self) -> Result<Vec<PartRecord>, Error> {
        self.validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let missing = self.outstanding_parts();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "cannot complete {}: parts {missing:?} not uploaded",
                self.destination_key
            )));
        }
        Ok(self.completed_parts.clone())
    }

    /// Checks the structural invariants of a checkpoint read from storage.
    pub fn validate(&self) -> Result<(), Error> {
        if self.session_id.is_empty() {
            return Err(Error::Persistence("checkpoint has no upload id".into()));
        }
        let expected_count = self.total_size.div_ceil(self.part_size.max(1));
        if self.part_size == 0 || expected_count != u64::from(self.part_count) {
            return Err(Error::Persistence(format!(
                "checkpoint layout inconsistent: {} bytes in {} parts of {}",
                self.total_size, self.part_count, self.part_size
            )));
        }
        let mut prev = 0;
        for part in &self.completed_parts {
            if part.part_number <= prev || part.part_number > self.part_count {
                return Err(Error::Persistence(format!(
                    "checkpoint part list out of order or out of range at part {}",
                    part.part_number
                )));
            }
            prev = part.part_number;
        }
        Ok(())
    }
}

/// Deterministic storage key of the session for a (source, destination) pair.
pub fn session_key(source_path: &Path, destination_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(destination_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Durable storage for upload sessions.
///
/// `save` must not return until the checkpoint would survive a process
/// restart; callers treat its failure as fatal to the current part.
pub trait SessionStore: Send + Sync {
    /// Returns the session for a (source, destination) pair, if any.
    fn load(&self, source_path: &Path, destination_key: &str)
    -> Result<Option<UploadSession>, Error>;

    /// Persists `session`, replacing any previous checkpoint for its pair.
    fn save(&self, session: &UploadSession) -> Result<(), Error>;

    /// Removes the session for a pair. Missing sessions are not an error.
    fn delete(&self, source_path: &Path, destination_key: &str) -> Result<(), Error>;

    /// Returns all stored sessions, most recently updated first.
    fn list(&self) -> Result<Vec<UploadSession>, Error>;
}

fn persistence(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Persistence(format!("{context}: {err}"))
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// Stores one JSON checkpoint per session in a directory.
///
/// Writes go to a temporary file that is synced and then renamed over
/// the checkpoint, so a crash leaves either the old or the new record.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source_path: &Path, destination_key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", session_key(source_path, destination_key)))
    }

    fn read(path: &Path) -> Result<UploadSession, Error> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| persistence(&format!("reading {}", path.display()), e))?;
        let session: UploadSession = serde_json::from_str(&data)
            .map_err(|e| persistence(&format!("corrupt checkpoint {}", path.display()), e))?;
        session.validate()?;
        Ok(session)
    }
}

impl SessionStore for FileSessionStore {
    fn load(
        &self,
        source_path: &Path,
        destination_key: &str,
    ) -> Result<Option<UploadSession>, Error> {
        let path = self.path_for(source_path, destination_key);
        if !path.exists() {
            return Ok(None);
        }
        let session = Self::read(&path)?;
        debug!(
            path = %path.display(),
            upload_id = %session.session_id,
            parts = session.completed_parts.len(),
            "loaded checkpoint"
        );
        Ok(Some(session))
    }

    fn save(&self, session: &UploadSession) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| persistence(&format!("creating {}", self.dir.display()), e))?;

        let path = self.path_for(&session.source_path, &session.destination_key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| persistence("encoding checkpoint", e))?;

        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)
        };
        write().map_err(|e| persistence(&format!("writing {}", path.display()), e))?;

        debug!(
            path = %path.display(),
            parts = session.completed_parts.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    fn delete(&self, source_path: &Path, destination_key: &str) -> Result<(), Error> {
        let path = self.path_for(source_path, destination_key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence(&format!("removing {}", path.display()), e)),
        }
    }

    fn list(&self) -> Result<Vec<UploadSession>, Error> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence(&format!("listing {}", self.dir.display()), e)),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Keeps sessions in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn load(
        &self,
        source_path: &Path,
        destination_key: &str,
    ) -> Result<Option<UploadSession>, Error> {
        let key = session_key(source_path, destination_key);
        Ok(self.sessions.read().unwrap().get(&key).cloned())
    }

    fn save(&self, session: &UploadSession) -> Result<(), Error> {
        let key = session_key(&session.source_path, &session.destination_key);
        self.sessions.write().unwrap().insert(key, session.clone());
        Ok(())
    }

    fn delete(&self, source_path: &Path, destination_key: &str) -> Result<(), Error> {
        let key = session_key(source_path, destination_key);
        self.sessions.write().unwrap().remove(&key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<UploadSession>, Error> {
        let mut sessions: Vec<UploadSession> =
            self.sessions.read().unwrap().values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(parts: u32) -> UploadSession {
        let plan = UploadPlan::new(12, 5).unwrap();
        let mut session = UploadSession::new("upload-1", "/data/scene.tiff", "user/scene.tiff", &plan);
        for n in 1..=parts {
            session
                .record_part(PartRecord::new(n, format!("etag-{n}")))
                .unwrap();
        }
        session
    }

    #[test]
    fn new_session_has_everything_outstanding() {
        let session = sample_session(0);
        assert_eq!(session.part_count(), 3);
        assert_eq!(session.outstanding_parts(), vec![1, 2, 3]);
        assert!(!session.is_complete());
        assert_eq!(session.uploaded_bytes(), 0);
    }

    #[test]
    fn record_part_keeps_ascending_order() {
        let mut session = sample_session(0);
        session.record_part(PartRecord::new(3, "c")).unwrap();
        session.record_part(PartRecord::new(1, "a")).unwrap();
        let numbers: Vec<u32> = session.completed_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(session.outstanding_parts(), vec![2]);
        assert_eq!(session.uploaded_bytes(), 5 + 2);
    }

    #[test]
    fn record_part_rejects_duplicates_and_out_of_range() {
        let mut session = sample_session(1);
        assert!(session.record_part(PartRecord::new(1, "again")).is_err());
        assert!(session.record_part(PartRecord::new(0, "zero")).is_err());
        assert!(session.record_part(PartRecord::new(4, "four")).is_err());
        assert_eq!(session.completed_parts().len(), 1);
    }

    #[test]
    fn manifest_requires_every_part() {
        let session = sample_session(2);
        assert!(matches!(session.manifest(), Err(Error::InvalidInput(_))));

        let session = sample_session(3);
        assert!(session.is_complete());
        let manifest = session.manifest().unwrap();
        let numbers: Vec<u32> = manifest.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(session.uploaded_bytes(), 12);
    }

    #[test]
    fn checkpoint_wire_format() {
        let session = sample_session(1);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["uploadId"], "upload-1");
        assert_eq!(json["sourceFile"], "/data/scene.tiff");
        assert_eq!(json["destination"], "user/scene.tiff");
        assert_eq!(json["partsUploaded"][0]["eTag"], "etag-1");
        assert_eq!(json["partsUploaded"][0]["partNumber"], 1);
        assert_eq!(json["partCount"], 3);
    }

    #[test]
    fn matches_plan_detects_size_change() {
        let session = sample_session(1);
        assert!(session.matches_plan(&UploadPlan::new(12, 5).unwrap()));
        assert!(!session.matches_plan(&UploadPlan::new(16, 5).unwrap()));
        assert!(!session.matches_plan(&UploadPlan::new(11, 5).unwrap()));
    }

    #[test]
    fn validate_rejects_unsorted_parts() {
        let mut json = serde_json::to_value(sample_session(2)).unwrap();
        json["partsUploaded"] = serde_json::json!([
            {"eTag": "b", "partNumber": 2},
            {"eTag": "a", "partNumber": 1}
        ]);
        let session: UploadSession = serde_json::from_value(json).unwrap();
        assert!(matches!(session.validate(), Err(Error::Persistence(_))));
    }

    #[test]
    fn session_key_differs_per_pair() {
        let a = session_key(Path::new("/a"), "x");
        let b = session_key(Path::new("/a"), "y");
        let c = session_key(Path::new("/b"), "x");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, session_key(Path::new("/a"), "x"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn file_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path().join("sessions"));
        let session = sample_session(2);

        assert!(store
            .load(session.source_path(), session.destination_key())
            .unwrap()
            .is_none());

        store.save(&session).unwrap();
        let loaded = store
            .load(session.source_path(), session.destination_key())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn file_store_persist_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sessions");
        let session = sample_session(1);

        {
            let store = FileSessionStore::new(&dir);
            store.save(&session).unwrap();
        }

        let store2 = FileSessionStore::new(&dir);
        let loaded = store2
            .load(Path::new("/data/scene.tiff"), "user/scene.tiff")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.completed_parts().len(), 1);
        assert_eq!(loaded.session_id(), "upload-1");
    }

    #[test]
    fn file_store_overwrite_keeps_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let mut session = sample_session(1);
        store.save(&session).unwrap();
        session.record_part(PartRecord::new(2, "etag-2")).unwrap();
        store.save(&session).unwrap();

        let loaded = store
            .load(session.source_path(), session.destination_key())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.outstanding_parts(), vec![3]);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn file_store_delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let session = sample_session(1);
        store.save(&session).unwrap();

        store.delete(session.source_path(), session.destination_key()).unwrap();
        store.delete(session.source_path(), session.destination_key()).unwrap();
        assert!(store
            .load(session.source_path(), session.destination_key())
            .unwrap()
            .is_none());
    }

    #[test]
    fn file_store_corrupt_checkpoint_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let path = tmp
            .path()
            .join(format!("{}.json", session_key(Path::new("/s"), "d")));
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            store.load(Path::new("/s"), "d"),
            Err(Error::Persistence(_))
        ));
        // Listing skips it instead of failing.
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn file_store_list_missing_dir_is_empty() {
        let store = FileSessionStore::new("/tmp/nonexistent_maap_s3_sessions_dir");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn file_store_unwritable_dir_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = FileSessionStore::new(blocker.join("sessions"));
        assert!(matches!(
            store.save(&sample_session(0)),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        let session = sample_session(2);
        store.save(&session).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store
                .load(session.source_path(), session.destination_key())
                .unwrap()
                .unwrap(),
            session
        );
        store.delete(session.source_path(), session.destination_key()).unwrap();
        assert!(store.is_empty());
    }
}
