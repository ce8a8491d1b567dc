//! Persisted posture state
//!
//! The posture record is the only state shared between invocations. Every
//! access is a read-modify-write transaction: [`FilePostureStore`] holds an
//! exclusive advisory lock on a sidecar lock file for the whole transaction
//! and replaces the record with an atomic rename. A missing or unreadable
//! record is the default `unknown` state, never an error.

use crate::error::StoreError;
use crate::types::{Posture, PostureState};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Transactional access to the posture record
pub trait PostureStore: Send + Sync {
    /// Read the current state without modifying it
    fn load(&self) -> Result<PostureState, StoreError>;

    /// Run `apply` against the current state atomically
    ///
    /// `apply` returns whether it modified the state; only then is the state
    /// written back. Returns the state as it stands after the transaction.
    fn read_modify_write(
        &self,
        apply: &mut dyn FnMut(&mut PostureState) -> bool,
    ) -> Result<PostureState, StoreError>;

    /// Reset to the default state
    fn reset(&self) -> Result<(), StoreError> {
        self.read_modify_write(&mut |state| {
            *state = PostureState::default();
            true
        })
        .map(|_| ())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryPostureStore {
    state: Mutex<PostureState>,
}

impl MemoryPostureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PostureState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl PostureStore for MemoryPostureStore {
    fn load(&self) -> Result<PostureState, StoreError> {
        Ok(*self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn read_modify_write(
        &self,
        apply: &mut dyn FnMut(&mut PostureState) -> bool,
    ) -> Result<PostureState, StoreError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = *guard;
        if apply(&mut state) {
            *guard = state;
        }
        Ok(*guard)
    }
}

/// On-disk form of the posture record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostureRecord {
    pub posture: Posture,
    pub stability_count: u32,
    pub last_transition_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostureRecord {
    pub fn from_state(state: &PostureState) -> Self {
        Self {
            posture: state.posture,
            stability_count: state.stability_count,
            last_transition_time: state.last_transition_time,
            updated_at: Utc::now(),
        }
    }

    pub fn state(&self) -> PostureState {
        PostureState {
            posture: self.posture,
            stability_count: self.stability_count,
            last_transition_time: self.last_transition_time,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// JSON record on disk, guarded by `<file>.lock`
#[derive(Debug, Clone)]
pub struct FilePostureStore {
    path: PathBuf,
}

impl FilePostureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Open and exclusively lock the sidecar; the lock drops with the file
    fn lock(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(lock_file)
    }

    /// Read the record; absence or corruption reads as the default state
    fn read_unlocked(&self) -> PostureState {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return PostureState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "posture record unreadable, starting fresh");
                return PostureState::default();
            }
        };
        match PostureRecord::from_json(&json) {
            Ok(record) => record.state(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "posture record corrupt, starting fresh");
                PostureState::default()
            }
        }
    }

    /// Write to a unique temp file, then rename over the record
    fn write_unlocked(&self, state: &PostureState) -> Result<(), StoreError> {
        let json = PostureRecord::from_state(state).to_json()?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "posture".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let result = (|| -> Result<(), StoreError> {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

impl PostureStore for FilePostureStore {
    fn load(&self) -> Result<PostureState, StoreError> {
        let _lock = self.lock()?;
        Ok(self.read_unlocked())
    }

    fn read_modify_write(
        &self,
        apply: &mut dyn FnMut(&mut PostureState) -> bool,
    ) -> Result<PostureState, StoreError> {
        let _lock = self.lock()?;
        let mut state = self.read_unlocked();
        if apply(&mut state) {
            self.write_unlocked(&state)?;
            debug!(
                path = %self.path.display(),
                posture = %state.posture,
                stability = state.stability_count,
                "posture record written"
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    fn seated() -> PostureState {
        PostureState {
            posture: Posture::Sitting,
            stability_count: 3,
            last_transition_time: Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePostureStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), PostureState::default());
    }

    #[test]
    fn test_corrupt_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FilePostureStore::new(&path);
        assert_eq!(store.load().unwrap(), PostureState::default());
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FilePostureStore::new(&path);

        store
            .read_modify_write(&mut |state| {
                *state = seated();
                true
            })
            .unwrap();

        let reopened = FilePostureStore::new(&path);
        assert_eq!(reopened.load().unwrap(), seated());

        let record = PostureRecord::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(record.posture, Posture::Sitting);
    }

    #[test]
    fn test_unmodified_state_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FilePostureStore::new(&path);

        store.read_modify_write(&mut |_| false).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_reset() {
        let store = MemoryPostureStore::with_state(seated());
        store.reset().unwrap();
        assert_eq!(store.load().unwrap(), PostureState::default());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FilePostureStore::new(dir.path().join("state.json")));
        store
            .read_modify_write(&mut |state| {
                *state = seated();
                state.stability_count = 0;
                true
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .read_modify_write(&mut |state| {
                                state.stability_count += 1;
                                true
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load().unwrap().stability_count, 80);
    }
}
