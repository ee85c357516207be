//! Flat-file voiceprint store.
//!
//! Voiceprints live in a single JSON document mapping user id to embedding
//! vector. The document is loaded once at startup and rewritten in full after
//! every successful registration. Mutations hold the store lock across the
//! in-memory update and the file rewrite, and the rewrite goes through a
//! sibling `.part` file followed by an atomic rename so readers never observe
//! a truncated document.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::AppError;

/// Mutex-guarded map of registered voiceprints, persisted as one JSON file.
pub struct VoiceprintStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl VoiceprintStore {
    /// Opens the store at `path`, loading any existing document.
    ///
    /// A missing file is an empty store; a malformed file is an error so a
    /// corrupted document is caught at startup rather than silently replaced.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, Vec<f32>>>(&bytes).map_err(
                |err| {
                    AppError::internal(format!(
                        "malformed voiceprint file {path:?}: {err}"
                    ))
                },
            )?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(AppError::internal(format!(
                    "failed to read voiceprint file {path:?}: {err}"
                )));
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Returns the stored embedding for `user_id`, if registered.
    pub fn get(&self, user_id: &str) -> Option<Vec<f32>> {
        self.lock().get(user_id).cloned()
    }

    /// Inserts or overwrites the embedding for `user_id` and persists the
    /// whole document before releasing the lock.
    pub fn insert(&self, user_id: &str, embedding: Vec<f32>) -> Result<(), AppError> {
        let mut entries = self.lock();
        entries.insert(user_id.to_string(), embedding);
        self.persist(&entries)
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<f32>>> {
        // A poisoned lock means a panic mid-insert; the map itself is still
        // consistent because persist happens after the in-memory update.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &HashMap<String, Vec<f32>>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    AppError::internal(format!(
                        "failed to create voiceprint directory {parent:?}: {err}"
                    ))
                })?;
            }
        }

        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|err| AppError::internal(format!("failed to encode voiceprints: {err}")))?;

        let part_path = part_path_for(&self.path);
        let mut file = fs::File::create(&part_path).map_err(|err| {
            AppError::internal(format!(
                "failed to create voiceprint temp file {part_path:?}: {err}"
            ))
        })?;
        file.write_all(&bytes).and_then(|_| file.flush()).map_err(|err| {
            let _ = fs::remove_file(&part_path);
            AppError::internal(format!(
                "failed writing voiceprint temp file {part_path:?}: {err}"
            ))
        })?;

        fs::rename(&part_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&part_path);
            AppError::internal(format!(
                "failed to move voiceprints from {part_path:?} to {:?}: {err}",
                self.path
            ))
        })
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "voiceprint.json".to_string());
    name.push_str(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::{part_path_for, VoiceprintStore};
    use std::path::Path;
    use std::sync::Arc;

    #[test]
    fn part_path_is_sibling_file() {
        assert_eq!(
            part_path_for(Path::new("/data/voiceprint.json")).to_string_lossy(),
            "/data/voiceprint.json.part"
        );
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = VoiceprintStore::open(dir.path().join("voiceprint.json")).expect("open");
        assert_eq!(store.user_count(), 0);
        assert!(store.get("alice").is_none());
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("voiceprint.json");
        std::fs::write(&path, b"not json").expect("write");
        assert!(VoiceprintStore::open(path).is_err());
    }

    #[test]
    fn insert_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("voiceprint.json");

        let store = VoiceprintStore::open(&path).expect("open");
        store.insert("alice", vec![0.1, 0.2, 0.3]).expect("insert");

        let reopened = VoiceprintStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("alice"), Some(vec![0.1, 0.2, 0.3]));
        assert_eq!(reopened.user_count(), 1);
    }

    #[test]
    fn insert_overwrites_previous_embedding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = VoiceprintStore::open(dir.path().join("voiceprint.json")).expect("open");

        store.insert("alice", vec![1.0]).expect("first");
        store.insert("alice", vec![2.0]).expect("second");

        assert_eq!(store.get("alice"), Some(vec![2.0]));
        assert_eq!(store.user_count(), 1);
    }

    #[test]
    fn concurrent_inserts_do_not_lose_updates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("voiceprint.json");
        let store = Arc::new(VoiceprintStore::open(&path).expect("open"));

        let handles = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .insert(&format!("user-{n}"), vec![n as f32])
                        .expect("insert")
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join");
        }

        let reopened = VoiceprintStore::open(&path).expect("reopen");
        assert_eq!(reopened.user_count(), 8);
        for n in 0..8 {
            assert_eq!(reopened.get(&format!("user-{n}")), Some(vec![n as f32]));
        }
    }
}
