//! File-backed identity store.
//!
//! One `postcard`-serialized file per identity under the store directory,
//! named by the URL-safe base64 of the identity name. Scans stream records
//! one at a time via [`IdentityStore::iter`] instead of loading the whole
//! gallery.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const RECORD_EXT: &str = "bin";

/// Free-text metadata attached to an identity. Overwritten wholesale on
/// repeat enrollment (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttributes {
    pub age: Option<String>,
    pub description: Option<String>,
}

/// One enrolled person: the i-th embedding always corresponds to the i-th
/// image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    /// Codec-encoded embedding strings, in enrollment order.
    pub embeddings: Vec<String>,
    /// Opaque references to the stored source images, in enrollment order.
    pub image_refs: Vec<String>,
    #[serde(default)]
    pub attributes: IdentityAttributes,
}

impl IdentityRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embeddings: Vec::new(),
            image_refs: Vec::new(),
            attributes: IdentityAttributes::default(),
        }
    }

    /// Sample-correspondence invariant.
    pub fn is_consistent(&self) -> bool {
        self.embeddings.len() == self.image_refs.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("identity store unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid identity record at {}: {}", path.display(), reason)]
    BadRecord { path: PathBuf, reason: String },
    #[error("identity name must not be empty")]
    InvalidName,
    #[error("serializing identity record for {0}")]
    Encode(String),
}

pub struct IdentityStore {
    root: PathBuf,
}

impl IdentityStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidName);
        }
        Ok(self
            .root
            .join(format!("{}.{}", URL_SAFE_NO_PAD.encode(name), RECORD_EXT)))
    }

    pub fn get(&self, name: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let path = self.record_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Persist a record, replacing any previous version atomically (write to
    /// a temp file, then rename), so a failed write never leaves a record
    /// with mismatched embedding/image sequences.
    pub fn put(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        if !record.is_consistent() {
            return Err(StoreError::BadRecord {
                path: self.root.clone(),
                reason: format!(
                    "{}: {} embeddings vs {} image refs",
                    record.name,
                    record.embeddings.len(),
                    record.image_refs.len()
                ),
            });
        }
        let path = self.record_path(&record.name)?;
        let data = postcard::to_allocvec(record)
            .map_err(|_| StoreError::Encode(record.name.clone()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove one identity, returning the removed record (whose image
    /// references the caller may want to release).
    pub fn remove(&self, name: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let path = self.record_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let record = read_record(&path)?;
        fs::remove_file(&path)?;
        Ok(Some(record))
    }

    /// Remove every identity record; returns how many were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == RECORD_EXT) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Stream all records in directory order, one file read per step.
    pub fn iter(&self) -> Result<RecordIter, StoreError> {
        Ok(RecordIter {
            entries: fs::read_dir(&self.root)?,
        })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.iter()?.next().is_none())
    }
}

pub struct RecordIter {
    entries: fs::ReadDir,
}

impl Iterator for RecordIter {
    type Item = Result<IdentityRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.entries.next()? {
                Ok(entry) => {
                    let path = entry.path();
                    if path.extension().is_some_and(|e| e == RECORD_EXT) {
                        return Some(read_record(&path));
                    }
                    // Skip temp files and strays.
                }
                Err(e) => return Some(Err(StoreError::Io(e))),
            }
        }
    }
}

fn read_record(path: &Path) -> Result<IdentityRecord, StoreError> {
    let data = fs::read(path)?;
    let record: IdentityRecord =
        postcard::from_bytes(&data).map_err(|e| StoreError::BadRecord {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !record.is_consistent() {
        return Err(StoreError::BadRecord {
            path: path.to_path_buf(),
            reason: format!(
                "{}: {} embeddings vs {} image refs",
                record.name,
                record.embeddings.len(),
                record.image_refs.len()
            ),
        });
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(name: &str) -> IdentityRecord {
        IdentityRecord {
            name: name.to_string(),
            embeddings: vec!["AAAA".into()],
            image_refs: vec!["img-1".into()],
            attributes: IdentityAttributes {
                age: Some("34".into()),
                description: None,
            },
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        store.put(&sample("alice")).unwrap();
        let got = store.get("alice").unwrap().unwrap();
        assert_eq!(got, sample("alice"));
        assert!(store.get("bob").unwrap().is_none());
    }

    #[test]
    fn test_names_with_awkward_characters() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        for name in ["../escape", "a/b", "weird name?*", "Ünïcode"] {
            store.put(&sample(name)).unwrap();
            assert_eq!(store.get(name).unwrap().unwrap().name, name);
        }
        // Nothing escaped the store directory.
        assert_eq!(store.iter().unwrap().count(), 4);
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.put(&sample("")),
            Err(StoreError::InvalidName)
        ));
    }

    #[test]
    fn test_inconsistent_record_rejected() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        let mut rec = sample("alice");
        rec.embeddings.push("BBBB".into());
        assert!(matches!(
            store.put(&rec),
            Err(StoreError::BadRecord { .. })
        ));
    }

    #[test]
    fn test_iter_sees_each_record_once() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        for name in ["a", "b", "c"] {
            store.put(&sample(name)).unwrap();
        }
        let mut names: Vec<String> = store
            .iter()
            .unwrap()
            .map(|r| r.unwrap().name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_returns_record() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        store.put(&sample("alice")).unwrap();
        let removed = store.remove("alice").unwrap().unwrap();
        assert_eq!(removed.image_refs, vec!["img-1".to_string()]);
        assert!(store.get("alice").unwrap().is_none());
        assert!(store.remove("alice").unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        store.put(&sample("a")).unwrap();
        store.put(&sample("b")).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.is_empty().unwrap());
    }
}
