//! Key-value persistence behind the credential store.
//!
//! Two backends: [`MemoryStorage`] for tests and throwaway sessions, and
//! [`FileStorage`], a JSON object on disk that survives restarts.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DocError, DocResult};

/// 本地存储操作接口
pub trait KeyValueStore {
    /// `None` when the key is absent.
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> DocResult<()>;
    /// `Ok(true)` if the key existed.
    fn delete(&self, key: &str) -> DocResult<bool>;

    /// Removes every key even when one removal fails, then reports the
    /// first failure. `Ok` carries how many keys existed.
    fn delete_all(&self, keys: &[&str]) -> DocResult<usize> {
        let mut removed = 0;
        let mut first_error = None;
        for key in keys {
            match self.delete(key) {
                Ok(existed) => removed += usize::from(existed),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

// =========================================================
// 内存实现
// =========================================================

#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> DocResult<()> {
        self.map
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> DocResult<bool> {
        Ok(self.map.borrow_mut().remove(key).is_some())
    }
}

// =========================================================
// 文件实现
// =========================================================

/// A JSON object file, rewritten in full on every mutation.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    cache: RefCell<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Loads `path` if it exists; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> DocResult<Self> {
        let path = path.into();
        let cache = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DocError::storage(format!("corrupt credentials file: {}", e))
                    .with_source(e)
                    .in_op_with("storage.open", path.display().to_string())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(DocError::from(e).in_op_with("storage.open", path.display().to_string()));
            }
        };
        Ok(Self {
            path,
            cache: RefCell::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> DocResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    DocError::from(e).in_op_with("storage.mkdir", parent.display().to_string())
                })?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&*self.cache.borrow())?;
        fs::write(&self.path, bytes).map_err(|e| {
            DocError::from(e).in_op_with("storage.write", self.path.display().to_string())
        })?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> DocResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| DocError::from(e).in_op_with("storage.chmod", path.display().to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> DocResult<()> {
    Ok(())
}

impl KeyValueStore for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.borrow().get(key).cloned()
    }

    /// The cache only changes if the file was written.
    fn set(&self, key: &str, value: &str) -> DocResult<()> {
        let previous = self
            .cache
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush() {
            let mut cache = self.cache.borrow_mut();
            match previous {
                Some(old) => cache.insert(key.to_string(), old),
                None => cache.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// A failed write still drops the key from memory: removals are used to
    /// end sessions, and the process must not keep acting on them.
    fn delete(&self, key: &str) -> DocResult<bool> {
        self.delete_all(&[key]).map(|n| n > 0)
    }

    fn delete_all(&self, keys: &[&str]) -> DocResult<usize> {
        let removed = {
            let mut cache = self.cache.borrow_mut();
            keys.iter().filter(|k| cache.remove(**k).is_some()).count()
        };
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::error::DocErrorKind;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k"), None);

        storage.set("k", "v1").unwrap();
        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k"), Some("v2".to_string()));

        assert!(storage.delete("k").unwrap());
        assert!(!storage.delete("k").unwrap());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_file_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get("token"), None);
        storage.set("token", "abc").unwrap();
        storage.set("other", "x").unwrap();
        storage.delete("other").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("token"), Some("abc".to_string()));
        assert_eq!(reopened.get("other"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let storage = FileStorage::open(&path).unwrap();
        storage.set("token", "abc").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    /// Swaps the credentials file for a directory so every write fails.
    pub fn break_file(path: &Path) {
        fs::remove_file(path).unwrap();
        fs::create_dir(path).unwrap();
    }

    #[test]
    fn test_failed_set_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let storage = FileStorage::open(&path).unwrap();
        storage.set("token", "old").unwrap();
        break_file(&path);

        let err = storage.set("token", "new").unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Storage);
        assert_eq!(storage.get("token"), Some("old".to_string()));

        assert!(storage.set("fresh", "x").is_err());
        assert_eq!(storage.get("fresh"), None);
    }

    #[test]
    fn test_delete_all_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let storage = FileStorage::open(&path).unwrap();
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.set("keep", "3").unwrap();

        assert_eq!(storage.delete_all(&["a", "b", "missing"]).unwrap(), 2);
        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("a"), None);
        assert_eq!(reopened.get("b"), None);
        assert_eq!(reopened.get("keep"), Some("3".to_string()));

        // nothing to remove, nothing written
        break_file(&path);
        assert_eq!(storage.delete_all(&["a"]).unwrap(), 0);
    }

    #[test]
    fn test_memory_delete_all() {
        let storage = MemoryStorage::new();
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        assert_eq!(storage.delete_all(&["a", "b", "c"]).unwrap(), 2);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, b"{not json").unwrap();

        let err = FileStorage::open(&path).unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Storage);
    }
}
