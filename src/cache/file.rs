use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{CacheError, KvStore};

/// One JSON file per key under a cache directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!("Opened file cache at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

/// Map a cache key onto a portable file name. Bytes outside `[A-Za-z0-9_-]`
/// become `%XX`, so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("cache")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_set_get_remove() {
        let (store, _temp) = create_test_store();

        store.set("shortlist_items:abc", "[]").unwrap();
        assert_eq!(store.get("shortlist_items:abc").unwrap().as_deref(), Some("[]"));

        store.remove("shortlist_items:abc").unwrap();
        assert!(store.get("shortlist_items:abc").unwrap().is_none());
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let (store, _temp) = create_test_store();
        assert!(store.remove("nope").is_ok());
    }

    #[test]
    fn test_survives_reopen() {
        let (store, temp) = create_test_store();
        store.set("auth", r#"{"token":"t"}"#).unwrap();
        drop(store);

        let reopened = FileStore::open(temp.path().join("cache")).unwrap();
        assert_eq!(reopened.get("auth").unwrap().as_deref(), Some(r#"{"token":"t"}"#));
    }

    #[test]
    fn test_key_encoding_keeps_keys_apart() {
        assert_eq!(encode_key("session_abc"), "session_abc");
        assert_eq!(encode_key("tracking_data:abc"), "tracking_data%3Aabc");
        assert_ne!(encode_key("a:b"), encode_key("a/b"));
    }
}
