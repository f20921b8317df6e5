use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::{Map, Value};
use tabs::WindowId;
use thiserror::Error;
use tokio::sync::Mutex;

/// Failure reported by a window value backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("window storage i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("window storage file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Host per-window persisted key/value storage.
///
/// Values are JSON so any backend can persist them verbatim. Backends are
/// best effort; callers decide what a failure means.
#[allow(async_fn_in_trait)]
pub trait WindowValueStore {
    /// Reads a value, `None` if the key is absent.
    async fn get_window_value(
        &self,
        window: WindowId,
        key: &str,
    ) -> Result<Option<Value>, StorageError>;

    /// Writes a value, replacing any previous one.
    async fn set_window_value(
        &self,
        window: WindowId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError>;

    /// Removes a key. Removing an absent key is not an error.
    async fn remove_window_value(&self, window: WindowId, key: &str) -> Result<(), StorageError>;
}

impl<T: WindowValueStore> WindowValueStore for Rc<T> {
    async fn get_window_value(
        &self,
        window: WindowId,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        T::get_window_value(self, window, key).await
    }

    async fn set_window_value(
        &self,
        window: WindowId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        T::set_window_value(self, window, key, value).await
    }

    async fn remove_window_value(&self, window: WindowId, key: &str) -> Result<(), StorageError> {
        T::remove_window_value(self, window, key).await
    }
}

/// Volatile store that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    values: RefCell<HashMap<WindowId, HashMap<String, Value>>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the keys currently stored for a window, sorted.
    pub fn keys(&self, window: WindowId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .values
            .borrow()
            .get(&window)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl WindowValueStore for MemoryWindowStore {
    async fn get_window_value(
        &self,
        window: WindowId,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .values
            .borrow()
            .get(&window)
            .and_then(|values| values.get(key))
            .cloned())
    }

    async fn set_window_value(
        &self,
        window: WindowId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        self.values
            .borrow_mut()
            .entry(window)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_window_value(&self, window: WindowId, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.borrow_mut();
        if let Some(window_values) = values.get_mut(&window) {
            window_values.remove(key);
            if window_values.is_empty() {
                values.remove(&window);
            }
        }
        Ok(())
    }
}

/// Store that keeps one JSON object per window under a directory, so values
/// survive process restarts.
///
/// Writes are read-modify-write of the whole window file and are serialized;
/// clones share the same lock.
#[derive(Debug, Clone)]
pub struct FileWindowStore {
    dir: PathBuf,
    writes: Rc<Mutex<()>>,
}

impl FileWindowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writes: Rc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn window_path(&self, window: WindowId) -> PathBuf {
        self.dir.join(format!("window-{window}.json"))
    }

    async fn load(&self, path: &Path) -> Result<Map<String, Value>, StorageError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn persist(&self, path: &Path, values: &Map<String, Value>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        if values.is_empty() {
            return match tokio::fs::remove_file(path).await {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(io_err(err)),
                _ => Ok(()),
            };
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let bytes = serde_json::to_vec(values).map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        // Write through a sibling file so a crash never leaves half a JSON object.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&staging, path).await.map_err(io_err)?;
        tracing::trace!(path = %path.display(), keys = values.len(), "window values persisted");
        Ok(())
    }
}

impl WindowValueStore for FileWindowStore {
    async fn get_window_value(
        &self,
        window: WindowId,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        let values = self.load(&self.window_path(window)).await?;
        Ok(values.get(key).cloned())
    }

    async fn set_window_value(
        &self,
        window: WindowId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        let _write = self.writes.lock().await;
        let path = self.window_path(window);
        let mut values = self.load(&path).await?;
        values.insert(key.to_string(), value);
        self.persist(&path, &values).await
    }

    async fn remove_window_value(&self, window: WindowId, key: &str) -> Result<(), StorageError> {
        let _write = self.writes.lock().await;
        let path = self.window_path(window);
        let mut values = self.load(&path).await?;
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&path, &values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_get_set_remove() {
        let store = MemoryWindowStore::new();
        let window = WindowId::new(1);

        assert!(store.get_window_value(window, "k").await.unwrap().is_none());
        store.set_window_value(window, "k", json!({"a": 1})).await.unwrap();
        store.set_window_value(window, "other", json!(true)).await.unwrap();
        assert_eq!(
            store.get_window_value(window, "k").await.unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(store.keys(window), ["k", "other"]);
        assert!(store.keys(WindowId::new(2)).is_empty());

        store.remove_window_value(window, "k").await.unwrap();
        store.remove_window_value(window, "missing").await.unwrap();
        assert_eq!(store.keys(window), ["other"]);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let window = WindowId::new(3);

        let store = FileWindowStore::new(dir.path().join("cache"));
        store.set_window_value(window, "sig", json!("1:0:a")).await.unwrap();
        store.set_window_value(window, "dirty", json!(true)).await.unwrap();

        let reopened = FileWindowStore::new(dir.path().join("cache"));
        assert_eq!(
            reopened.get_window_value(window, "sig").await.unwrap(),
            Some(json!("1:0:a"))
        );

        reopened.remove_window_value(window, "sig").await.unwrap();
        reopened.remove_window_value(window, "dirty").await.unwrap();
        assert!(!dir.path().join("cache/window-3.json").exists());
        assert!(reopened.get_window_value(window, "sig").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("window-5.json"), b"{not json").unwrap();

        let store = FileWindowStore::new(dir.path());
        let err = store
            .get_window_value(WindowId::new(5), "sig")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_window_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWindowStore::new(dir.path());
        let window = WindowId::new(7);

        let (first, second) = tokio::join!(
            store.set_window_value(window, "tree", json!({"version": 1})),
            store.set_window_value(window, "sig", json!("1:0:a")),
        );
        first.unwrap();
        second.unwrap();
        assert!(store.get_window_value(window, "tree").await.unwrap().is_some());
        assert!(store.get_window_value(window, "sig").await.unwrap().is_some());
    }
}
