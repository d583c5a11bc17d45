//! Small persisted settings.
//!
//! A [`Setting`] is a typed value under a string key with a default. Values
//! are stored as JSON text in a [`SettingsBackend`]; tests inject
//! [`InMemorySettings`], applications use [`FileSettings`].

use crate::error::{CoreError, CoreResult};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key-value storage for encoded settings.
pub trait SettingsBackend: Send + Sync {
    /// Encoded value under `key`.
    fn get_raw(&self, key: &str) -> CoreResult<Option<String>>;

    /// Stores an encoded value.
    fn set_raw(&self, key: &str, value: String) -> CoreResult<()>;

    /// Removes `key`; removing an absent key is a no-op.
    fn remove(&self, key: &str) -> CoreResult<()>;
}

/// Settings that live only as long as the value.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySettings {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl SettingsBackend for InMemorySettings {
    fn get_raw(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> CoreResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Settings kept in a JSON document on disk.
///
/// The whole document is read on open and rewritten atomically (temp file
/// then rename) on every change.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettings {
    /// Opens the document at `path`, starting empty when it does not exist.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read; `Codec` when it is not a JSON
    /// object of strings.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path) {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                CoreError::codec(format!("settings file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "opened settings file");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> CoreResult<()> {
        let data = serde_json::to_vec_pretty(values)
            .map_err(|e| CoreError::codec(format!("settings: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("tmp");
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl SettingsBackend for FileSettings {
    fn get_raw(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> CoreResult<()> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value);
        if let Err(err) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        let mut values = self.values.lock();
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&values) {
            values.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }
}

/// A typed setting with a default.
///
/// ```rust
/// use cdlab_core::{InMemorySettings, Setting};
/// use std::sync::Arc;
///
/// let backend = Arc::new(InMemorySettings::new());
/// let volume: Setting<u8> = Setting::new("volume", 50, backend);
/// assert_eq!(volume.get(), 50);
/// volume.set(&80).unwrap();
/// assert_eq!(volume.get(), 80);
/// volume.reset().unwrap();
/// assert_eq!(volume.get(), 50);
/// ```
pub struct Setting<T> {
    key: String,
    default: T,
    backend: Arc<dyn SettingsBackend>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Setting<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Binds `key` in `backend` with a default value.
    pub fn new(key: impl Into<String>, default: T, backend: Arc<dyn SettingsBackend>) -> Self {
        Self {
            key: key.into(),
            default,
            backend,
            _value: PhantomData,
        }
    }

    /// Key the value is stored under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored value, or the default when the key is absent, unreadable or
    /// holds something that no longer decodes as `T`.
    #[must_use]
    pub fn get(&self) -> T {
        match self.backend.get_raw(&self.key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key = %self.key, error = %e, "undecodable setting, using default");
                self.default.clone()
            }),
            Ok(None) => self.default.clone(),
            Err(e) => {
                warn!(key = %self.key, error = %e, "settings backend failed, using default");
                self.default.clone()
            }
        }
    }

    /// Whether a value is stored under the key.
    pub fn is_set(&self) -> CoreResult<bool> {
        Ok(self.backend.get_raw(&self.key)?.is_some())
    }

    /// Stores `value`.
    ///
    /// # Errors
    ///
    /// `Codec` when the value cannot be encoded; backend errors otherwise.
    pub fn set(&self, value: &T) -> CoreResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| CoreError::codec(format!("setting `{}`: {e}", self.key)))?;
        self.backend.set_raw(&self.key, raw)?;
        debug!(key = %self.key, "stored setting");
        Ok(())
    }

    /// Removes the stored value so `get` returns the default again.
    pub fn reset(&self) -> CoreResult<()> {
        self.backend.remove(&self.key)?;
        debug!(key = %self.key, "reset setting");
        Ok(())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("key", &self.key)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Endpoint {
        url: Option<String>,
        token: Option<String>,
    }

    fn empty() -> Endpoint {
        Endpoint {
            url: None,
            token: None,
        }
    }

    #[test]
    fn default_until_set() {
        let backend = Arc::new(InMemorySettings::new());
        let setting = Setting::new("endpoint", empty(), backend.clone());
        assert_eq!(setting.get(), empty());
        assert!(!setting.is_set().unwrap());

        let value = Endpoint {
            url: Some("https://example.com".into()),
            token: Some("secret".into()),
        };
        setting.set(&value).unwrap();
        assert_eq!(setting.get(), value);
        assert_eq!(backend.len(), 1);

        setting.reset().unwrap();
        assert_eq!(setting.get(), empty());
        assert!(backend.is_empty());
    }

    #[test]
    fn undecodable_value_falls_back_to_default() {
        let backend = Arc::new(InMemorySettings::new());
        backend.set_raw("endpoint", "not json".into()).unwrap();
        let setting = Setting::new("endpoint", empty(), backend);
        assert_eq!(setting.get(), empty());
    }

    #[test]
    fn file_settings_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("conf").join("settings.json");
        {
            let backend: Arc<dyn SettingsBackend> = Arc::new(FileSettings::open(&path).unwrap());
            Setting::new("count", 0u32, backend).set(&7).unwrap();
        }

        let backend = Arc::new(FileSettings::open(&path).unwrap());
        assert_eq!(backend.path(), path);
        let count = Setting::new("count", 0u32, backend.clone());
        assert_eq!(count.get(), 7);

        count.reset().unwrap();
        let reopened = Setting::new("count", 0u32, Arc::new(FileSettings::open(&path).unwrap()));
        assert_eq!(reopened.get(), 0);
    }

    #[test]
    fn corrupt_settings_file_is_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, b"[1, 2").unwrap();
        assert!(matches!(
            FileSettings::open(&path).unwrap_err(),
            CoreError::Codec { .. }
        ));
    }
}
