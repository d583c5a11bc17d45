//! Access facade over the persisted credentials.

use crate::model::Access;
use cdlab_core::{CoreResult, Setting, SettingsBackend};
use std::sync::Arc;
use tracing::info;

/// Settings key the credentials are stored under.
pub const ACCESS_KEY: &str = "current_access";

/// Reads and writes the [`Access`] credentials.
#[derive(Debug)]
pub struct AccessBean {
    current: Setting<Access>,
}

impl AccessBean {
    /// Wraps an existing setting.
    #[must_use]
    pub fn new(current: Setting<Access>) -> Self {
        Self { current }
    }

    /// Credentials stored under [`ACCESS_KEY`] in `backend`.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn SettingsBackend>) -> Self {
        Self::new(Setting::new(ACCESS_KEY, Access::empty(), backend))
    }

    /// Stored credentials, empty when none were saved.
    #[must_use]
    pub fn access(&self) -> Access {
        self.current.get()
    }

    /// Stored server URL.
    #[must_use]
    pub fn server_url(&self) -> Option<String> {
        self.access().server_url
    }

    /// Stored secret key.
    #[must_use]
    pub fn secret_key(&self) -> Option<String> {
        self.access().secret_key
    }

    /// Replaces the stored credentials.
    pub fn create_or_update_access(&self, access: &Access) -> CoreResult<()> {
        self.current.set(access)?;
        info!(server_url = ?access.server_url, "stored access");
        Ok(())
    }

    /// Whether complete credentials are stored.
    #[must_use]
    pub fn is_exist(&self) -> bool {
        self.access().is_complete()
    }

    /// Forgets the stored credentials.
    pub fn clear(&self) -> CoreResult<()> {
        self.current.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdlab_core::{FileSettings, InMemorySettings};
    use tempfile::tempdir;

    #[test]
    fn partial_credentials_do_not_count() {
        let bean = AccessBean::with_backend(Arc::new(InMemorySettings::new()));
        bean.create_or_update_access(&Access {
            server_url: Some("https://example.com".into()),
            secret_key: None,
        })
        .unwrap();
        assert_eq!(bean.server_url().as_deref(), Some("https://example.com"));
        assert!(!bean.is_exist());
    }

    #[test]
    fn credentials_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        AccessBean::with_backend(Arc::new(FileSettings::open(&path).unwrap()))
            .create_or_update_access(&Access::new("https://example.com", "key"))
            .unwrap();

        let reopened = AccessBean::with_backend(Arc::new(FileSettings::open(&path).unwrap()));
        assert!(reopened.is_exist());
        assert_eq!(reopened.secret_key().as_deref(), Some("key"));

        reopened.clear().unwrap();
        assert_eq!(reopened.access(), Access::empty());
    }
}
