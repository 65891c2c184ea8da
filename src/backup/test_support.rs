// In-memory remote store used by the backup tests.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::backup::s3_upload::{RemoteObject, RemoteStore};
use crate::errors::{BackupError, Result};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, RemoteObject>>,
    fail_uploads: bool,
    fail_listing: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        MemoryStore {
            fail_uploads: true,
            fail_listing: true,
            ..Default::default()
        }
    }

    pub fn insert(&self, key: &str, size: u64, last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            RemoteObject {
                key: key.to_string(),
                size,
                last_modified: Some(last_modified),
            },
        );
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

impl RemoteStore for MemoryStore {
    async fn upload(&self, path: &Path, key: &str) -> Result<()> {
        if self.fail_uploads {
            return Err(BackupError::Remote(format!("simulated upload failure for {}", key)));
        }
        let size = std::fs::metadata(path)?.len();
        self.insert(key, size, Utc::now());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        if self.fail_listing {
            return Err(BackupError::Remote("simulated listing failure".to_string()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
