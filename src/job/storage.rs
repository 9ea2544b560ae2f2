use serde_json::Value;

use super::EventData;
use crate::storage::{STORAGE_LOCAL, STORAGE_SDCARD};

/// The (store, path) pair a storage-backed job refers to for its whole life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    storage: String,
    path_in_storage: String,
}

impl StorageLocation {
    pub fn new(storage: impl Into<String>, path_in_storage: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            path_in_storage: path_in_storage.into(),
        }
    }

    pub fn local(path_in_storage: impl Into<String>) -> Self {
        Self::new(STORAGE_LOCAL, path_in_storage)
    }

    pub fn sdcard(path_in_storage: impl Into<String>) -> Self {
        Self::new(STORAGE_SDCARD, path_in_storage)
    }

    pub fn storage(&self) -> &str {
        &self.storage
    }

    pub fn path_in_storage(&self) -> &str {
        &self.path_in_storage
    }

    pub(crate) fn extend_payload(&self, payload: &mut EventData, name: Option<&str>) {
        payload.insert(
            "name".to_string(),
            name.map(|n| Value::String(n.to_string())).unwrap_or(Value::Null),
        );
        payload.insert("path".to_string(), Value::String(self.path_in_storage.clone()));
        payload.insert("origin".to_string(), Value::String(self.storage.clone()));
    }
}
