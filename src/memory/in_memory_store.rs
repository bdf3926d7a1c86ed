//! In-process [`Store`] backed by a locked map. Reference implementation for
//! tests and single-process embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::memory::store::{Item, Namespace, Store, StoreError};

#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<HashMap<(Namespace, String), Item>>,
    logs: RwLock<HashMap<(Namespace, String), Vec<serde_json::Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, StoreError> {
        let items = self.items.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(items.get(&(namespace.clone(), key.to_string())).cloned())
    }

    async fn put(&self, namespace: &Namespace, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        let now = Utc::now();
        let entry_key = (namespace.clone(), key.to_string());
        let created_at = items.get(&entry_key).map(|i| i.created_at).unwrap_or(now);
        items.insert(
            entry_key,
            Item {
                namespace: namespace.clone(),
                key: key.to_string(),
                value,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        items.remove(&(namespace.clone(), key.to_string()));
        Ok(())
    }

    async fn list(&self, namespace: &Namespace) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(items
            .values()
            .filter(|i| &i.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn append(&self, namespace: &Namespace, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut logs = self.logs.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        logs.entry((namespace.clone(), key.to_string())).or_default().push(value);
        Ok(())
    }

    async fn read_log(&self, namespace: &Namespace, key: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let logs = self.logs.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(logs.get(&(namespace.clone(), key.to_string())).cloned().unwrap_or_default())
    }
}
