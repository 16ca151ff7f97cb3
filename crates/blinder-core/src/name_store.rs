//! Face id → identity label.

use crate::store::{KvStore, StoreError};
use std::path::Path;

pub const NAME_STORE_DIR: &str = "name.store";

/// Labels are not unique: many face ids may share one.
pub struct NameStore {
    store: KvStore<String>,
}

impl NameStore {
    pub async fn open(workdir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            store: KvStore::open(workdir.join(NAME_STORE_DIR)).await?,
        })
    }

    pub async fn set_name(&self, id: &str, label: &str) -> Result<(), StoreError> {
        tracing::debug!(id, label, "set name");
        self.store.put(id, &label.to_string()).await
    }

    pub async fn get_name(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.store.get(id).await
    }

    /// Returns whether a name was removed.
    pub async fn delete_name(&self, id: &str) -> Result<bool, StoreError> {
        tracing::debug!(id, "delete name");
        self.store.delete(id).await
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }

    pub async fn destroy(&self) -> Result<(), StoreError> {
        self.store.destroy().await
    }
}
