//! Subscriber registry
//!
//! Idempotent subscribe/unsubscribe over a JSON state file. The whole set is
//! small (chat ids), so every mutation rewrites the file.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::types::Subscriber;

/// Opt-in recipient registry, one record per chat id
pub struct SubscriberRegistry {
    path: PathBuf,
    inner: AsyncRwLock<BTreeMap<i64, Subscriber>>,
}

impl SubscriberRegistry {
    /// Load the registry from `data_dir/subscribers.json`; a missing file
    /// means an empty registry.
    pub fn load(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        let path = data_dir.join("subscribers.json");

        let subscribers = if path.exists() {
            let json = fs::read_to_string(&path).context("Failed to read subscriber state")?;
            let records: Vec<Subscriber> =
                serde_json::from_str(&json).context("Failed to parse subscriber state")?;
            info!(count = records.len(), "Loaded subscribers from disk");
            records.into_iter().map(|s| (s.user_id, s)).collect()
        } else {
            info!("No previous subscriber state, starting fresh");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            inner: AsyncRwLock::new(subscribers),
        })
    }

    fn persist(&self, subscribers: &BTreeMap<i64, Subscriber>) -> Result<()> {
        let records: Vec<&Subscriber> = subscribers.values().collect();
        let json = serde_json::to_string_pretty(&records)
            .context("Failed to serialize subscriber state")?;
        fs::write(&self.path, json).context("Failed to write subscriber state")?;
        Ok(())
    }

    /// Add a subscriber. Returns `true` when the record is new; duplicates
    /// are a successful no-op.
    pub async fn subscribe(&self, user_id: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&user_id) {
            return Ok(false);
        }
        inner.insert(
            user_id,
            Subscriber {
                user_id,
                subscribed_at: Utc::now(),
            },
        );
        self.persist(&inner)?;
        info!(user_id, total = inner.len(), "Subscriber added");
        Ok(true)
    }

    /// Remove a subscriber. Returns `true` when a record existed; removing a
    /// missing id is a successful no-op.
    pub async fn unsubscribe(&self, user_id: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.remove(&user_id).is_none() {
            return Ok(false);
        }
        self.persist(&inner)?;
        info!(user_id, total = inner.len(), "Subscriber removed");
        Ok(true)
    }

    /// Owned snapshot of all active subscriber ids.
    pub async fn list_active(&self) -> Vec<i64> {
        self.inner.read().await.keys().copied().collect()
    }

    /// Number of active subscribers.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_data_dir() -> String {
        let dir = std::env::temp_dir().join(format!("xsushi-subs-{}", uuid::Uuid::new_v4()));
        dir.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let registry = SubscriberRegistry::load(&temp_data_dir()).unwrap();

        assert!(registry.subscribe(42).await.unwrap());
        assert!(!registry.subscribe(42).await.unwrap());

        assert_eq!(registry.list_active().await, vec![42]);
    }

    #[tokio::test]
    async fn unsubscribe_missing_id_succeeds() {
        let registry = SubscriberRegistry::load(&temp_data_dir()).unwrap();

        assert!(!registry.unsubscribe(99).await.unwrap());

        registry.subscribe(99).await.unwrap();
        assert!(registry.unsubscribe(99).await.unwrap());
        assert!(registry.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn registry_survives_a_restart() {
        let data_dir = temp_data_dir();

        {
            let registry = SubscriberRegistry::load(&data_dir).unwrap();
            registry.subscribe(1).await.unwrap();
            registry.subscribe(2).await.unwrap();
            registry.unsubscribe(1).await.unwrap();
        }

        let reopened = SubscriberRegistry::load(&data_dir).unwrap();
        assert_eq!(reopened.list_active().await, vec![2]);
    }
}
