//! In-memory document store.
//!
//! Stands in for the hosted document database in tests and local runs. Documents live in
//! process memory and are lost on restart. The store can be switched to "unavailable" (every call
//! fails) or given an artificial latency to exercise the session cache's fallback paths.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentStore, Result, StoreError};
use crate::models::{Configuration, ConfigurationPatch, Identity, IdentityUpdate, Transaction};

#[derive(Default)]
struct Documents {
    identities: BTreeMap<String, Identity>,
    configuration: Option<ConfigurationPatch>,
    transactions: Vec<Transaction>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    documents: Arc<RwLock<Documents>>,
    unavailable: Arc<AtomicBool>,
    latency: Arc<RwLock<Option<Duration>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed identity documents without counting them as writes
    pub async fn with_identities(self, identities: impl IntoIterator<Item = Identity>) -> Self {
        {
            let mut docs = self.documents.write().await;
            for identity in identities {
                docs.identities.insert(identity.id.clone(), identity);
            }
        }
        self
    }

    pub async fn with_transactions(self, transactions: Vec<Transaction>) -> Self {
        self.documents.write().await.transactions = transactions;
        self
    }

    pub async fn with_configuration(self, configuration: ConfigurationPatch) -> Self {
        self.documents.write().await.configuration = Some(configuration);
        self
    }

    /// Make every subsequent call fail (`false`) or succeed again (`true`)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// Number of successful write operations so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Read an identity document directly, bypassing availability and latency
    pub async fn snapshot_identity(&self, id: &str) -> Option<Identity> {
        self.documents.read().await.identities.get(id).cloned()
    }

    /// Read the configuration document directly, bypassing availability and latency
    pub async fn snapshot_configuration(&self) -> Option<ConfigurationPatch> {
        self.documents.read().await.configuration.clone()
    }

    async fn gate(&self) -> Result<()> {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_identity(&self, id: &str) -> Result<Option<Identity>> {
        self.gate().await?;
        Ok(self.documents.read().await.identities.get(id).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        self.gate().await?;
        Ok(self.documents.read().await.identities.values().cloned().collect())
    }

    async fn has_any_identity(&self) -> Result<bool> {
        self.gate().await?;
        Ok(!self.documents.read().await.identities.is_empty())
    }

    async fn put_identity(&self, identity: &Identity) -> Result<()> {
        self.gate().await?;
        self.documents
            .write()
            .await
            .identities
            .insert(identity.id.clone(), identity.clone());
        self.record_write();
        Ok(())
    }

    async fn update_identity(&self, id: &str, update: &IdentityUpdate) -> Result<()> {
        self.gate().await?;
        let mut docs = self.documents.write().await;
        let identity = docs
            .identities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("users/{id}")))?;
        identity.apply(update);
        self.record_write();
        Ok(())
    }

    async fn get_configuration(&self) -> Result<Option<ConfigurationPatch>> {
        self.gate().await?;
        Ok(self.documents.read().await.configuration.clone())
    }

    async fn put_configuration(&self, configuration: &Configuration) -> Result<()> {
        self.gate().await?;
        let document = serde_json::from_value(serde_json::to_value(configuration)?)?;
        self.documents.write().await.configuration = Some(document);
        self.record_write();
        Ok(())
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        self.gate().await?;
        Ok(self.documents.read().await.transactions.clone())
    }
}
