//! Local persisted fallback store.
//!
//! Used when no hosted database is available. Everything lives in one JSON blob stored under a
//! fixed key ([`STORAGE_KEY`]), i.e. `<data_dir>/veo_saas_db_v1.json`:
//!
//! ```json
//! { "users": [...], "transactions": [...], "settings": { ... } }
//! ```
//!
//! The blob is read once when the store is opened and rewritten after every mutation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{DocumentStore, Result, StoreError};
use crate::models::{Configuration, ConfigurationPatch, Identity, IdentityUpdate, Transaction};

/// Fixed storage key of the persisted blob
pub const STORAGE_KEY: &str = "veo_saas_db_v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Blob {
    users: Vec<Identity>,
    transactions: Vec<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<ConfigurationPatch>,
}

#[derive(Clone)]
pub struct FileStore {
    path: PathBuf,
    blob: Arc<Mutex<Blob>>,
}

impl FileStore {
    /// Open (or start) the blob under `data_dir`.
    ///
    /// A missing file starts an empty store. A file that cannot be parsed is logged and ignored so
    /// that a corrupt blob never prevents startup; it is overwritten by the next mutation.
    #[instrument(skip_all)]
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(format!("{STORAGE_KEY}.json"));

        let blob = match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice::<Blob>(&raw) {
                Ok(blob) => {
                    info!(
                        users = blob.users.len(),
                        transactions = blob.transactions.len(),
                        "Loaded persisted store"
                    );
                    blob
                }
                Err(e) => {
                    warn!("Persisted store at {} is unreadable, starting empty: {}", path.display(), e);
                    Blob::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted store at {}, starting empty", path.display());
                Blob::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            blob: Arc::new(Mutex::new(blob)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, blob: &Blob) -> Result<()> {
        let raw = serde_json::to_vec_pretty(blob)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get_identity(&self, id: &str) -> Result<Option<Identity>> {
        let blob = self.blob.lock().await;
        Ok(blob.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        Ok(self.blob.lock().await.users.clone())
    }

    async fn has_any_identity(&self) -> Result<bool> {
        Ok(!self.blob.lock().await.users.is_empty())
    }

    async fn put_identity(&self, identity: &Identity) -> Result<()> {
        let mut blob = self.blob.lock().await;
        match blob.users.iter_mut().find(|u| u.id == identity.id) {
            Some(existing) => *existing = identity.clone(),
            None => blob.users.push(identity.clone()),
        }
        self.persist(&blob).await
    }

    async fn update_identity(&self, id: &str, update: &IdentityUpdate) -> Result<()> {
        let mut blob = self.blob.lock().await;
        let identity = blob
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("users/{id}")))?;
        identity.apply(update);
        self.persist(&blob).await
    }

    async fn get_configuration(&self) -> Result<Option<ConfigurationPatch>> {
        Ok(self.blob.lock().await.settings.clone())
    }

    async fn put_configuration(&self, configuration: &Configuration) -> Result<()> {
        let document = serde_json::from_value(serde_json::to_value(configuration)?)?;
        let mut blob = self.blob.lock().await;
        blob.settings = Some(document);
        self.persist(&blob).await
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.blob.lock().await.transactions.clone())
    }
}
