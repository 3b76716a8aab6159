//! Provider key resolution.
//!
//! An administrator-provided key (enabled, non-blank) always wins. Otherwise the environment-level
//! key is used, after running the interactive key-selection hook when the host provides one and no
//! key has been chosen yet.

use async_trait::async_trait;
use tracing::debug;

use super::GenerationError;
use crate::models::settings::ProviderKey;

/// Interactive key-selection hook exposed by some hosting environments.
#[async_trait]
pub trait KeySelector: Send + Sync {
    async fn has_selected_key(&self) -> bool;

    /// Open the selection dialog. Completion of the dialog is treated as a selection.
    async fn open_select_key(&self);

    /// The key made available by the selection, if the host exposes one
    async fn selected_key(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Configured by an administrator in the application settings
    Admin,
    /// Environment-level key, possibly chosen through the selection hook
    Environment,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("key", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl ResolvedKey {
    pub fn is_admin(&self) -> bool {
        self.source == KeySource::Admin
    }
}

/// Resolve the key for one generation.
pub async fn resolve_key(
    admin_key: &ProviderKey,
    environment_key: Option<&str>,
    selector: Option<&dyn KeySelector>,
) -> Result<ResolvedKey, GenerationError> {
    if let Some(key) = admin_key.usable_key() {
        debug!("Using administrator provider key");
        return Ok(ResolvedKey {
            key: key.to_string(),
            source: KeySource::Admin,
        });
    }

    let mut selected = None;
    if let Some(selector) = selector {
        if !selector.has_selected_key().await {
            debug!("No provider key selected, opening key selection");
            selector.open_select_key().await;
        }
        selected = selector.selected_key().await;
    }

    selected
        .or_else(|| environment_key.map(str::to_string))
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .map(|key| ResolvedKey {
            key,
            source: KeySource::Environment,
        })
        .ok_or_else(|| GenerationError::KeyUnavailable("No API Key available.".to_string()))
}
