//! Authentication seam.
//!
//! The authenticator itself is an external collaborator (a hosted, popup-based sign-in flow). The
//! session only needs two things from it:
//!
//! - an interactive sign-in that yields the external identity, or fails
//! - a stream of "current external identity or none" events for the lifetime of the process,
//!   exposed as a [`tokio::sync::watch`] receiver so that a late subscriber still sees the
//!   current state
//!
//! [`LocalAuthenticator`] is the implementation used by the command-line host: it signs in as the
//! identity from the configuration file without any interaction.
//!
//! Role-based permission checks live in [`permissions`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::config::LocalIdentityConfig;

pub mod permissions;

/// Identity as reported by the external authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The user closed the sign-in popup. Absorbed by the session, never shown as a failure.
    #[error("Sign-in popup was closed")]
    PopupDismissed,

    #[error("Sign-in popup was blocked")]
    PopupBlocked,

    #[error("Sign-in failed: {0}")]
    Provider(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Subscribe to auth-state changes. The receiver's current value is the current state.
    fn subscribe(&self) -> watch::Receiver<Option<ExternalIdentity>>;

    /// Run the interactive sign-in flow
    async fn sign_in_popup(&self) -> Result<ExternalIdentity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Signs in as a fixed identity taken from configuration.
pub struct LocalAuthenticator {
    identity: ExternalIdentity,
    state: watch::Sender<Option<ExternalIdentity>>,
}

impl LocalAuthenticator {
    pub fn new(config: &LocalIdentityConfig) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            identity: ExternalIdentity {
                uid: config.uid.clone(),
                display_name: Some(config.name.clone()),
                email: Some(config.email.clone()),
                photo_url: config.avatar.clone(),
            },
            state,
        }
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    fn subscribe(&self) -> watch::Receiver<Option<ExternalIdentity>> {
        self.state.subscribe()
    }

    async fn sign_in_popup(&self) -> Result<ExternalIdentity, AuthError> {
        info!(uid = %crate::types::abbrev_id(&self.identity.uid), "Signed in with local identity");
        self.state.send_replace(Some(self.identity.clone()));
        Ok(self.identity.clone())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state.send_replace(None);
        Ok(())
    }
}
