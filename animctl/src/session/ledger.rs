//! Optimistic writes through the session cache.
//!
//! Every mutation is applied to the cached state first, then appended to the pending queue, and
//! the queue is drained front to back. A failed write stops the drain, stays at the head of the
//! queue and is reported as [`Error::WriteDiverged`]. Later writes queue behind it, so the store
//! always sees writes in the order they were made. Writes the store can never accept (the target
//! document does not exist) are dropped after being reported.

use std::collections::VecDeque;

use tracing::{error, info, instrument, warn};

use super::SessionService;
use crate::auth::permissions::Action;
use crate::errors::{Error, Result};
use crate::models::{Configuration, ConfigurationPatch, Identity, IdentityUpdate};
use crate::store::StoreError;
use crate::types::abbrev_id;

/// A cached mutation not yet acknowledged by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Identity { id: String, update: IdentityUpdate },
    Configuration(Configuration),
}

impl PendingWrite {
    pub fn entity(&self) -> &'static str {
        match self {
            PendingWrite::Identity { .. } => "identity",
            PendingWrite::Configuration(_) => "configuration",
        }
    }
}

impl SessionService {
    /// Apply a partial update to an identity. Requires `manage_users`.
    #[instrument(skip(self, update), fields(user_id = %abbrev_id(id)))]
    pub async fn update_identity(&self, id: &str, update: IdentityUpdate) -> Result<Identity> {
        self.require(Action::ManageUsers).await?;

        let updated = {
            let mut state = self.state.write().await;
            let updated = {
                let target = state
                    .roster
                    .iter_mut()
                    .find(|identity| identity.id == id)
                    .ok_or_else(|| Error::NotFound {
                        entity: "identity",
                        id: id.to_string(),
                    })?;
                target.apply(&update);
                target.clone()
            };
            if let Some(current) = state.current.as_mut().filter(|current| current.id == id) {
                current.apply(&update);
            }
            state.revision += 1;
            updated
        };

        self.write_through(PendingWrite::Identity {
            id: id.to_string(),
            update,
        })
        .await?;
        info!("Identity updated");
        Ok(updated)
    }

    /// Take one credit from an identity, clamping at zero, and count one generation as used.
    ///
    /// Any signed-in identity may deduct from itself. Deducting from someone else requires
    /// `manage_users`.
    #[instrument(skip(self), fields(user_id = %abbrev_id(id)))]
    pub async fn deduct_one_credit(&self, id: &str) -> Result<Identity> {
        let current = self.current_identity().await.ok_or(Error::Unauthenticated)?;
        if current.id != id {
            self.require(Action::ManageUsers).await?;
        }

        let (updated, update) = {
            let mut state = self.state.write().await;
            let mut updated = None;
            if let Some(identity) = state.roster.iter_mut().find(|identity| identity.id == id) {
                let update = identity.consume_credit();
                updated = Some((identity.clone(), update));
            }
            if let Some(identity) = state.current.as_mut().filter(|identity| identity.id == id) {
                let update = identity.consume_credit();
                updated.get_or_insert((identity.clone(), update));
            }
            let updated = updated.ok_or_else(|| Error::NotFound {
                entity: "identity",
                id: id.to_string(),
            })?;
            state.revision += 1;
            updated
        };

        self.write_through(PendingWrite::Identity {
            id: id.to_string(),
            update,
        })
        .await?;
        Ok(updated)
    }

    /// Merge a partial configuration update and persist the full result.
    ///
    /// General settings (name, branding, provider keys, switches) require `manage_admin_settings`;
    /// payment methods require `manage_admin_billing`.
    #[instrument(skip_all)]
    pub async fn update_configuration(&self, patch: ConfigurationPatch) -> Result<Configuration> {
        if patch.touches_general_settings() || patch.is_empty() {
            self.require(Action::ManageAdminSettings).await?;
        }
        if patch.touches_payment_methods() {
            self.require(Action::ManageAdminBilling).await?;
        }

        let merged = {
            let mut state = self.state.write().await;
            state.configuration = state.configuration.merged(&patch);
            state.configuration.clone()
        };

        self.write_through(PendingWrite::Configuration(merged.clone())).await?;
        info!("Configuration updated");
        Ok(merged)
    }

    /// Writes applied locally but not yet acknowledged by the store, oldest first
    pub async fn pending_writes(&self) -> Vec<PendingWrite> {
        self.pending.lock().await.iter().cloned().collect()
    }

    /// Replay queued writes in order. Returns how many were persisted.
    pub async fn flush_pending_writes(&self) -> Result<usize> {
        let mut queue = self.pending.lock().await;
        self.drain(&mut queue).await
    }

    async fn write_through(&self, write: PendingWrite) -> Result<()> {
        let mut queue = self.pending.lock().await;
        queue.push_back(write);
        self.drain(&mut queue).await.map(|_| ())
    }

    async fn drain(&self, queue: &mut VecDeque<PendingWrite>) -> Result<usize> {
        let mut flushed = 0;
        while let Some(write) = queue.front() {
            let result = match write {
                PendingWrite::Identity { id, update } => self.store.update_identity(id, update).await,
                PendingWrite::Configuration(configuration) => self.store.put_configuration(configuration).await,
            };

            if let Err(source) = result {
                let entity = write.entity();
                if matches!(source, StoreError::NotFound(_)) {
                    error!(entity, error = %source, "Store rejected write, dropping it");
                    queue.pop_front();
                } else {
                    warn!(entity, queued = queue.len(), error = %source, "Write not persisted, keeping it queued");
                }
                return Err(Error::WriteDiverged { entity, source });
            }

            queue.pop_front();
            flushed += 1;
        }
        Ok(flushed)
    }
}
