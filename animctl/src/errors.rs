use crate::auth::AuthError;
use crate::auth::permissions::Action;
use crate::generation::GenerationError;
use crate::models::Role;
use crate::store::StoreError;
use thiserror::Error as ThisError;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No identity is signed in
    #[error("Not authenticated")]
    Unauthenticated,

    /// The current role lacks the action required by the operation
    #[error("Role {role} may not {action}")]
    InsufficientPermissions { action: Action, role: Role },

    /// Requested entity not found in the local cache or the store
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The local update was applied but the remote write failed. The write has been queued for
    /// [`crate::session::SessionService::flush_pending_writes`].
    #[error("{entity} updated locally but the remote write failed: {source}")]
    WriteDiverged {
        entity: &'static str,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Returns a user-facing message without leaking internal details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated => "Please sign in first".to_string(),
            Error::InsufficientPermissions { action, .. } => {
                format!("You do not have permission to {}", action.as_str().replace('_', " "))
            }
            Error::NotFound { entity, id } => format!("{entity} with ID {id} not found"),
            Error::WriteDiverged { entity, .. } => {
                format!("{entity} was updated locally but could not be saved")
            }
            Error::Store(_) => "The database is currently unavailable".to_string(),
            Error::Auth(e) => e.to_string(),
            Error::Generation(e) => e.user_message(),
            Error::Other(_) => "Internal error".to_string(),
        }
    }

    pub fn is_write_diverged(&self) -> bool {
        matches!(self, Error::WriteDiverged { .. })
    }
}
