//! # animctl: control layer for the Veo Animator dashboard
//!
//! `animctl` holds everything behind the Veo Animator dashboard that is not presentation: who is
//! signed in and what they may do, the credit balance of each account, the application settings,
//! and the image-to-video generation workflow against the hosted Veo model.
//!
//! ## Architecture
//!
//! The crate is organised around a single context object, [`SessionService`], which caches the
//! signed-in identity, the roster of identities it may see, the application configuration and the
//! visible transactions. Two external collaborators are injected behind traits:
//!
//! - the **document store** ([`store::DocumentStore`]) holding identity documents, the singleton
//!   configuration document and the transaction ledger. [`store::FileStore`] persists everything
//!   to a local JSON file; [`store::InMemoryStore`] is used in tests.
//! - the **authenticator** ([`auth::Authenticator`]), which signs a person in and publishes
//!   auth-state changes on a watch channel.
//!
//! Role-based access control lives in [`auth::permissions`]: a fixed table mapping each [`Role`]
//! to its allowed actions, checked by every mutating session operation.
//!
//! Video generation ([`generation`]) is a bounded submit/poll/download state machine over the
//! [`generation::VideoProvider`] seam, with [`generation::VeoClient`] as the HTTP implementation.
//! The session checks the credit balance before a generation starts and deducts one credit after
//! it succeeds.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use animctl::auth::LocalAuthenticator;
//! use animctl::store::FileStore;
//! use animctl::{Config, SessionService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let store = FileStore::open(&config.store.data_dir).await?;
//!     let auth = LocalAuthenticator::new(&config.auth.local);
//!
//!     let session = SessionService::from_config(&config, Arc::new(store), Arc::new(auth), None);
//!     session.initialize().await;
//!     if let Some(identity) = session.sign_in_interactively().await? {
//!         println!("{} has {} credits", identity.name, identity.credits);
//!     }
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Testing
//!
//! Test doubles for the store, the authenticator, the video provider and the key-selection hook
//! are in `test_utils`, available to downstream crates with the `test-utils` feature.

pub mod auth;
pub mod config;
pub mod errors;
pub mod generation;
pub mod models;
pub mod session;
pub mod store;
pub mod telemetry;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use errors::{Error, Result};
pub use models::{Configuration, Identity, Plan, Role};
pub use session::SessionService;
pub use types::{IdentityId, TransactionId, VideoId, abbrev_id};
