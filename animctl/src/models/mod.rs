//! Document models held by the identity store and the session cache.

pub mod identity;
pub mod settings;
pub mod transactions;

pub use identity::{AccountStatus, Identity, IdentityUpdate, Plan, Role};
pub use settings::{Configuration, ConfigurationPatch};
pub use transactions::{Transaction, TransactionStatus};
