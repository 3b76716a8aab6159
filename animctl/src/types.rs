//! Common type definitions shared across the crate.
//!
//! # ID Types
//!
//! Identities are keyed by the authenticator's opaque user id (a string, not a UUID), so the
//! aliases here are plain strings wrapped in a type alias for readability:
//!
//! - [`IdentityId`]: account identifier, also the document key in the identity store
//! - [`TransactionId`]: ledger transaction identifier
//!
//! Generated videos are local artifacts and get a UUID ([`VideoId`]).
//!
//! # Utility Functions
//!
//! - [`abbrev_id`]: Abbreviate ids to their first 8 chars for logging

use uuid::Uuid;

pub type IdentityId = String;
pub type TransactionId = String;
pub type VideoId = Uuid;

/// Abbreviate an id to its first 8 characters for more readable logs and traces
/// Example: "x9FqM2cTQkVb7s1pLw0eRr" -> "x9FqM2cT"
pub fn abbrev_id(id: &str) -> String {
    id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_id() {
        assert_eq!(abbrev_id("x9FqM2cTQkVb7s1pLw0eRr"), "x9FqM2cT");
        assert_eq!(abbrev_id("42"), "42");
    }
}
