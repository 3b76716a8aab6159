//! Identity (account) documents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::IdentityId;

/// Permission level of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
    User,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Editor, Role::Viewer, Role::User];

    /// Staff roles see the full roster and the administrative variant of every view.
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Admin | Role::Editor | Role::Viewer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

/// Published terms of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanOffer {
    pub plan: Plan,
    pub name: &'static str,
    /// Monthly price in whole dollars
    pub monthly_price: u32,
    /// Monthly credit allowance, `None` for unlimited
    pub monthly_credits: Option<u32>,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Pro, Plan::Enterprise];

    pub fn offer(self) -> PlanOffer {
        match self {
            Plan::Free => PlanOffer {
                plan: self,
                name: "Free",
                monthly_price: 0,
                monthly_credits: Some(10),
            },
            Plan::Pro => PlanOffer {
                plan: self,
                name: "Pro",
                monthly_price: 29,
                monthly_credits: Some(500),
            },
            Plan::Enterprise => PlanOffer {
                plan: self,
                name: "Enterprise",
                monthly_price: 99,
                monthly_credits: None,
            },
        }
    }

    pub fn catalog() -> Vec<PlanOffer> {
        Plan::ALL.into_iter().map(Plan::offer).collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
}

/// A registered account, stored as one document per identity keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub plan: Plan,
    /// Remaining generations
    pub credits: u32,
    pub used_credits: u32,
    pub status: AccountStatus,
    pub avatar: String,
}

impl Identity {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Apply a partial update, replacing only the fields present in `update`.
    pub fn apply(&mut self, update: &IdentityUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(plan) = update.plan {
            self.plan = plan;
        }
        if let Some(credits) = update.credits {
            self.credits = credits;
        }
        if let Some(used_credits) = update.used_credits {
            self.used_credits = used_credits;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(avatar) = &update.avatar {
            self.avatar = avatar.clone();
        }
    }

    /// Take one credit, clamping at zero, and count one generation as used.
    ///
    /// Returns the partial update that brings a remote copy in line with this one.
    pub fn consume_credit(&mut self) -> IdentityUpdate {
        self.credits = self.credits.saturating_sub(1);
        self.used_credits = self.used_credits.saturating_add(1);
        IdentityUpdate {
            credits: Some(self.credits),
            used_credits: Some(self.used_credits),
            ..Default::default()
        }
    }
}

/// Partial identity fields for administrative updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_credits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl IdentityUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::identity_fixture;

    #[test]
    fn test_consume_credit_clamps_at_zero() {
        let mut identity = identity_fixture("u1", Role::User, 0);
        identity.used_credits = 4;

        let update = identity.consume_credit();

        assert_eq!(identity.credits, 0);
        assert_eq!(identity.used_credits, 5);
        assert_eq!(update.credits, Some(0));
        assert_eq!(update.used_credits, Some(5));
        assert_eq!(update.role, None);
    }

    #[test]
    fn test_consume_credit_decrements() {
        let mut identity = identity_fixture("u1", Role::User, 3);
        identity.consume_credit();
        assert_eq!(identity.credits, 2);
        assert_eq!(identity.used_credits, 1);
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut identity = identity_fixture("u1", Role::User, 3);
        let before = identity.clone();

        identity.apply(&IdentityUpdate {
            status: Some(AccountStatus::Suspended),
            ..Default::default()
        });

        assert_eq!(identity.status, AccountStatus::Suspended);
        assert_eq!(identity.credits, before.credits);
        assert_eq!(identity.name, before.name);
        assert_eq!(identity.role, before.role);
    }

    #[test]
    fn test_identity_document_uses_camel_case() {
        let identity = identity_fixture("u1", Role::Editor, 7);
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["usedCredits"], 0);
        assert_eq!(json["role"], "editor");
        assert_eq!(json["status"], "active");

        let update: IdentityUpdate = serde_json::from_str(r#"{"credits": 12}"#).unwrap();
        assert_eq!(update.credits, Some(12));
        assert!(update.used_credits.is_none());
    }

    #[test]
    fn test_plan_catalog() {
        let catalog = Plan::catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[1].monthly_price, 29);
        assert_eq!(catalog[2].monthly_credits, None);
    }

    #[test]
    fn test_elevated_roles() {
        assert!(Role::Admin.is_elevated());
        assert!(Role::Editor.is_elevated());
        assert!(Role::Viewer.is_elevated());
        assert!(!Role::User.is_elevated());
    }
}
