//! Dashboard aggregates over the cached roster and transactions.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::SessionService;
use crate::models::{Identity, Plan, Role, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: usize,
    pub active_users: usize,
    /// Sum of completed transactions
    #[serde(with = "rust_decimal::serde::float")]
    pub total_revenue: Decimal,
    /// Generations ever consumed across the roster
    pub total_generations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    /// Generations consumed per plan. Every plan is present.
    pub generations_by_plan: BTreeMap<Plan, u64>,
    /// Completed revenue per payment method
    pub revenue_by_method: BTreeMap<String, Decimal>,
    /// Roster size per role. Every role is present.
    pub identities_by_role: BTreeMap<Role, usize>,
}

pub fn dashboard_stats(roster: &[Identity], transactions: &[Transaction]) -> DashboardStats {
    DashboardStats {
        total_users: roster.len(),
        active_users: roster.iter().filter(|identity| identity.is_active()).count(),
        total_revenue: transactions.iter().filter(|t| t.is_completed()).map(|t| t.amount).sum(),
        total_generations: roster.iter().map(|identity| u64::from(identity.used_credits)).sum(),
    }
}

pub fn analytics(roster: &[Identity], transactions: &[Transaction]) -> Analytics {
    let mut generations_by_plan: BTreeMap<Plan, u64> = Plan::ALL.into_iter().map(|plan| (plan, 0)).collect();
    let mut identities_by_role: BTreeMap<Role, usize> = Role::ALL.into_iter().map(|role| (role, 0)).collect();
    for identity in roster {
        *generations_by_plan.entry(identity.plan).or_default() += u64::from(identity.used_credits);
        *identities_by_role.entry(identity.role).or_default() += 1;
    }

    let mut revenue_by_method = BTreeMap::new();
    for transaction in transactions.iter().filter(|t| t.is_completed()) {
        *revenue_by_method
            .entry(transaction.method.clone())
            .or_insert(Decimal::ZERO) += transaction.amount;
    }

    Analytics {
        generations_by_plan,
        revenue_by_method,
        identities_by_role,
    }
}

impl SessionService {
    /// Aggregates over what the current identity can see
    pub async fn stats(&self) -> DashboardStats {
        let state = self.state.read().await;
        dashboard_stats(&state.roster, &state.transactions)
    }

    pub async fn analytics(&self) -> Analytics {
        let state = self.state.read().await;
        analytics(&state.roster, &state.transactions)
    }
}
