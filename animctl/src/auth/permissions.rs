//! Role-based permission table.
//!
//! Every role lists its allowed actions in full. There is no inheritance between roles: the admin
//! set happens to contain the editor set, but both are declared independently so that changing
//! one never silently changes the other.
//!
//! All permission decisions in the crate go through [`check`] (or [`check_tags`] for untyped
//! input), and every "is this a staff account" decision goes through [`Role::is_elevated`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::identity::Role;

/// Actions that can be gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewAdminDashboard,
    ViewUserDashboard,
    ViewUsers,
    ManageUsers,
    ViewAdminBilling,
    ManageAdminBilling,
    ViewAdminSettings,
    ManageAdminSettings,
    GenerateVideos,
    ViewOwnBilling,
    ViewOwnSettings,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::ViewAdminDashboard,
        Action::ViewUserDashboard,
        Action::ViewUsers,
        Action::ManageUsers,
        Action::ViewAdminBilling,
        Action::ManageAdminBilling,
        Action::ViewAdminSettings,
        Action::ManageAdminSettings,
        Action::GenerateVideos,
        Action::ViewOwnBilling,
        Action::ViewOwnSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewAdminDashboard => "view_admin_dashboard",
            Action::ViewUserDashboard => "view_user_dashboard",
            Action::ViewUsers => "view_users",
            Action::ManageUsers => "manage_users",
            Action::ViewAdminBilling => "view_admin_billing",
            Action::ManageAdminBilling => "manage_admin_billing",
            Action::ViewAdminSettings => "view_admin_settings",
            Action::ManageAdminSettings => "manage_admin_settings",
            Action::GenerateVideos => "generate_videos",
            Action::ViewOwnBilling => "view_own_billing",
            Action::ViewOwnSettings => "view_own_settings",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

const ADMIN_ACTIONS: &[Action] = &[
    Action::ViewAdminDashboard,
    Action::ViewUsers,
    Action::ManageUsers,
    Action::ViewAdminBilling,
    Action::ManageAdminBilling,
    Action::ViewAdminSettings,
    Action::ManageAdminSettings,
    Action::GenerateVideos,
];

const EDITOR_ACTIONS: &[Action] = &[
    Action::ViewAdminDashboard,
    Action::ViewUsers,
    Action::ManageUsers,
    Action::GenerateVideos,
];

const VIEWER_ACTIONS: &[Action] = &[Action::ViewAdminDashboard, Action::ViewUsers];

const USER_ACTIONS: &[Action] = &[
    Action::ViewUserDashboard,
    Action::GenerateVideos,
    Action::ViewOwnBilling,
    Action::ViewOwnSettings,
];

/// The declared action set for a role.
pub fn allowed_actions(role: Role) -> &'static [Action] {
    match role {
        Role::Admin => ADMIN_ACTIONS,
        Role::Editor => EDITOR_ACTIONS,
        Role::Viewer => VIEWER_ACTIONS,
        Role::User => USER_ACTIONS,
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Check whether `role` may perform `action`.
pub fn check(role: Role, action: Action) -> Decision {
    if allowed_actions(role).contains(&action) {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Check untyped role and action tags. Unknown tags are denied rather than treated as errors.
pub fn check_tags(role: &str, action: &str) -> Decision {
    match (role.parse::<Role>(), action.parse::<Action>()) {
        (Ok(role), Ok(action)) => check(role, action),
        _ => Decision::Deny,
    }
}

/// Dashboard views a signed-in identity can navigate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Dashboard,
    Generator,
    Users,
    Billing,
    Settings,
}

/// A navigable view with the label it is shown under for a given role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationItem {
    pub view: View,
    pub label: &'static str,
    pub required: Action,
}

/// Derive the navigation menu for a role.
///
/// Staff accounts get the administrative variant of the dashboard, billing and settings views,
/// base accounts get their own-account variant. Items the role is not allowed to see are dropped.
pub fn navigation(role: Role) -> Vec<NavigationItem> {
    let staff = role.is_elevated();

    let candidates = [
        NavigationItem {
            view: View::Dashboard,
            label: if staff { "Admin Dashboard" } else { "My Dashboard" },
            required: if staff {
                Action::ViewAdminDashboard
            } else {
                Action::ViewUserDashboard
            },
        },
        NavigationItem {
            view: View::Generator,
            label: "Veo Studio",
            required: Action::GenerateVideos,
        },
        NavigationItem {
            view: View::Users,
            label: "User Management",
            required: Action::ViewUsers,
        },
        NavigationItem {
            view: View::Billing,
            label: if staff { "Billing & Plans" } else { "My Plan" },
            required: if staff { Action::ViewAdminBilling } else { Action::ViewOwnBilling },
        },
        NavigationItem {
            view: View::Settings,
            label: if staff { "App Settings" } else { "Settings" },
            required: if staff {
                Action::ViewAdminSettings
            } else {
                Action::ViewOwnSettings
            },
        },
    ];

    candidates
        .into_iter()
        .filter(|item| check(role, item.required).is_allowed())
        .collect()
}
