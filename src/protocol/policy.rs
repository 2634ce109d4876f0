//! Per-clearance session policy.
//!
//! The policy store is an external collaborator: given an identity's
//! security-clearance tag it answers two questions: does this identity get
//! auto-logout on idle, and may it hold several concurrent sessions under one
//! name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a clearance tag entitles a session to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearancePolicy {
    /// Idle sessions under this clearance are ended by the watchdog.
    pub auto_logout: bool,
    /// Several live sessions may share one identity name.
    pub multi_login_allowed: bool,
}

impl Default for ClearancePolicy {
    fn default() -> Self {
        Self {
            auto_logout: true,
            multi_login_allowed: false,
        }
    }
}

/// Resolves a clearance tag to its policy.
pub trait PolicyStore: Send + Sync {
    fn policy_for(&self, clearance: &str) -> ClearancePolicy;
}

/// In-memory policy table with a fallback for unknown clearances.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicyStore {
    policies: HashMap<String, ClearancePolicy>,
    fallback: ClearancePolicy,
}

impl StaticPolicyStore {
    pub fn new(fallback: ClearancePolicy) -> Self {
        Self {
            policies: HashMap::new(),
            fallback,
        }
    }

    pub fn from_table(policies: HashMap<String, ClearancePolicy>) -> Self {
        Self {
            policies,
            fallback: ClearancePolicy::default(),
        }
    }

    pub fn with(mut self, clearance: impl Into<String>, policy: ClearancePolicy) -> Self {
        self.policies.insert(clearance.into(), policy);
        self
    }
}

impl PolicyStore for StaticPolicyStore {
    fn policy_for(&self, clearance: &str) -> ClearancePolicy {
        self.policies
            .get(clearance)
            .copied()
            .unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_clearance_uses_table_entry() {
        let store = StaticPolicyStore::default().with(
            "admin",
            ClearancePolicy {
                auto_logout: false,
                multi_login_allowed: true,
            },
        );

        let policy = store.policy_for("admin");
        assert!(!policy.auto_logout);
        assert!(policy.multi_login_allowed);
    }

    #[test]
    fn unknown_clearance_falls_back() {
        let store = StaticPolicyStore::default();
        let policy = store.policy_for("guest");
        assert!(policy.auto_logout);
        assert!(!policy.multi_login_allowed);
    }
}
