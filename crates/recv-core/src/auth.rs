//! Auth context and role capabilities.
//!
//! The core never validates credentials — it trusts that the transport
//! layer has already authenticated the caller and refuses any request
//! without a well-formed [`AuthContext`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role carried by an authenticated actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary crew member: can upload, verify lines, attach evidence.
    Crew,
    /// Head of department: additionally holds the commit capability and a
    /// doubled upload quota (see admission §4.2 step 6).
    Hod,
    /// Automated/service actor (e.g. a scheduled re-ingestion job).
    Service,
}

impl Role {
    /// Whether this role may commit a session (transition `verifying -> committed`).
    #[must_use]
    pub fn can_commit(self) -> bool {
        matches!(self, Role::Hod | Role::Service)
    }

    /// Multiplier applied to the per-tenant rolling upload quota for this role.
    #[must_use]
    pub fn quota_multiplier(self) -> u32 {
        match self {
            Role::Hod => 2,
            Role::Crew | Role::Service => 1,
        }
    }
}

/// Authenticated request context supplied by the (external) transport layer.
///
/// The core consumes this verbatim; it never looks up credentials itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Tenant the actor belongs to.
    pub tenant_id: Uuid,
    /// The authenticated user (or service principal).
    pub user_id: Uuid,
    /// Role determining capability.
    pub role: Role,
}

impl AuthContext {
    /// Construct a new auth context.
    #[must_use]
    pub fn new(tenant_id: Uuid, user_id: Uuid, role: Role) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_hod_and_service_can_commit() {
        assert!(!Role::Crew.can_commit());
        assert!(Role::Hod.can_commit());
        assert!(Role::Service.can_commit());
    }

    #[test]
    fn hod_doubles_quota() {
        assert_eq!(Role::Crew.quota_multiplier(), 1);
        assert_eq!(Role::Hod.quota_multiplier(), 2);
    }
}
