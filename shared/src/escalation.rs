//! Privilege escalation checks
//!
//! Pure advice for administrative mutations: the caller decides what to do
//! with the report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the acting principal is allowed to hand out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorAuthority {
    pub user_id: Uuid,
    /// `None` when the actor has no role
    pub priority: Option<i32>,
    pub is_super_admin: bool,
    pub permissions: BTreeSet<String>,
}

/// Role a mutation would hand to someone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRole {
    pub slug: String,
    pub priority: i32,
    pub is_super_admin: bool,
}

/// The change being requested
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationRequest {
    /// Current role priority of the user being modified, if any
    pub target_user_priority: Option<i32>,
    pub target_role: Option<TargetRole>,
    /// Permissions that would be granted
    pub permissions: Vec<String>,
}

/// Result of an escalation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub allowed: bool,
    pub violations: Vec<String>,
}

impl EscalationReport {
    fn from_violations(violations: Vec<String>) -> Self {
        Self {
            allowed: violations.is_empty(),
            violations,
        }
    }
}

/// Check whether `actor` may perform `request`.
///
/// Super-admins may do anything. Everyone else needs strictly higher
/// priority than both the role being handed out and the user being changed
/// (the actor included), can never hand out a super-admin role, and can only
/// grant permissions they hold themselves.
pub fn check_escalation(actor: &ActorAuthority, request: &EscalationRequest) -> EscalationReport {
    if actor.is_super_admin {
        return EscalationReport::from_violations(Vec::new());
    }

    let mut violations = Vec::new();

    let Some(actor_priority) = actor.priority else {
        violations.push("actor has no role and cannot administer access".to_string());
        return EscalationReport::from_violations(violations);
    };

    if let Some(target_priority) = request.target_user_priority {
        if actor_priority <= target_priority {
            violations.push(format!(
                "actor priority {} does not exceed target user priority {}",
                actor_priority, target_priority
            ));
        }
    }

    if let Some(role) = &request.target_role {
        if role.is_super_admin {
            violations.push(format!(
                "role '{}' is a super-admin role and can only be assigned by a super-admin",
                role.slug
            ));
        }
        if actor_priority <= role.priority {
            violations.push(format!(
                "actor priority {} does not exceed role '{}' priority {}",
                actor_priority, role.slug, role.priority
            ));
        }
    }

    for permission in &request.permissions {
        if !actor.permissions.contains(permission) {
            violations.push(format!(
                "actor cannot grant '{}' without holding it",
                permission
            ));
        }
    }

    EscalationReport::from_violations(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(priority: i32, permissions: &[&str]) -> ActorAuthority {
        ActorAuthority {
            user_id: Uuid::new_v4(),
            priority: Some(priority),
            is_super_admin: false,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn target_role(slug: &str, priority: i32, is_super_admin: bool) -> TargetRole {
        TargetRole {
            slug: slug.to_string(),
            priority,
            is_super_admin,
        }
    }

    #[test]
    fn test_hospital_admin_cannot_assign_super_admin() {
        let admin = actor(90, &[]);
        let request = EscalationRequest {
            target_user_priority: None,
            target_role: Some(target_role("super-admin", 100, true)),
            permissions: vec![],
        };

        let report = check_escalation(&admin, &request);

        assert!(!report.allowed);
        assert_eq!(report.violations.len(), 2);
    }

    #[test]
    fn test_equal_priority_is_denied() {
        let admin = actor(90, &[]);
        let request = EscalationRequest {
            target_role: Some(target_role("hospital-admin", 90, false)),
            ..Default::default()
        };

        assert!(!check_escalation(&admin, &request).allowed);
    }

    #[test]
    fn test_self_modification_is_denied() {
        let admin = actor(90, &["edit-patients"]);
        let request = EscalationRequest {
            target_user_priority: Some(90),
            permissions: vec!["edit-patients".to_string()],
            ..Default::default()
        };

        let report = check_escalation(&admin, &request);
        assert!(!report.allowed);
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn test_lower_role_assignment_allowed() {
        let admin = actor(90, &[]);
        let request = EscalationRequest {
            target_user_priority: Some(30),
            target_role: Some(target_role("doctor", 50, false)),
            permissions: vec![],
        };

        assert_eq!(
            check_escalation(&admin, &request),
            EscalationReport {
                allowed: true,
                violations: vec![]
            }
        );
    }

    #[test]
    fn test_cannot_grant_unheld_permission() {
        let admin = actor(90, &["view-patients"]);
        let request = EscalationRequest {
            target_user_priority: Some(10),
            target_role: None,
            permissions: vec!["view-patients".to_string(), "void-bills".to_string()],
        };

        let report = check_escalation(&admin, &request);
        assert!(!report.allowed);
        assert_eq!(report.violations, vec!["actor cannot grant 'void-bills' without holding it"]);
    }

    #[test]
    fn test_super_admin_bypasses_checks() {
        let mut root = actor(100, &[]);
        root.is_super_admin = true;
        let request = EscalationRequest {
            target_user_priority: Some(100),
            target_role: Some(target_role("super-admin", 100, true)),
            permissions: vec!["anything".to_string()],
        };

        assert!(check_escalation(&root, &request).allowed);
    }

    #[test]
    fn test_roleless_actor_is_denied() {
        let nobody = ActorAuthority {
            user_id: Uuid::new_v4(),
            priority: None,
            is_super_admin: false,
            permissions: BTreeSet::new(),
        };

        assert!(!check_escalation(&nobody, &EscalationRequest::default()).allowed);
    }
}
