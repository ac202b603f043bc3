//! Per-role session, MFA and rate-limit lookups

use serde::Serialize;

use crate::config::SecurityConfig;

/// Resolved policy for one role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleSessionPolicy {
    pub requires_mfa: bool,
    pub session_timeout_minutes: u32,
    pub requests_per_minute: u32,
}

/// Table of per-role security settings with priority-based fallbacks
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    config: SecurityConfig,
}

impl SecurityPolicy {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    /// Policy for a role; unset fields fall back to the defaults
    pub fn for_role(&self, role_slug: &str, priority: i32) -> RoleSessionPolicy {
        let entry = self.config.roles.get(role_slug).cloned().unwrap_or_default();

        RoleSessionPolicy {
            requires_mfa: entry
                .requires_mfa
                .unwrap_or(priority >= self.config.mfa_priority_threshold),
            session_timeout_minutes: entry
                .session_timeout_minutes
                .unwrap_or(self.config.default_session_timeout_minutes),
            requests_per_minute: entry
                .requests_per_minute
                .unwrap_or(self.config.default_requests_per_minute),
        }
    }

    pub fn requires_mfa(&self, role_slug: &str, priority: i32) -> bool {
        self.for_role(role_slug, priority).requires_mfa
    }

    pub fn session_timeout_minutes(&self, role_slug: &str, priority: i32) -> u32 {
        self.for_role(role_slug, priority).session_timeout_minutes
    }

    pub fn requests_per_minute(&self, role_slug: &str, priority: i32) -> u32 {
        self.for_role(role_slug, priority).requests_per_minute
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleSecurityConfig;

    #[test]
    fn test_configured_role_uses_its_entry() {
        let policy = SecurityPolicy::default();
        assert!(policy.requires_mfa("super-admin", 100));
        assert_eq!(policy.session_timeout_minutes("super-admin", 100), 15);
        assert!(!policy.requires_mfa("doctor", 50));
    }

    #[test]
    fn test_unknown_role_falls_back_on_priority() {
        let policy = SecurityPolicy::default();
        assert!(policy.requires_mfa("finance-director", 85));
        assert!(!policy.requires_mfa("lab-technician", 30));
        assert_eq!(policy.session_timeout_minutes("lab-technician", 30), 60);
        assert_eq!(policy.requests_per_minute("lab-technician", 30), 120);
    }

    #[test]
    fn test_partial_entry_mixes_with_defaults() {
        let mut config = SecurityConfig::default();
        config.roles.insert(
            "nurse".to_string(),
            RoleSecurityConfig {
                requires_mfa: None,
                session_timeout_minutes: Some(20),
                requests_per_minute: None,
            },
        );
        let policy = SecurityPolicy::new(config);

        assert_eq!(
            policy.for_role("nurse", 40),
            RoleSessionPolicy {
                requires_mfa: false,
                session_timeout_minutes: 20,
                requests_per_minute: 120,
            }
        );
    }
}
