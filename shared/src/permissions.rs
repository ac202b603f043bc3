//! Permission resolution and dependency checks
//!
//! Precedence, highest first:
//! 1. super-admin role
//! 2. explicit per-user override (allow or deny)
//! 3. role grant, normalized tables first, legacy table second
//! 4. active temporary grant
//! 5. deny

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Permission, PermissionDependency, PrincipalGrants, Role};

/// Maximum number of parent links followed when walking a role hierarchy
pub const MAX_ROLE_DEPTH: usize = 32;

/// Decide a single permission for a loaded principal
pub fn resolve_permission(grants: &PrincipalGrants, permission: &str) -> bool {
    if grants.is_super_admin {
        return true;
    }
    if let Some(&allowed) = grants.overrides.get(permission) {
        return allowed;
    }
    if grants.role_grant(permission).is_some() {
        return true;
    }
    grants.temporary_permissions.contains(permission)
}

/// Every permission the principal holds.
///
/// Super-admins hold the whole `universe`. Everyone else gets role, allowed
/// override and temporary grants, minus denied overrides.
pub fn effective_permissions<'a, I>(grants: &PrincipalGrants, universe: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if grants.is_super_admin {
        return universe.into_iter().map(str::to_string).collect();
    }

    let mut effective: BTreeSet<String> = grants
        .role_permissions
        .iter()
        .chain(grants.legacy_role_permissions.iter())
        .chain(grants.temporary_permissions.iter())
        .cloned()
        .collect();

    for (name, &allowed) in &grants.overrides {
        if allowed {
            effective.insert(name.clone());
        } else {
            effective.remove(name);
        }
    }

    effective
}

/// Instant a positive decision lapses on its own.
///
/// `Some` only when the permission rests on temporary grants alone; anything
/// else holds until the store changes.
pub fn decision_expiry(grants: &PrincipalGrants, permission: &str) -> Option<DateTime<Utc>> {
    if grants.is_super_admin
        || grants.overrides.contains_key(permission)
        || grants.role_grant(permission).is_some()
    {
        return None;
    }
    grants.temporary_expires_at.get(permission).copied()
}

/// Earliest instant the effective set shrinks because a temporary grant lapses
pub fn effective_expiry(grants: &PrincipalGrants) -> Option<DateTime<Utc>> {
    grants
        .temporary_permissions
        .iter()
        .filter_map(|name| decision_expiry(grants, name))
        .min()
}

/// Role ids from `start` up through its ancestors.
///
/// Stops at a missing parent, a repeated role or after [`MAX_ROLE_DEPTH`] links.
pub fn role_lineage(start: Uuid, roles: &HashMap<Uuid, Role>) -> Vec<Uuid> {
    let mut lineage = Vec::new();
    let mut current = Some(start);

    while let Some(id) = current {
        if lineage.contains(&id) || lineage.len() > MAX_ROLE_DEPTH {
            break;
        }
        let Some(role) = roles.get(&id) else { break };
        lineage.push(id);
        current = role.parent_role_id;
    }

    lineage
}

/// Role ids that have `root` somewhere in their lineage, `root` included
pub fn role_descendants(root: Uuid, roles: &HashMap<Uuid, Role>) -> Vec<Uuid> {
    roles
        .keys()
        .copied()
        .filter(|&id| role_lineage(id, roles).contains(&root))
        .collect()
}

// ============================================================================
// Dependencies
// ============================================================================

/// A permission present without one of its prerequisites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyError {
    pub permission_id: Uuid,
    pub permission: String,
    pub missing_id: Uuid,
    pub missing: String,
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' requires '{}'", self.permission, self.missing)
    }
}

/// Prerequisite edges between permissions
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    requires: HashMap<Uuid, Vec<Uuid>>,
    names: HashMap<Uuid, String>,
}

impl DependencyGraph {
    pub fn new(permissions: &[Permission], dependencies: &[PermissionDependency]) -> Self {
        let names = permissions
            .iter()
            .map(|p| (p.id, p.name.clone()))
            .collect();

        let mut requires: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for edge in dependencies {
            let entry = requires.entry(edge.permission_id).or_default();
            if !entry.contains(&edge.depends_on_permission_id) {
                entry.push(edge.depends_on_permission_id);
            }
        }

        Self { requires, names }
    }

    /// Direct prerequisites of a permission
    pub fn prerequisites(&self, permission_id: Uuid) -> &[Uuid] {
        self.requires
            .get(&permission_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every permission reachable through prerequisite edges, excluding the start
    pub fn transitive_prerequisites(&self, permission_id: Uuid) -> BTreeSet<Uuid> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![permission_id];

        while let Some(id) = stack.pop() {
            for &next in self.prerequisites(id) {
                if next != permission_id && seen.insert(next) {
                    stack.push(next);
                }
            }
        }

        seen
    }

    /// Check a candidate permission set on its own.
    ///
    /// One error per unsatisfied edge reachable from any candidate.
    pub fn validate(&self, candidates: &[Uuid]) -> Vec<DependencyError> {
        let present: HashSet<Uuid> = candidates.iter().copied().collect();
        self.missing_prerequisites(candidates, &present)
    }

    /// Walk prerequisites from `roots`, reporting edges whose target is not in `present`
    pub fn missing_prerequisites(
        &self,
        roots: &[Uuid],
        present: &HashSet<Uuid>,
    ) -> Vec<DependencyError> {
        let mut errors = Vec::new();
        let mut reported: HashSet<(Uuid, Uuid)> = HashSet::new();
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<Uuid> = roots.to_vec();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for &prerequisite in self.prerequisites(id) {
                if !present.contains(&prerequisite) && reported.insert((id, prerequisite)) {
                    errors.push(DependencyError {
                        permission_id: id,
                        permission: self.name_of(id),
                        missing_id: prerequisite,
                        missing: self.name_of(prerequisite),
                    });
                }
                stack.push(prerequisite);
            }
        }

        errors.sort_by(|a, b| (&a.permission, &a.missing).cmp(&(&b.permission, &b.missing)));
        errors
    }

    fn name_of(&self, id: Uuid) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataVisibilityScope, ModuleAccess};
    use chrono::Duration;
    use proptest::prelude::*;

    fn permission(name: &str) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            module: None,
            action: None,
        }
    }

    fn edge(from: &Permission, to: &Permission) -> PermissionDependency {
        PermissionDependency {
            permission_id: from.id,
            depends_on_permission_id: to.id,
        }
    }

    fn role(slug: &str, parent: Option<Uuid>) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: slug.to_string(),
            slug: slug.to_string(),
            priority: 10,
            is_super_admin: false,
            parent_role_id: parent,
            module_access: ModuleAccess::none(),
            data_visibility_scope: DataVisibilityScope::Own,
            created_at: Utc::now(),
        }
    }

    fn grants_with_role(perms: &[&str]) -> PrincipalGrants {
        let mut grants = PrincipalGrants::new(Uuid::new_v4());
        grants.role_permissions = perms.iter().map(|p| p.to_string()).collect();
        grants
    }

    #[test]
    fn test_deny_override_beats_role() {
        let mut grants = grants_with_role(&["edit-patients"]);
        grants.overrides.insert("edit-patients".to_string(), false);
        assert!(!resolve_permission(&grants, "edit-patients"));
    }

    #[test]
    fn test_allow_override_without_role() {
        let mut grants = grants_with_role(&[]);
        grants.overrides.insert("view-reports".to_string(), true);
        assert!(resolve_permission(&grants, "view-reports"));
    }

    #[test]
    fn test_legacy_fallback_and_temporary() {
        let mut grants = grants_with_role(&["view-patients"]);
        grants.legacy_role_permissions.insert("view-appointments".to_string());
        grants.temporary_permissions.insert("dispense-drugs".to_string());

        assert!(resolve_permission(&grants, "view-patients"));
        assert!(resolve_permission(&grants, "view-appointments"));
        assert!(resolve_permission(&grants, "dispense-drugs"));
        assert!(!resolve_permission(&grants, "void-bills"));
        assert_eq!(
            grants.role_grant("view-appointments"),
            Some(crate::models::RoleGrantSource::Legacy)
        );
    }

    #[test]
    fn test_deny_override_beats_temporary() {
        let mut grants = grants_with_role(&[]);
        grants.temporary_permissions.insert("dispense-drugs".to_string());
        grants.overrides.insert("dispense-drugs".to_string(), false);
        assert!(!resolve_permission(&grants, "dispense-drugs"));
    }

    #[test]
    fn test_super_admin_holds_everything() {
        let mut grants = grants_with_role(&[]);
        grants.is_super_admin = true;
        grants.overrides.insert("edit-patients".to_string(), false);

        assert!(resolve_permission(&grants, "edit-patients"));
        assert!(resolve_permission(&grants, "anything-at-all"));

        let all = effective_permissions(&grants, ["a", "b"]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_effective_permissions_union_minus_denied() {
        let mut grants = grants_with_role(&["view-patients", "edit-patients"]);
        grants.legacy_role_permissions.insert("view-bills".to_string());
        grants.temporary_permissions.insert("dispense-drugs".to_string());
        grants.overrides.insert("edit-patients".to_string(), false);
        grants.overrides.insert("void-bills".to_string(), true);

        let effective = effective_permissions(&grants, std::iter::empty());

        let expected: BTreeSet<String> = ["view-patients", "view-bills", "dispense-drugs", "void-bills"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(effective, expected);
    }

    #[test]
    fn test_role_lineage_follows_parents() {
        let root = role("staff", None);
        let mid = role("nurse", Some(root.id));
        let leaf = role("head-nurse", Some(mid.id));
        let roles: HashMap<Uuid, Role> = [root.clone(), mid.clone(), leaf.clone()]
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        assert_eq!(role_lineage(leaf.id, &roles), vec![leaf.id, mid.id, root.id]);

        let mut descendants = role_descendants(mid.id, &roles);
        descendants.sort();
        let mut expected = vec![mid.id, leaf.id];
        expected.sort();
        assert_eq!(descendants, expected);
    }

    #[test]
    fn test_role_lineage_stops_on_cycle() {
        let mut a = role("a", None);
        let b = role("b", Some(a.id));
        a.parent_role_id = Some(b.id);
        let roles: HashMap<Uuid, Role> = [a.clone(), b.clone()]
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        assert_eq!(role_lineage(a.id, &roles), vec![a.id, b.id]);
    }

    #[test]
    fn test_dependency_chain_reports_every_missing_edge() {
        let a = permission("view-patients");
        let b = permission("edit-patients");
        let c = permission("delete-patients");
        let graph = DependencyGraph::new(
            &[a.clone(), b.clone(), c.clone()],
            &[edge(&c, &b), edge(&b, &a)],
        );

        let errors = graph.validate(&[c.id]);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.permission == "delete-patients" && e.missing == "edit-patients"));
        assert!(errors.iter().any(|e| e.permission == "edit-patients" && e.missing == "view-patients"));

        assert!(graph.validate(&[a.id, b.id, c.id]).is_empty());
    }

    #[test]
    fn test_multiple_prerequisites() {
        let a = permission("view-bills");
        let b = permission("view-patients");
        let c = permission("issue-refunds");
        let graph = DependencyGraph::new(
            &[a.clone(), b.clone(), c.clone()],
            &[edge(&c, &a), edge(&c, &b)],
        );

        let errors = graph.validate(&[c.id]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "'issue-refunds' requires 'view-bills'");

        let errors = graph.validate(&[c.id, a.id]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].missing, "view-patients");
    }

    #[test]
    fn test_dependency_cycle_terminates() {
        let a = permission("a");
        let b = permission("b");
        let graph = DependencyGraph::new(&[a.clone(), b.clone()], &[edge(&a, &b), edge(&b, &a)]);

        assert_eq!(graph.validate(&[a.id]).len(), 1);
        assert!(graph.validate(&[a.id, b.id]).is_empty());
        assert_eq!(graph.transitive_prerequisites(a.id).len(), 1);
    }

    #[test]
    fn test_decision_expiry_only_for_temporary_only_grants() {
        let soon = Utc::now() + Duration::minutes(5);
        let later = Utc::now() + Duration::hours(2);
        let mut grants = grants_with_role(&["view-patients"]);
        grants.add_temporary("dispense-drugs", soon);
        grants.add_temporary("dispense-drugs", later);
        grants.add_temporary("view-patients", soon);
        grants.add_temporary("void-bills", soon);
        grants.overrides.insert("void-bills".to_string(), true);

        assert_eq!(decision_expiry(&grants, "dispense-drugs"), Some(later));
        assert_eq!(decision_expiry(&grants, "view-patients"), None);
        assert_eq!(decision_expiry(&grants, "void-bills"), None);
        assert_eq!(decision_expiry(&grants, "edit-patients"), None);
        assert_eq!(effective_expiry(&grants), Some(later));

        grants.is_super_admin = true;
        assert_eq!(effective_expiry(&grants), None);
    }

    #[test]
    fn test_effective_expiry_takes_earliest_lapse() {
        let soon = Utc::now() + Duration::minutes(5);
        let mut grants = grants_with_role(&[]);
        grants.add_temporary("dispense-drugs", soon + Duration::minutes(30));
        grants.add_temporary("view-bills", soon);

        assert_eq!(effective_expiry(&grants), Some(soon));
    }

    /// Random parent links, cycles included
    fn role_forest() -> impl Strategy<Value = Vec<Option<usize>>> {
        (1usize..48).prop_flat_map(|len| {
            proptest::collection::vec(proptest::option::of(0..len), len)
        })
    }

    proptest! {
        #[test]
        fn prop_role_lineage_is_bounded_and_acyclic(parents in role_forest()) {
            let mut roles: Vec<Role> = (0..parents.len())
                .map(|i| role(&format!("role-{}", i), None))
                .collect();
            let ids: Vec<Uuid> = roles.iter().map(|r| r.id).collect();
            for (role, parent) in roles.iter_mut().zip(&parents) {
                role.parent_role_id = parent.map(|p| ids[p]);
            }
            let roles: HashMap<Uuid, Role> = roles.into_iter().map(|r| (r.id, r)).collect();

            for &id in &ids {
                let lineage = role_lineage(id, &roles);
                let distinct: HashSet<Uuid> = lineage.iter().copied().collect();

                prop_assert_eq!(lineage.first(), Some(&id));
                prop_assert_eq!(distinct.len(), lineage.len());
                prop_assert!(lineage.len() <= MAX_ROLE_DEPTH + 1);
                for ancestor in &lineage {
                    prop_assert!(role_descendants(*ancestor, &roles).contains(&id));
                }
            }
        }
    }
}
