use crate::error::ActionError;
use crate::types::{Cluster, Instance, InstanceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The resolved target of one action invocation: which roles and which
/// instances it applies to. Computed fresh per call, since cluster membership
/// may change between actions; a scope is never cached across invocations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionScope {
    pub roles: BTreeSet<String>,
    pub instance_ids: BTreeSet<InstanceId>,
}

impl ActionScope {
    pub fn contains_instance(&self, instance_id: &str) -> bool {
        self.instance_ids.contains(instance_id)
    }

    pub fn instance_count(&self) -> usize {
        self.instance_ids.len()
    }
}

/// Compute the effective scope for an action invocation.
///
/// Empty filter sets mean "unrestricted". Resolution rules:
/// - both filters empty: the entire cluster, role set = every role carried
///   by an instance;
/// - role filter only: instances carrying at least one listed role, role set
///   = exactly the listed roles;
/// - instance filter only: exactly those instances ([`ActionError::UnknownInstance`]
///   if an id is not in the cluster), role set = union of their roles;
/// - both: the intersection.
///
/// A resolved scope with no instances is an [`ActionError::EmptyScope`].
/// Pure and deterministic: repeated calls with the same cluster state and
/// filters yield identical scope, which is what makes re-runs safe.
pub fn resolve(
    cluster: &Cluster,
    role_filter: &BTreeSet<String>,
    instance_filter: &BTreeSet<InstanceId>,
) -> Result<ActionScope, ActionError> {
    for id in instance_filter {
        if !cluster.contains(id) {
            return Err(ActionError::UnknownInstance(id.clone()));
        }
    }

    let selected: Vec<&Instance> = cluster
        .instances()
        .iter()
        .filter(|i| role_filter.is_empty() || i.has_any_role(role_filter))
        .filter(|i| instance_filter.is_empty() || instance_filter.contains(&i.instance_id))
        .collect();

    if selected.is_empty() {
        return Err(ActionError::EmptyScope);
    }

    let roles: BTreeSet<String> = if role_filter.is_empty() {
        selected.iter().flat_map(|i| i.roles.iter().cloned()).collect()
    } else {
        role_filter.clone()
    };

    let instance_ids = selected.iter().map(|i| i.instance_id.clone()).collect();

    Ok(ActionScope { roles, instance_ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleSpec;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fixture() -> Cluster {
        Cluster::new(
            "hadoop",
            vec![
                Instance::new("i1", ["namenode", "jobtracker"], "10.0.0.1"),
                Instance::new("i2", ["datanode"], "10.0.0.2"),
                Instance::new("i3", ["datanode"], "10.0.0.3"),
            ],
            vec![
                RoleSpec::new("namenode", 1),
                RoleSpec::new("jobtracker", 1),
                RoleSpec::new("datanode", 2),
            ],
        )
    }

    #[test]
    fn empty_filters_scope_whole_cluster() {
        let scope = resolve(&fixture(), &BTreeSet::new(), &BTreeSet::new()).unwrap();
        assert_eq!(scope.instance_ids, set(&["i1", "i2", "i3"]));
        assert_eq!(scope.roles, set(&["namenode", "jobtracker", "datanode"]));
    }

    #[test]
    fn role_filter_selects_matching_instances_only() {
        let scope = resolve(&fixture(), &set(&["datanode"]), &BTreeSet::new()).unwrap();
        assert_eq!(scope.instance_ids, set(&["i2", "i3"]));
        assert_eq!(scope.roles, set(&["datanode"]));
    }

    #[test]
    fn instance_filter_unions_roles() {
        let scope = resolve(&fixture(), &BTreeSet::new(), &set(&["i1", "i2"])).unwrap();
        assert_eq!(scope.instance_ids, set(&["i1", "i2"]));
        assert_eq!(scope.roles, set(&["namenode", "jobtracker", "datanode"]));
    }

    #[test]
    fn unknown_instance_id_is_an_error() {
        let err = resolve(&fixture(), &BTreeSet::new(), &set(&["i9"])).unwrap_err();
        assert!(matches!(err, ActionError::UnknownInstance(id) if id == "i9"));
    }

    #[test]
    fn disjoint_filters_are_an_empty_scope_error() {
        // i1 carries no datanode role, so the intersection is empty.
        let err = resolve(&fixture(), &set(&["datanode"]), &set(&["i1"])).unwrap_err();
        assert!(matches!(err, ActionError::EmptyScope));
    }

    #[test]
    fn role_filter_matching_nothing_is_empty_scope() {
        let err = resolve(&fixture(), &set(&["tasktracker"]), &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, ActionError::EmptyScope));
    }

    #[test]
    fn resolution_is_deterministic() {
        let cluster = fixture();
        let a = resolve(&cluster, &set(&["datanode"]), &set(&["i2", "i3"])).unwrap();
        let b = resolve(&cluster, &set(&["datanode"]), &set(&["i2", "i3"])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn both_filters_intersect() {
        let scope = resolve(&fixture(), &set(&["datanode"]), &set(&["i3"])).unwrap();
        assert_eq!(scope.instance_ids, set(&["i3"]));
        assert_eq!(scope.roles, set(&["datanode"]));
    }
}
