use std::collections::VecDeque;
use std::fmt::Display;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use super::{DataModel, Member, Permission, Resource, Role};
use crate::arena::ArenaIndex;
use crate::error::ModelError;

/// Members reached by a reverse expansion, with the child -> parents edges
/// that were traversed.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipGraph<'a> {
    pub members: Vec<&'a Member>,
    pub edges: IndexMap<&'a str, Vec<&'a str>>,
}

/// The access being explained: a role, or any role holding a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget<'a> {
    Role(&'a str),
    Permission(&'a str),
}

impl Display for AccessTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessTarget::Role(name) | AccessTarget::Permission(name) => write!(f, "{}", name),
        }
    }
}

/// One member of a binding: `member` holds `role` on `resource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grant<'a> {
    pub resource: &'a str,
    pub role: &'a str,
    pub member: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantExplanation<'a> {
    /// Grants on the resource path reaching the member or one of its groups,
    /// nearest resource first.
    pub grants: Vec<Grant<'a>>,
    pub member_graph: MembershipGraph<'a>,
    /// The resource followed by its ancestors.
    pub resource_path: Vec<&'a str>,
}

/// A binding that would give the member the denied access. `overgranting`
/// counts how many levels above the lowest common ancestor of the requested
/// resources the binding sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrantStrategy<'a> {
    pub overgranting: usize,
    pub role: &'a str,
    pub member: &'a str,
    pub resource: &'a str,
}

/// Members holding `role` on `resource` through bindings found by a
/// permission or role search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTuple<'a> {
    pub role: &'a str,
    pub resource: &'a str,
    pub members: Vec<&'a str>,
}

impl DataModel {
    fn member_indices(&self, names: &[&str]) -> IndexSet<ArenaIndex> {
        names
            .iter()
            .filter_map(|name| self.members.lookup(name))
            .collect()
    }

    fn resource_indices(&self, names: &[&str]) -> IndexSet<ArenaIndex> {
        names
            .iter()
            .filter_map(|name| self.resources.lookup(name))
            .collect()
    }

    fn reverse_expand(&self, names: &[&str]) -> (IndexSet<ArenaIndex>, Vec<(ArenaIndex, ArenaIndex)>) {
        let mut member_set = self.member_indices(names);
        let mut edges = vec![];
        let mut queue: VecDeque<ArenaIndex> = member_set.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            for parent in &self.members[current].parents {
                edges.push((current, *parent));
                if member_set.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        (member_set, edges)
    }

    /// The named members plus every group containing them, directly or
    /// transitively. Unknown names are ignored.
    pub fn reverse_expand_members(&self, names: &[&str]) -> Vec<&Member> {
        let (member_set, _) = self.reverse_expand(names);
        member_set.iter().map(|idx| &self.members[*idx]).collect()
    }

    pub fn reverse_expand_members_graph(&self, names: &[&str]) -> MembershipGraph<'_> {
        let (member_set, traversed) = self.reverse_expand(names);
        self.membership_graph(&member_set, traversed)
    }

    fn membership_graph(
        &self,
        member_set: &IndexSet<ArenaIndex>,
        traversed: Vec<(ArenaIndex, ArenaIndex)>,
    ) -> MembershipGraph<'_> {
        let mut edges: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for (child, parent) in traversed {
            edges
                .entry(self.members[child].name.as_str())
                .or_default()
                .push(self.members[parent].name.as_str());
        }
        MembershipGraph {
            members: member_set.iter().map(|idx| &self.members[*idx]).collect(),
            edges,
        }
    }

    /// The named members plus, for every group among them, all of its
    /// transitive members. Groups come first, followed by non-group members.
    pub fn expand_members(&self, names: &[&str]) -> Vec<&Member> {
        let mut group_set: IndexSet<ArenaIndex> = IndexSet::new();
        let mut non_group_set: IndexSet<ArenaIndex> = IndexSet::new();
        let mut queue = VecDeque::new();

        for idx in self.member_indices(names) {
            if self.members[idx].is_group() {
                if group_set.insert(idx) {
                    queue.push_back(idx);
                }
            } else {
                non_group_set.insert(idx);
            }
        }

        while let Some(group) = queue.pop_front() {
            for child in &self.members[group].children {
                if self.members[*child].is_group() {
                    if group_set.insert(*child) {
                        queue.push_back(*child);
                    }
                } else {
                    non_group_set.insert(*child);
                }
            }
        }

        group_set
            .iter()
            .chain(non_group_set.iter())
            .map(|idx| &self.members[*idx])
            .collect()
    }

    fn path_indices(&self, start: ArenaIndex) -> Vec<ArenaIndex> {
        let mut path = vec![start];
        let mut current = start;
        while let Some(parent) = self.resources[current].parent {
            // parents are always inserted before their children, so the chain ends
            path.push(parent);
            current = parent;
        }
        path
    }

    /// The resource followed by its ancestors, nearest first. Empty if the
    /// resource is unknown.
    pub fn find_resource_path(&self, name: &str) -> Vec<&Resource> {
        match self.resources.lookup(name) {
            Some(idx) => self
                .path_indices(idx)
                .into_iter()
                .map(|idx| &self.resources[idx])
                .collect(),
            None => vec![],
        }
    }

    fn roles_by_permission_indices(&self, names: &[&str]) -> IndexSet<ArenaIndex> {
        if names.is_empty() {
            return self
                .roles
                .iter()
                .filter(|(_, role)| !role.permissions.is_empty())
                .map(|(idx, _)| idx)
                .collect();
        }
        let mut wanted = IndexSet::new();
        for name in names {
            match self.permissions.lookup(name) {
                Some(idx) => {
                    wanted.insert(idx);
                }
                None => return IndexSet::new(),
            }
        }
        self.roles
            .iter()
            .filter(|(_, role)| wanted.is_subset(&role.permissions))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Roles holding all of the named permissions.
    pub fn get_roles_by_permission_names(&self, names: &[&str]) -> Vec<&Role> {
        self.roles_by_permission_indices(names)
            .iter()
            .map(|idx| &self.roles[*idx])
            .collect()
    }

    /// Members bound on the resource, or on any of its ancestors, to a role
    /// granting all of `permissions`.
    pub fn explain_has_access_to_resource(
        &self,
        resource: &str,
        permissions: &[&str],
        expand_groups: bool,
    ) -> Vec<&Member> {
        let Some(resource_idx) = self.resources.lookup(resource) else {
            return vec![];
        };
        let roles = self.roles_by_permission_indices(permissions);
        let path: IndexSet<ArenaIndex> = self.path_indices(resource_idx).into_iter().collect();

        let mut member_set: IndexSet<ArenaIndex> = IndexSet::new();
        for (_, binding) in self.bindings.iter() {
            if roles.contains(&binding.role) && path.contains(&binding.resource) {
                member_set.extend(binding.members.iter().copied());
            }
        }

        if expand_groups {
            let names: Vec<&str> = member_set
                .iter()
                .map(|idx| self.members[*idx].name.as_str())
                .collect();
            self.expand_members(&names)
        } else {
            member_set.iter().map(|idx| &self.members[*idx]).collect()
        }
    }

    /// Resources on which the members, or groups containing them, hold a binding.
    pub fn explain_member_has_access_to(
        &self,
        members: &[&str],
        expand_resources: bool,
    ) -> Result<Vec<&Resource>, ModelError> {
        if expand_resources {
            return Err(ModelError::NotSupported(
                "expanding resources when explaining member access".to_owned(),
            ));
        }
        let (member_set, _) = self.reverse_expand(members);
        let mut resource_set: IndexSet<ArenaIndex> = IndexSet::new();
        for (_, binding) in self.bindings.iter() {
            if binding.members.iter().any(|m| member_set.contains(m)) {
                resource_set.insert(binding.resource);
            }
        }
        Ok(resource_set
            .iter()
            .map(|idx| &self.resources[*idx])
            .collect())
    }

    /// The named resources plus all of their descendants.
    pub fn expand_resources(&self, names: &[&str]) -> Vec<&Resource> {
        let mut resource_set = self.resource_indices(names);
        let mut queue: VecDeque<ArenaIndex> = resource_set.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            for child in &self.resources[current].children {
                if resource_set.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        resource_set
            .iter()
            .map(|idx| &self.resources[*idx])
            .collect()
    }

    /// Parent -> children edges covering the ancestry of the named resources.
    /// Every known named resource is a key, possibly without children.
    pub fn resource_ancestors(&self, names: &[&str]) -> IndexMap<&str, Vec<&str>> {
        let mut graph: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for idx in self.resource_indices(names) {
            graph
                .entry(self.resources[idx].name.as_str())
                .or_default();
        }
        for idx in self.resource_indices(names) {
            let path = self.path_indices(idx);
            for pair in path.windows(2) {
                let child = self.resources[pair[0]].name.as_str();
                let children = graph
                    .entry(self.resources[pair[1]].name.as_str())
                    .or_default();
                if !children.contains(&child) {
                    children.push(child);
                }
            }
        }
        graph
    }

    fn roles_for_target(&self, target: AccessTarget<'_>) -> IndexSet<ArenaIndex> {
        match target {
            AccessTarget::Role(name) => self.roles.lookup(name).into_iter().collect(),
            AccessTarget::Permission(name) => self.roles_by_permission_indices(&[name]),
        }
    }

    /// Explains how `member` obtains `target` on `resource`: the grants on the
    /// resource path that reach the member, directly or through its groups.
    pub fn explain_granted(
        &self,
        member: &str,
        resource: &str,
        target: AccessTarget<'_>,
    ) -> Result<GrantExplanation<'_>, ModelError> {
        let (member_set, traversed) = self.reverse_expand(&[member]);
        let roles = self.roles_for_target(target);
        let path = match self.resources.lookup(resource) {
            Some(idx) => self.path_indices(idx),
            None => vec![],
        };

        let mut grants = vec![];
        for resource_idx in &path {
            for binding_idx in &self.resources[*resource_idx].bindings {
                let binding = &self.bindings[*binding_idx];
                if !roles.contains(&binding.role) {
                    continue;
                }
                for member_idx in binding.members.iter().filter(|m| member_set.contains(*m)) {
                    grants.push(Grant {
                        resource: &self.resources[binding.resource].name,
                        role: &self.roles[binding.role].name,
                        member: &self.members[*member_idx].name,
                    });
                }
            }
        }
        if grants.is_empty() {
            return Err(ModelError::GrantNotFound {
                member: member.to_owned(),
                resource: resource.to_owned(),
                target: target.to_string(),
            });
        }

        Ok(GrantExplanation {
            grants,
            member_graph: self.membership_graph(&member_set, traversed),
            resource_path: path
                .iter()
                .map(|idx| self.resources[*idx].name.as_str())
                .collect(),
        })
    }

    /// Ways to give `member` the denied access to all of `resources`: a new
    /// binding of each role on every resource of the chain running from the
    /// root down to the lowest common ancestor, or adding the member to a
    /// group already bound there. Without explicit `roles`, every role
    /// holding all of `permissions` is considered.
    pub fn explain_denied<'a>(
        &'a self,
        member: &'a str,
        resources: &[&str],
        permissions: &[&str],
        roles: &[&str],
    ) -> Result<Vec<GrantStrategy<'a>>, ModelError> {
        let role_set: IndexSet<ArenaIndex> = if roles.is_empty() {
            if permissions.is_empty() {
                return Err(ModelError::NoCoveringRoles);
            }
            self.roles_by_permission_indices(permissions)
        } else {
            roles
                .iter()
                .map(|role| {
                    self.roles
                        .lookup(role)
                        .ok_or_else(|| ModelError::not_found("Role", role))
                })
                .collect::<Result<_, _>>()?
        };
        if role_set.is_empty() {
            return Err(ModelError::NoCoveringRoles);
        }
        if let Some(unknown) = resources.iter().find(|r| self.resources.lookup(r).is_none()) {
            return Err(ModelError::not_found("Resource", unknown));
        }

        let chain = binding_candidates(&self.resource_ancestors(resources));
        let mut strategies = vec![];
        for (position, resource) in chain.iter().copied().enumerate() {
            let overgranting = chain.len() - position - 1;
            for role_idx in &role_set {
                strategies.push(GrantStrategy {
                    overgranting,
                    role: &self.roles[*role_idx].name,
                    member,
                    resource,
                });
            }
        }
        for (position, resource) in chain.iter().copied().enumerate() {
            let Some(resource_idx) = self.resources.lookup(resource) else {
                continue;
            };
            for binding_idx in &self.resources[resource_idx].bindings {
                let binding = &self.bindings[*binding_idx];
                if !role_set.contains(&binding.role) {
                    continue;
                }
                for member_idx in &binding.members {
                    let candidate = &self.members[*member_idx];
                    if candidate.is_group() || candidate.name == member {
                        strategies.push(GrantStrategy {
                            overgranting: chain.len() - position - 1,
                            role: &self.roles[binding.role].name,
                            member: &candidate.name,
                            resource,
                        });
                    }
                }
            }
        }
        Ok(strategies)
    }

    /// Resources on which `member`, directly or through its groups, holds a
    /// role with all of `permissions`, per binding. With `expand_resources`
    /// each binding covers its resource and all of its descendants.
    pub fn query_access_by_member(
        &self,
        member: &str,
        permissions: &[&str],
        expand_resources: bool,
    ) -> Vec<(&str, Vec<&str>)> {
        let (member_set, _) = self.reverse_expand(&[member]);
        let roles = self.roles_by_permission_indices(permissions);
        self.bindings
            .iter()
            .filter(|(_, binding)| {
                roles.contains(&binding.role)
                    && binding.members.iter().any(|m| member_set.contains(m))
            })
            .map(|(_, binding)| {
                let resource = self.resources[binding.resource].name.as_str();
                let resources = if expand_resources {
                    self.expand_resources(&[resource])
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect()
                } else {
                    vec![resource]
                };
                (self.roles[binding.role].name.as_str(), resources)
            })
            .collect()
    }

    /// Every (role, resource) pair granting `target`, with the bound members,
    /// ordered by resource name then role name. `expand_groups` adds the
    /// transitive non-group members of each bound group; `expand_resources`
    /// repeats a binding on every descendant of its resource.
    pub fn query_access_by_permission(
        &self,
        target: AccessTarget<'_>,
        expand_groups: bool,
        expand_resources: bool,
    ) -> Vec<AccessTuple<'_>> {
        let roles = self.roles_for_target(target);
        let mut access: IndexMap<(ArenaIndex, ArenaIndex), IndexSet<ArenaIndex>> =
            IndexMap::new();
        for (_, binding) in self.bindings.iter() {
            if !roles.contains(&binding.role) {
                continue;
            }
            let resources = if expand_resources {
                let name = self.resources[binding.resource].name.as_str();
                self.resource_indices(
                    &self
                        .expand_resources(&[name])
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect::<Vec<_>>(),
                )
            } else {
                IndexSet::from([binding.resource])
            };
            let mut members = IndexSet::new();
            for member_idx in &binding.members {
                members.insert(*member_idx);
                if expand_groups && self.members[*member_idx].is_group() {
                    let name = self.members[*member_idx].name.as_str();
                    members.extend(
                        self.expand_members(&[name])
                            .iter()
                            .filter(|m| !m.is_group())
                            .filter_map(|m| self.members.lookup(&m.name)),
                    );
                }
            }
            for resource_idx in resources {
                access
                    .entry((resource_idx, binding.role))
                    .or_default()
                    .extend(members.iter().copied());
            }
        }

        let mut tuples: Vec<AccessTuple<'_>> = access
            .into_iter()
            .map(|((resource_idx, role_idx), members)| AccessTuple {
                role: &self.roles[role_idx].name,
                resource: &self.resources[resource_idx].name,
                members: members
                    .iter()
                    .map(|idx| self.members[*idx].name.as_str())
                    .collect(),
            })
            .collect();
        tuples.sort_by(|a, b| (a.resource, a.role).cmp(&(b.resource, b.role)));
        tuples
    }

    /// Role -> members bound on the resource or its ancestors, for every role
    /// holding all of `permissions`. With `expand_groups` the members of each
    /// role are replaced by their group expansion.
    pub fn query_access_by_resource(
        &self,
        resource: &str,
        permissions: &[&str],
        expand_groups: bool,
    ) -> IndexMap<&str, Vec<&str>> {
        let Some(resource_idx) = self.resources.lookup(resource) else {
            return IndexMap::new();
        };
        let roles = self.roles_by_permission_indices(permissions);
        let mut access: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for idx in self.path_indices(resource_idx) {
            for binding_idx in &self.resources[idx].bindings {
                let binding = &self.bindings[*binding_idx];
                if !roles.contains(&binding.role) {
                    continue;
                }
                let members = access
                    .entry(self.roles[binding.role].name.as_str())
                    .or_default();
                for member_idx in &binding.members {
                    let name = self.members[*member_idx].name.as_str();
                    if !members.contains(&name) {
                        members.push(name);
                    }
                }
            }
        }
        if expand_groups {
            for members in access.values_mut() {
                *members = self
                    .expand_members(members)
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect();
            }
        }
        access
    }

    pub fn list_resources_by_prefix(&self, prefix: &str) -> Vec<&Resource> {
        self.resources()
            .filter(|r| r.name.starts_with(prefix))
            .collect()
    }

    pub fn list_members_by_prefix(&self, prefix: &str) -> Vec<&Member> {
        self.members()
            .filter(|m| m.name.starts_with(prefix))
            .collect()
    }

    pub fn list_roles_by_prefix(&self, prefix: &str) -> Vec<&Role> {
        self.roles().filter(|r| r.name.starts_with(prefix)).collect()
    }

    /// Union of the permissions of roles named exactly, or starting with one of
    /// `role_prefixes`.
    pub fn query_permissions_by_roles(
        &self,
        role_names: &[&str],
        role_prefixes: &[&str],
    ) -> Vec<&Permission> {
        let mut permission_set: IndexSet<ArenaIndex> = IndexSet::new();
        for (_, role) in self.roles.iter() {
            let selected = role_names.contains(&role.name.as_str())
                || role_prefixes.iter().any(|p| role.name.starts_with(p));
            if selected {
                permission_set.extend(role.permissions.iter().copied());
            }
        }
        permission_set
            .iter()
            .map(|idx| &self.permissions[*idx])
            .collect()
    }

    /// Whether `member`, directly or through a group, holds `permission` on
    /// `resource`.
    pub fn check_access(&self, member: &str, permission: &str, resource: &str) -> bool {
        let (member_set, _) = self.reverse_expand(&[member]);
        if member_set.is_empty() {
            return false;
        }
        self.explain_has_access_to_resource(resource, &[permission], false)
            .iter()
            .any(|m| {
                self.members
                    .lookup(&m.name)
                    .is_some_and(|idx| member_set.contains(&idx))
            })
    }
}

/// The chain from the root of `ancestors` down to the first node with more
/// or fewer than one child. Binding on any of them covers every resource the
/// graph was built from.
fn binding_candidates<'a>(ancestors: &IndexMap<&'a str, Vec<&'a str>>) -> Vec<&'a str> {
    let Some(root) = ancestors
        .keys()
        .find(|node| !ancestors.values().any(|children| children.contains(*node)))
    else {
        return vec![];
    };
    let mut chain = vec![*root];
    let mut current = *root;
    while let Some([only]) = ancestors.get(current).map(|children| children.as_slice()) {
        chain.push(*only);
        current = *only;
    }
    chain
}
