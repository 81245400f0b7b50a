//! The relational model: resources, members, roles, permissions and the
//! bindings tying them together, plus the model lifecycle and registry.
pub mod entities;
pub mod explain;
pub mod manager;

use indexmap::IndexMap;

use crate::arena::{Arena, ArenaIndex, KeyedArena};
use crate::error::ModelError;

pub use entities::{Binding, Member, MemberKind, Permission, Resource, Role};
pub use explain::{
    AccessTarget, AccessTuple, Grant, GrantExplanation, GrantStrategy, MembershipGraph,
};
pub use manager::{Model, ModelManager, ModelState, ModelSummary};

/// Entity tables of one model.
///
/// Every cross reference is an `ArenaIndex` into one of the tables, while the
/// keyed arenas resolve unique names to indices.
#[derive(Debug, Clone, Default)]
pub struct DataModel {
    pub(crate) resources: KeyedArena<Resource>,
    pub(crate) members: KeyedArena<Member>,
    pub(crate) roles: KeyedArena<Role>,
    pub(crate) permissions: KeyedArena<Permission>,
    pub(crate) bindings: Arena<Binding>,
    binding_keys: IndexMap<(ArenaIndex, ArenaIndex), ArenaIndex>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.by_key(name)
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.by_key(name)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.by_key(name)
    }

    pub fn permission(&self, name: &str) -> Option<&Permission> {
        self.permissions.by_key(name)
    }

    pub fn binding(&self, resource: &str, role: &str) -> Option<&Binding> {
        let key = (self.resources.lookup(resource)?, self.roles.lookup(role)?);
        self.binding_keys.get(&key).map(|idx| &self.bindings[*idx])
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().map(|(_, r)| r)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().map(|(_, m)| m)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter().map(|(_, r)| r)
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter().map(|(_, p)| p)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        (&self.bindings).into_iter()
    }

    pub fn role_permissions<'a>(&'a self, role: &'a Role) -> impl Iterator<Item = &'a Permission> {
        role.permissions.iter().map(|idx| &self.permissions[*idx])
    }

    pub fn binding_members<'a>(
        &'a self,
        binding: &'a Binding,
    ) -> impl Iterator<Item = &'a Member> {
        binding.members.iter().map(|idx| &self.members[*idx])
    }

    pub fn binding_resource(&self, binding: &Binding) -> &Resource {
        &self.resources[binding.resource]
    }

    pub fn binding_role(&self, binding: &Binding) -> &Role {
        &self.roles[binding.role]
    }

    pub fn parent_of(&self, resource: &Resource) -> Option<&Resource> {
        resource.parent.map(|idx| &self.resources[idx])
    }

    /// Adds a resource below `parent`, which must already exist.
    pub fn add_resource(
        &mut self,
        name: &str,
        r#type: &str,
        parent: Option<&str>,
    ) -> Result<ArenaIndex, ModelError> {
        let parent_idx = match parent {
            Some(parent) => Some(
                self.resources
                    .lookup(parent)
                    .ok_or_else(|| ModelError::not_found("Parent resource", parent))?,
            ),
            None => None,
        };
        let path = match parent_idx {
            Some(idx) => format!("{}/{}", self.resources[idx].path, name),
            None => name.to_owned(),
        };
        let idx = self
            .resources
            .insert(
                name,
                Resource {
                    name: name.to_owned(),
                    r#type: r#type.to_owned(),
                    display_name: String::new(),
                    email: String::new(),
                    path,
                    parent: parent_idx,
                    children: vec![],
                    bindings: vec![],
                },
            )
            .ok_or_else(|| ModelError::Duplicate {
                kind: "Resource",
                name: name.to_owned(),
            })?;
        if let Some(parent_idx) = parent_idx {
            self.resources[parent_idx].children.push(idx);
        }
        Ok(idx)
    }

    pub fn set_display_name(&mut self, resource: &str, display_name: &str) -> Result<(), ModelError> {
        let idx = self
            .resources
            .lookup(resource)
            .ok_or_else(|| ModelError::not_found("Resource", resource))?;
        self.resources[idx].display_name = display_name.to_owned();
        Ok(())
    }

    pub fn set_email(&mut self, resource: &str, email: &str) -> Result<(), ModelError> {
        let idx = self
            .resources
            .lookup(resource)
            .ok_or_else(|| ModelError::not_found("Resource", resource))?;
        self.resources[idx].email = email.to_owned();
        Ok(())
    }

    /// Returns the existing permission when `name` is already known.
    pub fn add_permission(&mut self, name: &str) -> ArenaIndex {
        self.permissions.get_or_insert_with(name, || Permission {
            name: name.to_owned(),
            roles: Default::default(),
        })
    }

    /// Adds a role, creating any of its permissions not seen before.
    pub fn add_role(&mut self, name: &str, permissions: &[&str]) -> Result<ArenaIndex, ModelError> {
        let role_idx = self
            .roles
            .insert(
                name,
                Role {
                    name: name.to_owned(),
                    title: String::new(),
                    description: String::new(),
                    permissions: Default::default(),
                },
            )
            .ok_or_else(|| ModelError::Duplicate {
                kind: "Role",
                name: name.to_owned(),
            })?;
        for permission in permissions {
            let permission_idx = self.add_permission(permission);
            self.roles[role_idx].permissions.insert(permission_idx);
            self.permissions[permission_idx].roles.insert(role_idx);
        }
        Ok(role_idx)
    }

    pub fn set_role_details(
        &mut self,
        role: &str,
        title: &str,
        description: &str,
    ) -> Result<(), ModelError> {
        let idx = self
            .roles
            .lookup(role)
            .ok_or_else(|| ModelError::not_found("Role", role))?;
        self.roles[idx].title = title.to_owned();
        self.roles[idx].description = description.to_owned();
        Ok(())
    }

    /// Adds a member contained in each of `parents`, which must already exist.
    pub fn add_member(
        &mut self,
        name: &str,
        kind: MemberKind,
        parents: &[&str],
    ) -> Result<ArenaIndex, ModelError> {
        let parent_indices = parents
            .iter()
            .map(|parent| self.group_index(parent))
            .collect::<Result<Vec<_>, _>>()?;
        if self.members.contains_key(name) {
            return Err(ModelError::Duplicate {
                kind: "Member",
                name: name.to_owned(),
            });
        }
        let idx = self.ensure_member(name, kind);
        for parent_idx in parent_indices {
            self.link_members(parent_idx, idx);
        }
        Ok(idx)
    }

    /// Returns the member called `name`, adding it with `kind` if missing.
    pub fn ensure_member(&mut self, name: &str, kind: MemberKind) -> ArenaIndex {
        self.members.get_or_insert_with(name, || Member {
            name: name.to_owned(),
            kind,
            parents: Default::default(),
            children: Default::default(),
            bindings: vec![],
        })
    }

    pub fn add_group_member(&mut self, parent: &str, child: &str) -> Result<(), ModelError> {
        let parent_idx = self.group_index(parent)?;
        let child_idx = self
            .members
            .lookup(child)
            .ok_or_else(|| ModelError::not_found("Member", child))?;
        self.link_members(parent_idx, child_idx);
        Ok(())
    }

    fn group_index(&self, name: &str) -> Result<ArenaIndex, ModelError> {
        let idx = self
            .members
            .lookup(name)
            .ok_or_else(|| ModelError::not_found("Group", name))?;
        if !self.members[idx].is_group() {
            return Err(ModelError::NotAGroup(name.to_owned()));
        }
        Ok(idx)
    }

    fn link_members(&mut self, parent: ArenaIndex, child: ArenaIndex) {
        self.members[parent].children.insert(child);
        self.members[child].parents.insert(parent);
    }

    /// Binds `members` to `role` on `resource`. There is at most one binding
    /// per (resource, role); binding again merges the member sets.
    pub fn add_binding(
        &mut self,
        resource: &str,
        role: &str,
        members: &[&str],
    ) -> Result<ArenaIndex, ModelError> {
        let resource_idx = self
            .resources
            .lookup(resource)
            .ok_or_else(|| ModelError::not_found("Resource", resource))?;
        let role_idx = self
            .roles
            .lookup(role)
            .ok_or_else(|| ModelError::not_found("Role", role))?;
        let member_indices = members
            .iter()
            .map(|member| {
                self.members
                    .lookup(member)
                    .ok_or_else(|| ModelError::not_found("Member", member))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let binding_idx = match self.binding_keys.get(&(resource_idx, role_idx)) {
            Some(idx) => *idx,
            None => {
                let idx = self.bindings.allocate(Binding {
                    id: self.bindings.len() as u64 + 1,
                    resource: resource_idx,
                    role: role_idx,
                    members: Default::default(),
                });
                self.binding_keys.insert((resource_idx, role_idx), idx);
                self.resources[resource_idx].bindings.push(idx);
                idx
            }
        };
        for member_idx in member_indices {
            if self.bindings[binding_idx].members.insert(member_idx) {
                self.members[member_idx].bindings.push(binding_idx);
            }
        }
        Ok(binding_idx)
    }
}
