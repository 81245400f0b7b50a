use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::VecDeque;

use indexmap::IndexSet;
use serde::Serialize;

use crate::arena::ArenaIndex;
use crate::iamql::ast::{ComparisonOperator, EntityKind};
use crate::model::{DataModel, MemberKind};

/// Position of a declared variable in a result row.
pub type Slot = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Resource(ArenaIndex),
    Member(ArenaIndex),
    Role(ArenaIndex),
    Permission(ArenaIndex),
    Binding(ArenaIndex),
}

impl EntityRef {
    /// Display name of the entity: its key, or the id for bindings.
    pub fn name(&self, data: &DataModel) -> String {
        match self {
            EntityRef::Resource(idx) => data.resources[*idx].name.clone(),
            EntityRef::Member(idx) => data.members[*idx].name.clone(),
            EntityRef::Role(idx) => data.roles[*idx].name.clone(),
            EntityRef::Permission(idx) => data.permissions[*idx].name.clone(),
            EntityRef::Binding(idx) => data.bindings[*idx].id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Number(i64),
}

enum Value<'a> {
    Str(&'a str),
    Number(i64),
}

impl Value<'_> {
    fn cmp_scalar(&self, scalar: &Scalar) -> Option<Ordering> {
        match (self, scalar) {
            (Value::Str(left), Scalar::String(right)) => Some((*left).cmp(right.as_str())),
            (Value::Number(left), Scalar::Number(right)) => Some(left.cmp(right)),
            _ => None,
        }
    }

    fn matches(&self, other: &Value<'_>) -> bool {
        match (self, other) {
            (Value::Str(left), Value::Str(right)) => left == right,
            (Value::Number(left), Value::Number(right)) => left == right,
            _ => false,
        }
    }
}

fn attribute_value<'a>(data: &'a DataModel, entity: EntityRef, attribute: &str) -> Option<Value<'a>> {
    let value = match entity {
        EntityRef::Resource(idx) => {
            let resource = &data.resources[idx];
            match attribute {
                "name" => Value::Str(&resource.name),
                "type" => Value::Str(&resource.r#type),
                "display_name" => Value::Str(&resource.display_name),
                "email" => Value::Str(&resource.email),
                "path" => Value::Str(&resource.path),
                _ => return None,
            }
        }
        EntityRef::Member(idx) => {
            let member = &data.members[idx];
            match attribute {
                "name" => Value::Str(&member.name),
                "type" => Value::Str(member.kind.as_ref()),
                _ => return None,
            }
        }
        EntityRef::Role(idx) => {
            let role = &data.roles[idx];
            match attribute {
                "name" => Value::Str(&role.name),
                "title" => Value::Str(&role.title),
                "description" => Value::Str(&role.description),
                _ => return None,
            }
        }
        EntityRef::Permission(idx) => match attribute {
            "name" => Value::Str(&data.permissions[idx].name),
            _ => return None,
        },
        EntityRef::Binding(idx) => match attribute {
            "id" => Value::Number(data.bindings[idx].id as i64),
            _ => return None,
        },
    };
    Some(value)
}

/// Graph relations a join can require between bound entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `[group, member]`: direct membership.
    Contains,
    /// `[group, member]`: membership through any chain of groups.
    TransitiveContains,
    /// `[role, permission]`
    HasPermission,
    /// `[binding, resource, role, member]`
    Grants,
    /// `[child, parent]`
    ChildOf,
    /// `[ancestor, descendant]`
    AncestorOf { include_self: bool },
}

#[derive(Debug, Clone)]
pub enum Predicate {
    MemberKindIn {
        slot: Slot,
        kinds: &'static [MemberKind],
    },
    Compare {
        slot: Slot,
        attribute: &'static str,
        operator: ComparisonOperator,
        value: Scalar,
    },
    In {
        slot: Slot,
        attribute: &'static str,
        values: Vec<Scalar>,
    },
    Like {
        slot: Slot,
        attribute: &'static str,
        pattern: String,
    },
    AttributeEq {
        left: (Slot, &'static str),
        right: (Slot, &'static str),
    },
    Relation {
        relation: Relation,
        slots: Vec<Slot>,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Appends every slot the predicate reads.
    fn slots(&self, out: &mut Vec<Slot>) {
        match self {
            Predicate::MemberKindIn { slot, .. }
            | Predicate::Compare { slot, .. }
            | Predicate::In { slot, .. }
            | Predicate::Like { slot, .. } => out.push(*slot),
            Predicate::AttributeEq { left, right } => out.extend([left.0, right.0]),
            Predicate::Relation { slots, .. } => out.extend(slots),
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                left.slots(out);
                right.slots(out);
            }
            Predicate::Not(inner) => inner.slots(out),
        }
    }

    /// Reads `attribute` of the entity bound to `slot`.
    fn attribute<'a>(
        data: &'a DataModel,
        row: &[Option<EntityRef>],
        slot: Slot,
        attribute: &str,
    ) -> Option<Value<'a>> {
        row[slot].and_then(|entity| attribute_value(data, entity, attribute))
    }

    /// Attributes and relations read from an unbound slot evaluate to false.
    fn evaluate(&self, data: &DataModel, row: &[Option<EntityRef>]) -> bool {
        match self {
            Predicate::MemberKindIn { slot, kinds } => match row[*slot] {
                Some(EntityRef::Member(idx)) => kinds.contains(&data.members[idx].kind),
                _ => false,
            },
            Predicate::Compare {
                slot,
                attribute,
                operator,
                value,
            } => Self::attribute(data, row, *slot, attribute)
                .and_then(|v| v.cmp_scalar(value))
                .is_some_and(|ordering| match operator {
                    ComparisonOperator::Equal => ordering == Ordering::Equal,
                    ComparisonOperator::NotEqual => ordering != Ordering::Equal,
                    ComparisonOperator::Less => ordering == Ordering::Less,
                    ComparisonOperator::LessEqual => ordering != Ordering::Greater,
                    ComparisonOperator::Greater => ordering == Ordering::Greater,
                    ComparisonOperator::GreaterEqual => ordering != Ordering::Less,
                }),
            Predicate::In {
                slot,
                attribute,
                values,
            } => Self::attribute(data, row, *slot, attribute).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| v.cmp_scalar(candidate) == Some(Ordering::Equal))
            }),
            Predicate::Like {
                slot,
                attribute,
                pattern,
            } => match Self::attribute(data, row, *slot, attribute) {
                Some(Value::Str(value)) => like_matches(pattern, value),
                _ => false,
            },
            Predicate::AttributeEq { left, right } => {
                match (
                    Self::attribute(data, row, left.0, left.1),
                    Self::attribute(data, row, right.0, right.1),
                ) {
                    (Some(l), Some(r)) => l.matches(&r),
                    _ => false,
                }
            }
            Predicate::Relation { relation, slots } => {
                let entities: Option<Vec<EntityRef>> =
                    slots.iter().map(|slot| row[*slot]).collect();
                entities.is_some_and(|entities| evaluate_relation(data, *relation, &entities))
            }
            Predicate::And(left, right) => left.evaluate(data, row) && right.evaluate(data, row),
            Predicate::Or(left, right) => left.evaluate(data, row) || right.evaluate(data, row),
            Predicate::Not(inner) => !inner.evaluate(data, row),
        }
    }
}

/// An index of the model that lists, for one bound entity, every entity
/// standing in some relation to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    GroupChildren,
    MemberParents,
    GroupDescendants,
    MemberAncestors,
    RolePermissions,
    PermissionRoles,
    ResourceBindings,
    MemberBindings,
    BindingResource,
    BindingRole,
    BindingMembers,
    ResourceChildren,
    ResourceParent,
    /// The resource itself when `include_self`, then its ancestors.
    ResourceAncestors { include_self: bool },
    /// The resource itself when `include_self`, then its descendants.
    ResourceDescendants { include_self: bool },
}

impl Lookup {
    /// The index that yields position `to` of `relation` from the entity at
    /// position `from`, if the model keeps one.
    fn find(relation: Relation, from: usize, to: usize) -> Option<Lookup> {
        let lookup = match (relation, from, to) {
            (Relation::Contains, 0, 1) => Lookup::GroupChildren,
            (Relation::Contains, 1, 0) => Lookup::MemberParents,
            (Relation::TransitiveContains, 0, 1) => Lookup::GroupDescendants,
            (Relation::TransitiveContains, 1, 0) => Lookup::MemberAncestors,
            (Relation::HasPermission, 0, 1) => Lookup::RolePermissions,
            (Relation::HasPermission, 1, 0) => Lookup::PermissionRoles,
            (Relation::Grants, 1, 0) => Lookup::ResourceBindings,
            (Relation::Grants, 3, 0) => Lookup::MemberBindings,
            (Relation::Grants, 0, 1) => Lookup::BindingResource,
            (Relation::Grants, 0, 2) => Lookup::BindingRole,
            (Relation::Grants, 0, 3) => Lookup::BindingMembers,
            (Relation::ChildOf, 1, 0) => Lookup::ResourceChildren,
            (Relation::ChildOf, 0, 1) => Lookup::ResourceParent,
            (Relation::AncestorOf { include_self }, 1, 0) => {
                Lookup::ResourceAncestors { include_self }
            }
            (Relation::AncestorOf { include_self }, 0, 1) => {
                Lookup::ResourceDescendants { include_self }
            }
            _ => return None,
        };
        Some(lookup)
    }

    fn follow(self, data: &DataModel, from: EntityRef) -> Vec<EntityRef> {
        match (self, from) {
            (Lookup::GroupChildren, EntityRef::Member(idx)) => {
                data.members[idx].children.iter().copied().map(EntityRef::Member).collect()
            }
            (Lookup::MemberParents, EntityRef::Member(idx)) => {
                data.members[idx].parents.iter().copied().map(EntityRef::Member).collect()
            }
            (Lookup::GroupDescendants, EntityRef::Member(idx)) => {
                reachable(idx, |current| &data.members[current].children)
                    .into_iter()
                    .map(EntityRef::Member)
                    .collect()
            }
            (Lookup::MemberAncestors, EntityRef::Member(idx)) => {
                reachable(idx, |current| &data.members[current].parents)
                    .into_iter()
                    .map(EntityRef::Member)
                    .collect()
            }
            (Lookup::RolePermissions, EntityRef::Role(idx)) => data.roles[idx]
                .permissions
                .iter()
                .copied()
                .map(EntityRef::Permission)
                .collect(),
            (Lookup::PermissionRoles, EntityRef::Permission(idx)) => {
                data.permissions[idx].roles.iter().copied().map(EntityRef::Role).collect()
            }
            (Lookup::ResourceBindings, EntityRef::Resource(idx)) => {
                data.resources[idx].bindings.iter().copied().map(EntityRef::Binding).collect()
            }
            (Lookup::MemberBindings, EntityRef::Member(idx)) => {
                data.members[idx].bindings.iter().copied().map(EntityRef::Binding).collect()
            }
            (Lookup::BindingResource, EntityRef::Binding(idx)) => {
                vec![EntityRef::Resource(data.bindings[idx].resource)]
            }
            (Lookup::BindingRole, EntityRef::Binding(idx)) => {
                vec![EntityRef::Role(data.bindings[idx].role)]
            }
            (Lookup::BindingMembers, EntityRef::Binding(idx)) => {
                data.bindings[idx].members.iter().copied().map(EntityRef::Member).collect()
            }
            (Lookup::ResourceChildren, EntityRef::Resource(idx)) => {
                data.resources[idx].children.iter().copied().map(EntityRef::Resource).collect()
            }
            (Lookup::ResourceParent, EntityRef::Resource(idx)) => data.resources[idx]
                .parent
                .map(EntityRef::Resource)
                .into_iter()
                .collect(),
            (Lookup::ResourceAncestors { include_self }, EntityRef::Resource(idx)) => {
                let mut found = vec![];
                if include_self {
                    found.push(EntityRef::Resource(idx));
                }
                let mut current = data.resources[idx].parent;
                while let Some(parent) = current {
                    found.push(EntityRef::Resource(parent));
                    current = data.resources[parent].parent;
                }
                found
            }
            (Lookup::ResourceDescendants { include_self }, EntityRef::Resource(idx)) => {
                let mut found = vec![];
                if include_self {
                    found.push(EntityRef::Resource(idx));
                }
                let mut queue = VecDeque::from([idx]);
                while let Some(current) = queue.pop_front() {
                    for child in &data.resources[current].children {
                        found.push(EntityRef::Resource(*child));
                        queue.push_back(*child);
                    }
                }
                found
            }
            _ => vec![],
        }
    }
}

/// Members reachable from `start` over at least one edge.
fn reachable<'a>(
    start: ArenaIndex,
    edges: impl Fn(ArenaIndex) -> &'a IndexSet<ArenaIndex>,
) -> IndexSet<ArenaIndex> {
    let mut found = IndexSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for next in edges(current) {
            if found.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    found
}

fn evaluate_relation(data: &DataModel, relation: Relation, entities: &[EntityRef]) -> bool {
    match (relation, entities) {
        (Relation::Contains, [EntityRef::Member(group), EntityRef::Member(member)]) => {
            data.members[*group].children.contains(member)
        }
        (Relation::TransitiveContains, [EntityRef::Member(group), EntityRef::Member(member)]) => {
            transitively_contains(data, *group, *member)
        }
        (Relation::HasPermission, [EntityRef::Role(role), EntityRef::Permission(permission)]) => {
            data.roles[*role].permissions.contains(permission)
        }
        (
            Relation::Grants,
            [
                EntityRef::Binding(binding),
                EntityRef::Resource(resource),
                EntityRef::Role(role),
                EntityRef::Member(member),
            ],
        ) => {
            let binding = &data.bindings[*binding];
            binding.resource == *resource
                && binding.role == *role
                && binding.members.contains(member)
        }
        (Relation::ChildOf, [EntityRef::Resource(child), EntityRef::Resource(parent)]) => {
            data.resources[*child].parent == Some(*parent)
        }
        (
            Relation::AncestorOf { include_self },
            [EntityRef::Resource(ancestor), EntityRef::Resource(descendant)],
        ) => {
            if ancestor == descendant {
                return include_self;
            }
            let mut current = data.resources[*descendant].parent;
            while let Some(idx) = current {
                if idx == *ancestor {
                    return true;
                }
                current = data.resources[idx].parent;
            }
            false
        }
        _ => false,
    }
}

fn transitively_contains(data: &DataModel, group: ArenaIndex, member: ArenaIndex) -> bool {
    reachable(group, |current| &data.members[current].children).contains(&member)
}

/// SQL `LIKE`: `%` matches any run of characters, `_` exactly one.
pub(crate) fn like_matches(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();

    // matches[j]: pattern[..i] matches value[..j]
    let mut matches = vec![false; value.len() + 1];
    matches[0] = true;
    for p in &pattern {
        let mut next = vec![false; value.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=value.len() {
                    seen |= matches[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=value.len() {
                    next[j] = matches[j - 1];
                }
            }
            c => {
                for j in 1..=value.len() {
                    next[j] = matches[j - 1] && value[j - 1] == *c;
                }
            }
        }
        matches = next;
    }
    matches[value.len()]
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanVariable {
    pub name: String,
    pub kind: EntityKind,
}

/// A compiled query: select the projected variables from the declared
/// entities where all predicates hold, without duplicate rows.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub name: String,
    pub variables: Vec<PlanVariable>,
    pub predicates: Vec<Predicate>,
    pub projection: Vec<Slot>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<EntityRef>>,
}

impl QueryResult {
    pub fn named_rows(&self, data: &DataModel) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|entity| entity.name(data)).collect())
            .collect()
    }
}

fn domain(data: &DataModel, kind: EntityKind) -> Vec<EntityRef> {
    match kind {
        EntityKind::Resource => data.resources.indices().map(EntityRef::Resource).collect(),
        EntityKind::Role => data.roles.indices().map(EntityRef::Role).collect(),
        EntityKind::Permission => data.permissions.indices().map(EntityRef::Permission).collect(),
        EntityKind::Binding => data.bindings.indices().map(EntityRef::Binding).collect(),
        EntityKind::Member | EntityKind::Group | EntityKind::User | EntityKind::ServiceAccount => {
            data.members.indices().map(EntityRef::Member).collect()
        }
    }
}

/// One variable of the binding order, with the indexes that can produce
/// its candidates and the predicates that become checkable once it is bound.
struct Step<'a> {
    slot: Slot,
    drivers: Vec<(Slot, Lookup)>,
    checks: Vec<&'a Predicate>,
}

struct Executor<'a> {
    data: &'a DataModel,
    steps: Vec<Step<'a>>,
    domains: Vec<Vec<EntityRef>>,
}

impl Executor<'_> {
    fn candidates(&self, step: &Step<'_>, row: &[Option<EntityRef>]) -> Cow<'_, [EntityRef]> {
        step.drivers
            .iter()
            .filter_map(|(source, lookup)| row[*source].map(|from| lookup.follow(self.data, from)))
            .min_by_key(|candidates| candidates.len())
            .map_or_else(
                || Cow::Borrowed(self.domains[step.slot].as_slice()),
                Cow::Owned,
            )
    }

    fn search(
        &self,
        depth: usize,
        row: &mut [Option<EntityRef>],
        rows: &mut Vec<Vec<EntityRef>>,
    ) {
        let Some(step) = self.steps.get(depth) else {
            rows.push(row.iter().flatten().copied().collect());
            return;
        };
        for candidate in self.candidates(step, row).iter() {
            row[step.slot] = Some(*candidate);
            let accepted = step
                .checks
                .iter()
                .all(|predicate| predicate.evaluate(self.data, row));
            if accepted {
                self.search(depth + 1, row, rows);
            }
        }
        row[step.slot] = None;
    }
}

/// Relation predicates that hold for every result row.
fn conjuncts<'a>(predicate: &'a Predicate, out: &mut Vec<(Relation, &'a [Slot])>) {
    match predicate {
        Predicate::Relation { relation, slots } => out.push((*relation, slots.as_slice())),
        Predicate::And(left, right) => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        _ => {}
    }
}

impl QueryPlan {
    /// Orders the variables so that each one after the first is, where
    /// possible, produced by an index from a variable bound before it.
    fn steps(&self) -> Vec<Step<'_>> {
        let mut relations = vec![];
        for predicate in &self.predicates {
            conjuncts(predicate, &mut relations);
        }
        let drivers = |slot: Slot, bound: &[bool]| -> Vec<(Slot, Lookup)> {
            let mut drivers = vec![];
            for (relation, slots) in &relations {
                for (to, target) in slots.iter().enumerate() {
                    if *target != slot {
                        continue;
                    }
                    for (from, source) in slots.iter().enumerate() {
                        if bound[*source] && *source != slot {
                            if let Some(lookup) = Lookup::find(*relation, from, to) {
                                drivers.push((*source, lookup));
                            }
                        }
                    }
                }
            }
            drivers
        };

        let count = self.variables.len();
        let mut bound = vec![false; count];
        let mut steps: Vec<Step<'_>> = vec![];
        while steps.len() < count {
            let unbound = (0..count).filter(|slot| !bound[*slot]);
            let slot = unbound
                .clone()
                .find(|slot| !drivers(*slot, &bound).is_empty())
                .or_else(|| unbound.clone().next())
                .unwrap_or_default();
            steps.push(Step {
                slot,
                drivers: drivers(slot, &bound),
                checks: vec![],
            });
            bound[slot] = true;
        }

        let mut position = vec![0; count];
        for (depth, step) in steps.iter().enumerate() {
            position[step.slot] = depth;
        }
        for predicate in &self.predicates {
            let mut slots = vec![];
            predicate.slots(&mut slots);
            let depth = slots.iter().map(|slot| position[*slot]).max().unwrap_or_default();
            if let Some(step) = steps.get_mut(depth) {
                step.checks.push(predicate);
            }
        }
        steps
    }

    /// Runs the plan as a backtracking join. Rows come out in the order a
    /// nested loop over the declared variables would produce them.
    pub fn execute(&self, data: &DataModel) -> QueryResult {
        let steps = self.steps();
        log::debug!(
            "Query {} binds variables in order {:?}",
            self.name,
            steps.iter().map(|step| step.slot).collect::<Vec<_>>()
        );
        let executor = Executor {
            data,
            steps,
            domains: self
                .variables
                .iter()
                .map(|variable| domain(data, variable.kind))
                .collect(),
        };
        let mut rows = vec![];
        if !self.variables.is_empty() {
            executor.search(0, &mut vec![None; self.variables.len()], &mut rows);
        }
        rows.sort_unstable();
        rows.dedup();
        let results: IndexSet<Vec<EntityRef>> = rows
            .iter()
            .map(|row| self.projection.iter().map(|slot| row[*slot]).collect())
            .collect();
        log::debug!(
            "Query {} produced {} distinct rows",
            self.name,
            results.len()
        );

        QueryResult {
            name: self.name.clone(),
            columns: self
                .projection
                .iter()
                .map(|slot| self.variables[*slot].name.clone())
                .collect(),
            rows: results.into_iter().collect(),
        }
    }
}
