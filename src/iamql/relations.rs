//! Static knowledge about IAMQL entity kinds: their attributes, implicit
//! constraints and the join relations each kind declares.
use std::fmt::Display;

use strum_macros::Display as StrumDisplay;

use crate::iamql::ast::EntityKind;
use crate::iamql::plan::{Predicate, Relation, Slot};
use crate::model::MemberKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
}

const RESOURCE_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("name", AttributeType::String),
    ("type", AttributeType::String),
    ("display_name", AttributeType::String),
    ("email", AttributeType::String),
    ("path", AttributeType::String),
];
const ROLE_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("name", AttributeType::String),
    ("title", AttributeType::String),
    ("description", AttributeType::String),
];
const PERMISSION_ATTRIBUTES: &[(&str, AttributeType)] = &[("name", AttributeType::String)];
const MEMBER_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("name", AttributeType::String),
    ("type", AttributeType::String),
];
const BINDING_ATTRIBUTES: &[(&str, AttributeType)] = &[("id", AttributeType::Number)];

pub fn attributes(kind: EntityKind) -> &'static [(&'static str, AttributeType)] {
    match kind {
        EntityKind::Resource => RESOURCE_ATTRIBUTES,
        EntityKind::Role => ROLE_ATTRIBUTES,
        EntityKind::Permission => PERMISSION_ATTRIBUTES,
        EntityKind::Member | EntityKind::Group | EntityKind::User | EntityKind::ServiceAccount => {
            MEMBER_ATTRIBUTES
        }
        EntityKind::Binding => BINDING_ATTRIBUTES,
    }
}

/// Resolves `name` to the canonical attribute name and its type.
pub fn attribute(kind: EntityKind, name: &str) -> Option<(&'static str, AttributeType)> {
    attributes(kind)
        .iter()
        .find(|(attribute, _)| *attribute == name)
        .copied()
}

/// Member kinds an entity kind is restricted to, if any.
pub fn implicit_member_kinds(kind: EntityKind) -> Option<&'static [MemberKind]> {
    match kind {
        EntityKind::Member => Some(MemberKind::CORE),
        EntityKind::Group => Some(&[MemberKind::Group]),
        EntityKind::User => Some(&[MemberKind::User]),
        EntityKind::ServiceAccount => Some(&[MemberKind::ServiceAccount]),
        EntityKind::Resource | EntityKind::Role | EntityKind::Permission | EntityKind::Binding => {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindConstraint {
    Kind(EntityKind),
    AnyOf(&'static [EntityKind]),
}

impl KindConstraint {
    pub fn accepts(&self, kind: EntityKind) -> bool {
        match self {
            KindConstraint::Kind(expected) => *expected == kind,
            KindConstraint::AnyOf(expected) => expected.contains(&kind),
        }
    }
}

impl Display for KindConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KindConstraint::Kind(kind) => write!(f, "{}", kind),
            KindConstraint::AnyOf(kinds) => write!(
                f,
                "{}",
                kinds
                    .iter()
                    .map(|kind| kind.to_string())
                    .collect::<Vec<String>>()
                    .join("|")
            ),
        }
    }
}

/// A relation `var.relation(args...)`. `build` receives the slot of the
/// declaring variable followed by the argument slots.
#[derive(Clone, Copy)]
pub struct JoinRule {
    pub relation: &'static str,
    pub arg_kinds: &'static [KindConstraint],
    pub build: fn(&[Slot]) -> Predicate,
}

fn relation(relation: Relation, slots: &[Slot]) -> Predicate {
    Predicate::Relation {
        relation,
        slots: slots.to_vec(),
    }
}

fn swapped(relation: Relation, slots: &[Slot]) -> Predicate {
    Predicate::Relation {
        relation,
        slots: slots.iter().rev().copied().collect(),
    }
}

fn contains(slots: &[Slot]) -> Predicate {
    relation(Relation::Contains, slots)
}

fn transitive_contains(slots: &[Slot]) -> Predicate {
    relation(Relation::TransitiveContains, slots)
}

fn has_permission(slots: &[Slot]) -> Predicate {
    relation(Relation::HasPermission, slots)
}

fn included_in_role(slots: &[Slot]) -> Predicate {
    swapped(Relation::HasPermission, slots)
}

fn grants(slots: &[Slot]) -> Predicate {
    relation(Relation::Grants, slots)
}

fn child_of(slots: &[Slot]) -> Predicate {
    relation(Relation::ChildOf, slots)
}

fn parent_of(slots: &[Slot]) -> Predicate {
    swapped(Relation::ChildOf, slots)
}

fn ancestor_of(slots: &[Slot]) -> Predicate {
    relation(Relation::AncestorOf { include_self: false }, slots)
}

fn ancestor_with_self_of(slots: &[Slot]) -> Predicate {
    relation(Relation::AncestorOf { include_self: true }, slots)
}

fn descendant_of(slots: &[Slot]) -> Predicate {
    swapped(Relation::AncestorOf { include_self: false }, slots)
}

const MEMBER_LIKE: KindConstraint = KindConstraint::AnyOf(&[
    EntityKind::Group,
    EntityKind::Member,
    EntityKind::User,
    EntityKind::ServiceAccount,
]);

const RESOURCE: KindConstraint = KindConstraint::Kind(EntityKind::Resource);

const GROUP_JOINS: &[JoinRule] = &[
    JoinRule {
        relation: "contains",
        arg_kinds: &[MEMBER_LIKE],
        build: contains,
    },
    JoinRule {
        relation: "transitivecontains",
        arg_kinds: &[KindConstraint::AnyOf(&[
            EntityKind::Member,
            EntityKind::User,
            EntityKind::ServiceAccount,
        ])],
        build: transitive_contains,
    },
    JoinRule {
        relation: "transitivecontains",
        arg_kinds: &[KindConstraint::Kind(EntityKind::Group)],
        build: transitive_contains,
    },
];

const ROLE_JOINS: &[JoinRule] = &[JoinRule {
    relation: "has",
    arg_kinds: &[KindConstraint::Kind(EntityKind::Permission)],
    build: has_permission,
}];

const PERMISSION_JOINS: &[JoinRule] = &[JoinRule {
    relation: "included",
    arg_kinds: &[KindConstraint::Kind(EntityKind::Role)],
    build: included_in_role,
}];

const BINDING_JOINS: &[JoinRule] = &[JoinRule {
    relation: "grants",
    arg_kinds: &[
        RESOURCE,
        KindConstraint::Kind(EntityKind::Role),
        MEMBER_LIKE,
    ],
    build: grants,
}];

const RESOURCE_JOINS: &[JoinRule] = &[
    JoinRule {
        relation: "child",
        arg_kinds: &[RESOURCE],
        build: child_of,
    },
    JoinRule {
        relation: "parent",
        arg_kinds: &[RESOURCE],
        build: parent_of,
    },
    JoinRule {
        relation: "ancestor",
        arg_kinds: &[RESOURCE],
        build: ancestor_of,
    },
    JoinRule {
        relation: "ancestorWithSelf",
        arg_kinds: &[RESOURCE],
        build: ancestor_with_self_of,
    },
    JoinRule {
        relation: "descendant",
        arg_kinds: &[RESOURCE],
        build: descendant_of,
    },
];

/// Join relations declared by `kind`, in lookup order.
pub fn join_rules(kind: EntityKind) -> &'static [JoinRule] {
    match kind {
        EntityKind::Group | EntityKind::Member => GROUP_JOINS,
        EntityKind::Role => ROLE_JOINS,
        EntityKind::Permission => PERMISSION_JOINS,
        EntityKind::Binding => BINDING_JOINS,
        EntityKind::Resource => RESOURCE_JOINS,
        EntityKind::User | EntityKind::ServiceAccount => &[],
    }
}
