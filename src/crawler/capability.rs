use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PolicyKind {
    Iam,
    Gcs,
    Dataset,
    Cloudsql,
}

/// What the crawler fetches for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(default)]
    pub policies: Vec<PolicyKind>,
    #[serde(default)]
    pub children: Vec<String>,
}

impl Capability {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Resource type -> capability. Types missing from the table are leaves with
/// no policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTable {
    table: IndexMap<String, Capability>,
}

static LEAF: Capability = Capability {
    policies: vec![],
    children: vec![],
};

fn capability(policies: &[PolicyKind], children: &[&str]) -> Capability {
    Capability {
        policies: policies.to_vec(),
        children: children.iter().map(|c| (*c).to_owned()).collect(),
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        use PolicyKind::*;

        let mut table = IndexMap::new();
        table.insert(
            "organization".to_owned(),
            capability(
                &[Iam],
                &["gsuite_group", "gsuite_user", "folder", "role", "project"],
            ),
        );
        table.insert(
            "folder".to_owned(),
            capability(&[Iam], &["folder", "project"]),
        );
        table.insert(
            "project".to_owned(),
            capability(
                &[Iam],
                &[
                    "bucket",
                    "dataset",
                    "cloudsqlinstance",
                    "serviceaccount",
                    "instance",
                    "role",
                ],
            ),
        );
        table.insert("bucket".to_owned(), capability(&[Iam, Gcs], &[]));
        table.insert("dataset".to_owned(), capability(&[Dataset], &[]));
        table.insert("cloudsqlinstance".to_owned(), capability(&[Cloudsql], &[]));
        table.insert(
            "gsuite_group".to_owned(),
            capability(&[], &["gsuite_group_member", "gsuite_user_member"]),
        );
        Self { table }
    }
}

impl CapabilityTable {
    pub fn new(table: IndexMap<String, Capability>) -> Self {
        Self { table }
    }

    pub fn get(&self, resource_type: &str) -> &Capability {
        self.table.get(resource_type).unwrap_or(&LEAF)
    }

    pub fn is_leaf(&self, resource_type: &str) -> bool {
        self.get(resource_type).is_leaf()
    }

    pub fn applies(&self, resource_type: &str, policy: PolicyKind) -> bool {
        self.get(resource_type).policies.contains(&policy)
    }
}
