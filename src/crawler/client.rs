use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::PolicyKind;
use crate::error::ClientError;

/// Opaque policy document, passed through to storage unchanged.
pub type RawPolicy = serde_json::Value;

/// A resource as discovered through the cloud API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResource {
    #[serde(rename = "type")]
    pub r#type: String,
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawResource {
    pub fn new(r#type: &str, id: &str) -> Self {
        Self {
            r#type: r#type.to_owned(),
            id: id.to_owned(),
            data: serde_json::Value::Null,
        }
    }

    /// `type/id`, unique across the crawl.
    pub fn key(&self) -> String {
        format!("{}/{}", self.r#type, self.id)
    }
}

/// Access to the cloud provider APIs.
pub trait CloudResourceClient: Send + Sync {
    /// Lists the children of `parent` of one kind.
    fn fetch_children(
        &self,
        parent: &RawResource,
        child_type: &str,
    ) -> Result<Vec<RawResource>, ClientError>;

    fn fetch_iam_policy(&self, resource: &RawResource) -> Result<Option<RawPolicy>, ClientError>;

    fn fetch_gcs_policy(&self, resource: &RawResource) -> Result<Option<RawPolicy>, ClientError>;

    fn fetch_dataset_policy(
        &self,
        resource: &RawResource,
    ) -> Result<Option<RawPolicy>, ClientError>;

    fn fetch_cloudsql_policy(
        &self,
        resource: &RawResource,
    ) -> Result<Option<RawPolicy>, ClientError>;

    fn fetch_policy(
        &self,
        resource: &RawResource,
        kind: PolicyKind,
    ) -> Result<Option<RawPolicy>, ClientError> {
        match kind {
            PolicyKind::Iam => self.fetch_iam_policy(resource),
            PolicyKind::Gcs => self.fetch_gcs_policy(resource),
            PolicyKind::Dataset => self.fetch_dataset_policy(resource),
            PolicyKind::Cloudsql => self.fetch_cloudsql_policy(resource),
        }
    }
}

/// One node of a JSON resource-tree fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureResource {
    #[serde(rename = "type")]
    pub r#type: String,
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub iam_policy: Option<RawPolicy>,
    pub gcs_policy: Option<RawPolicy>,
    pub dataset_policy: Option<RawPolicy>,
    pub cloudsql_policy: Option<RawPolicy>,
    #[serde(default)]
    pub children: Vec<FixtureResource>,
    /// Policy kind whose fetch fails for this node.
    pub fail: Option<PolicyKind>,
    /// Child kinds whose listing fails for this node.
    #[serde(default)]
    pub fail_children: Vec<String>,
}

#[derive(Debug, Clone)]
struct FixtureEntry {
    resource: RawResource,
    policies: [Option<RawPolicy>; 4],
    children: Vec<RawResource>,
    fail: Option<PolicyKind>,
    fail_children: Vec<String>,
}

fn policy_slot(kind: PolicyKind) -> usize {
    match kind {
        PolicyKind::Iam => 0,
        PolicyKind::Gcs => 1,
        PolicyKind::Dataset => 2,
        PolicyKind::Cloudsql => 3,
    }
}

/// Serves a resource tree held in memory, typically loaded from JSON.
///
/// A key may appear below several parents. Such nodes share one set of
/// policies and children, taken from the last definition.
#[derive(Debug, Clone)]
pub struct FixtureClient {
    root: RawResource,
    entries: IndexMap<String, FixtureEntry>,
}

impl FixtureClient {
    pub fn new(root: FixtureResource) -> Self {
        let mut entries = IndexMap::new();
        let root_resource = Self::index(root, &mut entries);
        Self {
            root: root_resource,
            entries,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    fn index(node: FixtureResource, entries: &mut IndexMap<String, FixtureEntry>) -> RawResource {
        let resource = RawResource {
            r#type: node.r#type,
            id: node.id,
            data: node.data,
        };
        let children = node
            .children
            .into_iter()
            .map(|child| Self::index(child, entries))
            .collect();
        entries.insert(
            resource.key(),
            FixtureEntry {
                resource: resource.clone(),
                policies: [
                    node.iam_policy,
                    node.gcs_policy,
                    node.dataset_policy,
                    node.cloudsql_policy,
                ],
                children,
                fail: node.fail,
                fail_children: node.fail_children,
            },
        );
        resource
    }

    /// The top-level resource of the fixture.
    pub fn root(&self) -> &RawResource {
        &self.root
    }

    fn entry(&self, resource: &RawResource) -> Result<&FixtureEntry, ClientError> {
        self.entries
            .get(&resource.key())
            .ok_or_else(|| ClientError::UnknownResource(resource.key()))
    }

    fn policy(
        &self,
        resource: &RawResource,
        kind: PolicyKind,
    ) -> Result<Option<RawPolicy>, ClientError> {
        let entry = self.entry(resource)?;
        if entry.fail == Some(kind) {
            return Err(ClientError::Api(format!(
                "{} policy of {} is unavailable",
                kind,
                resource.key()
            )));
        }
        Ok(entry.policies[policy_slot(kind)].clone())
    }
}

impl CloudResourceClient for FixtureClient {
    fn fetch_children(
        &self,
        parent: &RawResource,
        child_type: &str,
    ) -> Result<Vec<RawResource>, ClientError> {
        let entry = self.entry(parent)?;
        if entry.fail_children.iter().any(|kind| kind == child_type) {
            return Err(ClientError::Api(format!(
                "cannot list {} children of {}",
                child_type,
                parent.key()
            )));
        }
        Ok(entry
            .children
            .iter()
            .filter(|child| child.r#type == child_type)
            .cloned()
            .collect())
    }

    fn fetch_iam_policy(&self, resource: &RawResource) -> Result<Option<RawPolicy>, ClientError> {
        self.policy(resource, PolicyKind::Iam)
    }

    fn fetch_gcs_policy(&self, resource: &RawResource) -> Result<Option<RawPolicy>, ClientError> {
        self.policy(resource, PolicyKind::Gcs)
    }

    fn fetch_dataset_policy(
        &self,
        resource: &RawResource,
    ) -> Result<Option<RawPolicy>, ClientError> {
        self.policy(resource, PolicyKind::Dataset)
    }

    fn fetch_cloudsql_policy(
        &self,
        resource: &RawResource,
    ) -> Result<Option<RawPolicy>, ClientError> {
        self.policy(resource, PolicyKind::Cloudsql)
    }
}
