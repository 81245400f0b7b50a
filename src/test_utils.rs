use std::fmt::Display;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ModelError;
use crate::model::{DataModel, MemberKind};

pub const IAMQL_TESTS_FILE: &str = "tests/iamql_tests.toml";
pub const INVENTORY_FIXTURE_FILE: &str = "tests/inventory.json";

#[derive(Deserialize, Debug, Clone)]
pub struct TestIamql {
    pub query: String,
    /// Rows of entity names keyed by query name.
    pub expected: IndexMap<String, Vec<Vec<String>>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestIamqlError {
    pub query: String,
    /// Substring of the rendered error.
    pub error: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestIamqlData {
    pub tests: Vec<TestIamql>,
    #[serde(default)]
    pub errors: Vec<TestIamqlError>,
}

impl Display for TestIamqlData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A small organization used across the model and IAMQL tests.
///
/// ```text
/// organization/org                      roles/viewer -> user/alice
/// ├── folder/f1
/// │   └── project/p1                    roles/sqlwriter -> group/devs
/// │       ├── instance/vm1              roles/sqlreader -> group/admins
/// │       └── cloudsqlinstance/db1
/// └── project/p2
///     └── bucket/b2                     roles/viewer -> serviceAccount/bot
///
/// group/admins ⊃ group/devs ⊃ {user/felix, user/fooba}
/// ```
pub fn explain_scenario() -> Result<DataModel, ModelError> {
    let mut data = DataModel::new();
    data.add_resource("organization/org", "organization", None)?;
    data.add_resource("folder/f1", "folder", Some("organization/org"))?;
    data.add_resource("project/p1", "project", Some("folder/f1"))?;
    data.add_resource("instance/vm1", "instance", Some("project/p1"))?;
    data.add_resource("cloudsqlinstance/db1", "cloudsqlinstance", Some("project/p1"))?;
    data.add_resource("project/p2", "project", Some("organization/org"))?;
    data.add_resource("bucket/b2", "bucket", Some("project/p2"))?;
    data.set_display_name("project/p1", "Payments")?;

    data.add_role("roles/sqlreader", &["cloudsql.instances.get"])?;
    data.add_role(
        "roles/sqlwriter",
        &["cloudsql.instances.get", "cloudsql.instances.update"],
    )?;
    data.add_role("roles/viewer", &["resourcemanager.projects.get"])?;
    data.set_role_details("roles/viewer", "Viewer", "Read access to projects")?;

    data.add_member("group/admins", MemberKind::Group, &[])?;
    data.add_member("group/devs", MemberKind::Group, &["group/admins"])?;
    data.add_member("user/felix", MemberKind::User, &["group/devs"])?;
    data.add_member("user/fooba", MemberKind::User, &["group/devs"])?;
    data.add_member("user/alice", MemberKind::User, &[])?;
    data.add_member("serviceAccount/bot", MemberKind::ServiceAccount, &[])?;

    data.add_binding("instance/vm1", "roles/sqlreader", &["group/admins"])?;
    data.add_binding("project/p1", "roles/sqlwriter", &["group/devs"])?;
    data.add_binding("organization/org", "roles/viewer", &["user/alice"])?;
    data.add_binding("bucket/b2", "roles/viewer", &["serviceAccount/bot"])?;
    Ok(data)
}
