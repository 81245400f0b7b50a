use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::arena::ArenaIndex;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MemberKind {
    User,
    Group,
    ServiceAccount,
    Domain,
    AllUsers,
    AllAuthenticatedUsers,
}

impl MemberKind {
    /// Kinds matched by the generic `member` entity in IAMQL.
    pub const CORE: &'static [MemberKind] =
        &[MemberKind::User, MemberKind::Group, MemberKind::ServiceAccount];

    /// Infers the kind from a `kind/id` member name, or from the bare
    /// `allUsers`/`allAuthenticatedUsers` names.
    pub fn from_member_name(name: &str) -> Option<MemberKind> {
        let prefix = name.split_once('/').map_or(name, |(kind, _)| kind);
        prefix.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub display_name: String,
    /// Set for resources acting as principals, such as service accounts.
    pub email: String,
    /// `parent_path/name`, computed when the resource is added.
    pub path: String,
    #[serde(skip)]
    pub parent: Option<ArenaIndex>,
    #[serde(skip)]
    pub children: Vec<ArenaIndex>,
    #[serde(skip)]
    pub bindings: Vec<ArenaIndex>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MemberKind,
    /// Groups directly containing this member.
    #[serde(skip)]
    pub parents: IndexSet<ArenaIndex>,
    /// Direct members, only populated for groups.
    #[serde(skip)]
    pub children: IndexSet<ArenaIndex>,
    #[serde(skip)]
    pub bindings: Vec<ArenaIndex>,
}

impl Member {
    pub fn is_group(&self) -> bool {
        self.kind == MemberKind::Group
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub name: String,
    pub title: String,
    pub description: String,
    #[serde(skip)]
    pub permissions: IndexSet<ArenaIndex>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Permission {
    pub name: String,
    #[serde(skip)]
    pub roles: IndexSet<ArenaIndex>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub id: u64,
    #[serde(skip)]
    pub resource: ArenaIndex,
    #[serde(skip)]
    pub role: ArenaIndex,
    #[serde(skip)]
    pub members: IndexSet<ArenaIndex>,
}

#[cfg(test)]
mod tests {
    use super::MemberKind;

    #[test]
    fn member_kind_from_name() {
        assert_eq!(
            MemberKind::from_member_name("user/felix"),
            Some(MemberKind::User)
        );
        assert_eq!(
            MemberKind::from_member_name("serviceAccount/sa@p.iam"),
            Some(MemberKind::ServiceAccount)
        );
        assert_eq!(
            MemberKind::from_member_name("allUsers"),
            Some(MemberKind::AllUsers)
        );
        assert_eq!(MemberKind::from_member_name("robot/x"), None);
        assert_eq!(MemberKind::ServiceAccount.to_string(), "serviceAccount");
    }
}
