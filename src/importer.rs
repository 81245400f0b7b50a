//! Builds a model from the records of a finished crawl.
use std::collections::HashMap;

use serde::Deserialize;

use crate::config::ImporterConfig;
use crate::crawler::{CrawledResource, RecordFilter, Storage};
use crate::error::ImportError;
use crate::model::{DataModel, MemberKind, Model};

const MEMBERSHIP_TYPES: [&str; 2] = ["gsuite_group_member", "gsuite_user_member"];

#[derive(Debug, Deserialize)]
struct IamPolicy {
    #[serde(default)]
    bindings: Vec<IamBinding>,
}

#[derive(Debug, Deserialize)]
struct IamBinding {
    role: String,
    #[serde(default)]
    members: Vec<String>,
}

/// Imports every committed record of `storage` into `model`.
///
/// Moves the model to IN_PROGRESS, then to DONE (PARTIAL_SUCCESS when
/// warnings were recorded) or BROKEN if the import fails.
pub fn import_inventory(
    storage: &dyn Storage,
    model: &mut Model,
    config: &ImporterConfig,
) -> Result<usize, ImportError> {
    model.set_in_progress()?;
    let result = Importer {
        model: &mut *model,
        config,
        processed: 0,
        group_names: HashMap::new(),
    }
    .run(storage);
    match result {
        Ok(count) => {
            log::info!("Imported {} records", count);
            model.set_done(&format!("Imported {} records", count))?;
            Ok(count)
        }
        Err(err) => {
            model.set_error(&err.to_string())?;
            Err(err)
        }
    }
}

/// Member name for an IAM policy member: `kind:id` becomes `kind/id`,
/// `allUsers` and `allAuthenticatedUsers` keep their name.
pub fn policy_member_name(member: &str) -> Option<(String, MemberKind)> {
    match member.split_once(':') {
        Some((kind, id)) => {
            let kind: MemberKind = kind.parse().ok()?;
            Some((format!("{}/{}", kind, id), kind))
        }
        None => {
            let kind: MemberKind = member.parse().ok()?;
            matches!(kind, MemberKind::AllUsers | MemberKind::AllAuthenticatedUsers)
                .then(|| (member.to_owned(), kind))
        }
    }
}

fn data_str<'a>(record: &'a CrawledResource, field: &str) -> Option<&'a str> {
    record.data.get(field).and_then(|value| value.as_str())
}

struct Importer<'a> {
    model: &'a mut Model,
    config: &'a ImporterConfig,
    processed: usize,
    /// gsuite_group record key -> group member name
    group_names: HashMap<String, String>,
}

impl Importer<'_> {
    fn data(&mut self) -> &mut DataModel {
        self.model.data_mut()
    }

    fn tick(&mut self) {
        self.processed += 1;
        if self.config.watchdog_interval > 0 && self.processed % self.config.watchdog_interval == 0
        {
            log::debug!("Imported {} records so far", self.processed);
            self.model.kick_watchdog();
        }
    }

    fn run(&mut self, storage: &dyn Storage) -> Result<usize, ImportError> {
        let mut memberships = vec![];
        let mut policies = vec![];
        for record in storage.iterate(RecordFilter::default())? {
            self.tick();
            if MEMBERSHIP_TYPES.contains(&record.r#type.as_str()) {
                memberships.push(record);
                continue;
            }
            self.import_resource(&record)?;
            if record.policies.iam.is_some() {
                policies.push(record);
            }
        }
        for record in &memberships {
            self.import_membership(record)?;
        }
        for record in &policies {
            self.import_policy(record)?;
        }
        Ok(self.processed)
    }

    fn import_resource(&mut self, record: &CrawledResource) -> Result<(), ImportError> {
        match record.r#type.as_str() {
            "role" => self.import_role(record),
            "gsuite_group" => {
                let Some(email) = data_str(record, "email") else {
                    self.model
                        .add_warning(&format!("Group {} has no email", record.key));
                    return Ok(());
                };
                let name = format!("group/{}", email);
                self.data().ensure_member(&name, MemberKind::Group);
                self.group_names.insert(record.key.clone(), name);
                Ok(())
            }
            "gsuite_user" => {
                let Some(email) = data_str(record, "primaryEmail") else {
                    self.model
                        .add_warning(&format!("User {} has no primary email", record.key));
                    return Ok(());
                };
                self.data()
                    .ensure_member(&format!("user/{}", email), MemberKind::User);
                Ok(())
            }
            _ => {
                if self.model.data().resource(&record.key).is_some() {
                    self.model.add_warning(&format!(
                        "Resource {} is listed below more than one parent",
                        record.key
                    ));
                    return Ok(());
                }
                let parent = record
                    .parent
                    .as_deref()
                    .filter(|parent| self.model.data().resource(parent).is_some());
                self.data()
                    .add_resource(&record.key, &record.r#type, parent)?;
                let display_name = data_str(record, "displayName").or(data_str(record, "name"));
                if let Some(display_name) = display_name {
                    self.data().set_display_name(&record.key, display_name)?;
                }
                if let Some(email) = data_str(record, "email") {
                    self.data().set_email(&record.key, email)?;
                }
                Ok(())
            }
        }
    }

    fn import_role(&mut self, record: &CrawledResource) -> Result<(), ImportError> {
        let name = data_str(record, "name")
            .unwrap_or(record.key.as_str())
            .to_owned();
        if self.model.data().role(&name).is_some() {
            // predefined roles are listed under every project
            return Ok(());
        }
        let permissions: Vec<&str> = match record
            .data
            .get("includedPermissions")
            .and_then(|value| value.as_array())
        {
            Some(permissions) => permissions.iter().filter_map(|p| p.as_str()).collect(),
            None => {
                self.model
                    .add_warning(&format!("Role {} has no included permissions", name));
                vec![]
            }
        };
        self.data().add_role(&name, &permissions)?;
        let title = data_str(record, "title").unwrap_or_default();
        let description = data_str(record, "description").unwrap_or_default();
        self.data().set_role_details(&name, title, description)?;
        Ok(())
    }

    fn import_membership(&mut self, record: &CrawledResource) -> Result<(), ImportError> {
        let Some(group) = record
            .parent
            .as_ref()
            .and_then(|parent| self.group_names.get(parent))
            .cloned()
        else {
            self.model
                .add_warning(&format!("Membership {} has no parent group", record.key));
            return Ok(());
        };
        let Some(email) = data_str(record, "email") else {
            self.model
                .add_warning(&format!("Membership {} has no email", record.key));
            return Ok(());
        };
        let (name, kind) = if record.r#type == "gsuite_group_member" {
            (format!("group/{}", email), MemberKind::Group)
        } else {
            (format!("user/{}", email), MemberKind::User)
        };
        self.data().ensure_member(&name, kind);
        self.data().add_group_member(&group, &name)?;
        Ok(())
    }

    fn import_policy(&mut self, record: &CrawledResource) -> Result<(), ImportError> {
        let Some(raw_policy) = &record.policies.iam else {
            return Ok(());
        };
        let policy: IamPolicy = match serde_json::from_value(raw_policy.clone()) {
            Ok(policy) => policy,
            Err(err) => {
                self.model.add_warning(&format!(
                    "Malformed IAM policy on {}: {}",
                    record.key, err
                ));
                return Ok(());
            }
        };
        if self.model.data().resource(&record.key).is_none() {
            self.model.add_warning(&format!(
                "IAM policy on {} which is not a resource",
                record.key
            ));
            return Ok(());
        }
        for binding in policy.bindings {
            if self.model.data().role(&binding.role).is_none() {
                self.model.add_warning(&format!(
                    "Unknown role {} in policy of {}",
                    binding.role, record.key
                ));
                continue;
            }
            let mut names = vec![];
            for member in &binding.members {
                match policy_member_name(member) {
                    Some((name, kind)) => {
                        self.data().ensure_member(&name, kind);
                        names.push(name);
                    }
                    None => self.model.add_warning(&format!(
                        "Unsupported member {} in policy of {}",
                        member, record.key
                    )),
                }
            }
            let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
            self.data()
                .add_binding(&record.key, &binding.role, &names)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_names() {
        assert_eq!(
            policy_member_name("user:felix@example.com"),
            Some(("user/felix@example.com".to_owned(), MemberKind::User))
        );
        assert_eq!(
            policy_member_name("serviceAccount:sa@p.iam"),
            Some(("serviceAccount/sa@p.iam".to_owned(), MemberKind::ServiceAccount))
        );
        assert_eq!(
            policy_member_name("allUsers"),
            Some(("allUsers".to_owned(), MemberKind::AllUsers))
        );
        assert_eq!(policy_member_name("user"), None);
        assert_eq!(policy_member_name("deleted:user:x"), None);
    }
}
