use std::collections::BTreeSet;

use iamx::config::{CrawlerConfig, ImporterConfig};
use iamx::crawler::{CrawlProgress, FixtureClient, InMemoryStorage, crawl_into_storage};
use iamx::error::ModelError;
use iamx::importer::import_inventory;
use iamx::model::{
    AccessTarget, AccessTuple, DataModel, Grant, GrantStrategy, Member, MemberKind, ModelManager,
    ModelState, Resource, Role,
};
use iamx::test_utils::{INVENTORY_FIXTURE_FILE, explain_scenario};

fn member_names(members: &[&Member]) -> BTreeSet<String> {
    members.iter().map(|m| m.name.clone()).collect()
}

fn resource_names(resources: &[&Resource]) -> Vec<String> {
    resources.iter().map(|r| r.name.clone()).collect()
}

fn role_names(roles: &[&Role]) -> Vec<String> {
    roles.iter().map(|r| r.name.clone()).collect()
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn inventory_model() -> DataModel {
    let json = std::fs::read_to_string(INVENTORY_FIXTURE_FILE).expect("Cannot open inventory");
    let client = FixtureClient::from_json(&json).expect("Cannot parse inventory fixture");
    let storage = InMemoryStorage::new();
    crawl_into_storage(
        &client,
        &storage,
        &CrawlProgress::new(),
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap();
    let mut models = ModelManager::new();
    let handle = models.create("inventory");
    import_inventory(&storage, models.get_mut(&handle).unwrap(), &ImporterConfig::default())
        .unwrap();
    models.get(&handle).unwrap().data().clone()
}

#[test]
fn test_reverse_expand_members() {
    let data = explain_scenario().unwrap();
    let expanded = data.reverse_expand_members(&["user/felix"]);
    assert_eq!(
        member_names(&expanded),
        names(&["user/felix", "group/devs", "group/admins"])
    );
    // seeds come first
    assert_eq!(expanded[0].name, "user/felix");
    assert!(data.reverse_expand_members(&["user/nobody"]).is_empty());
}

#[test]
fn test_expansion_is_idempotent_and_monotone() {
    let data = explain_scenario().unwrap();
    let seeds_list: [&[&str]; 4] = [
        &["user/felix"],
        &["group/devs", "user/alice"],
        &["group/admins"],
        &["serviceAccount/bot", "user/fooba"],
    ];
    for seeds in seeds_list {
        println!("Testing expansion of {:?}", seeds);
        let once = data.reverse_expand_members(seeds);
        let once_names: Vec<&str> = once.iter().map(|m| m.name.as_str()).collect();
        let twice = data.reverse_expand_members(&once_names);
        assert_eq!(member_names(&once), member_names(&twice));
        assert!(names(seeds).is_subset(&member_names(&once)));

        let forward = data.expand_members(seeds);
        assert!(names(seeds).is_subset(&member_names(&forward)));
    }
}

#[test]
fn test_expand_members() {
    let data = explain_scenario().unwrap();
    let expanded = data.expand_members(&["group/admins", "user/alice"]);
    let expanded_names: Vec<&str> = expanded.iter().map(|m| m.name.as_str()).collect();
    // groups first, then the other members
    assert_eq!(
        expanded_names,
        vec![
            "group/admins",
            "group/devs",
            "user/alice",
            "user/felix",
            "user/fooba"
        ]
    );
}

#[test]
fn test_expansion_terminates_on_cycles() {
    let mut data = DataModel::new();
    data.add_member("group/a", MemberKind::Group, &[]).unwrap();
    data.add_member("group/b", MemberKind::Group, &["group/a"]).unwrap();
    data.add_group_member("group/b", "group/a").unwrap();

    assert_eq!(
        member_names(&data.expand_members(&["group/a"])),
        names(&["group/a", "group/b"])
    );
    assert_eq!(
        member_names(&data.reverse_expand_members(&["group/a"])),
        names(&["group/a", "group/b"])
    );
}

#[test]
fn test_reverse_expand_members_graph() {
    let data = explain_scenario().unwrap();
    let graph = data.reverse_expand_members_graph(&["user/felix"]);
    assert_eq!(graph.members.len(), 3);
    assert_eq!(graph.edges.get("user/felix"), Some(&vec!["group/devs"]));
    assert_eq!(graph.edges.get("group/devs"), Some(&vec!["group/admins"]));
    assert!(!graph.edges.contains_key("group/admins"));
}

#[test]
fn test_find_resource_path() {
    let mut data = DataModel::new();
    data.add_resource("root", "organization", None).unwrap();
    data.add_resource("folder1", "folder", Some("root")).unwrap();
    data.add_resource("project1", "project", Some("folder1")).unwrap();

    assert_eq!(
        resource_names(&data.find_resource_path("project1")),
        vec!["project1", "folder1", "root"]
    );
    assert_eq!(data.resource("project1").unwrap().path, "root/folder1/project1");
    assert!(data.find_resource_path("missing").is_empty());
}

#[test]
fn test_roles_by_permission_subset() {
    let mut data = DataModel::new();
    data.add_role("R1", &["p1", "p2"]).unwrap();
    data.add_role("R2", &["p1"]).unwrap();
    data.add_role("R3", &[]).unwrap();

    assert_eq!(
        role_names(&data.get_roles_by_permission_names(&["p1", "p2"])),
        vec!["R1"]
    );
    assert_eq!(
        role_names(&data.get_roles_by_permission_names(&["p1"])),
        vec!["R1", "R2"]
    );
    assert_eq!(
        role_names(&data.get_roles_by_permission_names(&[])),
        vec!["R1", "R2"]
    );
    assert!(data.get_roles_by_permission_names(&["p1", "p9"]).is_empty());
}

#[test]
fn test_access_is_inherited_from_ancestors() {
    let data = explain_scenario().unwrap();

    let on_vm = data.explain_has_access_to_resource("instance/vm1", &["cloudsql.instances.get"], false);
    assert_eq!(
        member_names(&on_vm),
        names(&["group/admins", "group/devs"])
    );

    // the project binding does not reach the sibling project
    let on_sibling =
        data.explain_has_access_to_resource("bucket/b2", &["cloudsql.instances.get"], false);
    assert!(on_sibling.is_empty());

    let expanded =
        data.explain_has_access_to_resource("instance/vm1", &["cloudsql.instances.update"], true);
    assert_eq!(
        member_names(&expanded),
        names(&["group/devs", "user/felix", "user/fooba"])
    );

    assert!(data
        .explain_has_access_to_resource("instance/missing", &["cloudsql.instances.get"], false)
        .is_empty());
}

#[test]
fn test_explain_member_has_access_to() {
    let data = explain_scenario().unwrap();
    let resources = data
        .explain_member_has_access_to(&["user/felix"], false)
        .unwrap();
    assert_eq!(resource_names(&resources), vec!["instance/vm1", "project/p1"]);

    assert!(data
        .explain_member_has_access_to(&["user/nobody"], false)
        .unwrap()
        .is_empty());

    assert!(matches!(
        data.explain_member_has_access_to(&["user/felix"], true),
        Err(ModelError::NotSupported(_))
    ));
}

#[test]
fn test_check_access() {
    let data = explain_scenario().unwrap();
    assert!(data.check_access("user/felix", "cloudsql.instances.update", "cloudsqlinstance/db1"));
    assert!(data.check_access("user/alice", "resourcemanager.projects.get", "bucket/b2"));
    assert!(!data.check_access("user/alice", "cloudsql.instances.get", "instance/vm1"));
    assert!(!data.check_access("serviceAccount/bot", "resourcemanager.projects.get", "project/p1"));
    assert!(!data.check_access("user/nobody", "resourcemanager.projects.get", "project/p1"));
}

#[test]
fn test_resource_expansion_and_ancestry() {
    let data = explain_scenario().unwrap();
    assert_eq!(
        resource_names(&data.expand_resources(&["project/p1"])),
        vec!["project/p1", "instance/vm1", "cloudsqlinstance/db1"]
    );

    let ancestors = data.resource_ancestors(&["instance/vm1", "cloudsqlinstance/db1"]);
    assert_eq!(
        ancestors.get("project/p1"),
        Some(&vec!["instance/vm1", "cloudsqlinstance/db1"])
    );
    assert_eq!(ancestors.get("folder/f1"), Some(&vec!["project/p1"]));
    assert_eq!(ancestors.get("organization/org"), Some(&vec!["folder/f1"]));
    assert_eq!(ancestors.get("instance/vm1"), Some(&vec![]));
    assert!(data.resource_ancestors(&["bucket/none"]).is_empty());
}

#[test]
fn test_explain_granted() {
    let data = inventory_model();
    let explanation = data
        .explain_granted(
            "user/felix@example.com",
            "instance/vm1",
            AccessTarget::Permission("cloudsql.instances.update"),
        )
        .unwrap();
    assert_eq!(
        explanation.grants,
        vec![Grant {
            resource: "project/p1",
            role: "roles/sqlwriter",
            member: "group/devs@example.com",
        }]
    );
    assert_eq!(
        explanation.resource_path,
        vec!["instance/vm1", "project/p1", "folder/f1", "organization/org"]
    );
    assert_eq!(
        explanation.member_graph.edges.get("user/felix@example.com"),
        Some(&vec!["group/devs@example.com"])
    );
    assert_eq!(
        explanation.member_graph.edges.get("group/devs@example.com"),
        Some(&vec!["group/admins@example.com"])
    );

    // inherited from the organization
    let explanation = data
        .explain_granted(
            "user/alice@example.com",
            "bucket/b1",
            AccessTarget::Role("roles/viewer"),
        )
        .unwrap();
    assert_eq!(
        explanation.grants,
        vec![Grant {
            resource: "organization/org",
            role: "roles/viewer",
            member: "user/alice@example.com",
        }]
    );

    assert_eq!(
        data.explain_granted(
            "user/carol@example.com",
            "instance/vm1",
            AccessTarget::Permission("cloudsql.instances.update"),
        )
        .unwrap_err(),
        ModelError::GrantNotFound {
            member: "user/carol@example.com".to_owned(),
            resource: "instance/vm1".to_owned(),
            target: "cloudsql.instances.update".to_owned(),
        }
    );
}

#[test]
fn test_explain_denied() {
    let data = inventory_model();
    let strategy = |overgranting, member, resource| GrantStrategy {
        overgranting,
        role: "roles/sqlwriter",
        member,
        resource,
    };

    let strategies = data
        .explain_denied(
            "user/carol@example.com",
            &["instance/vm1"],
            &["cloudsql.instances.update"],
            &[],
        )
        .unwrap();
    assert_eq!(
        strategies,
        vec![
            strategy(3, "user/carol@example.com", "organization/org"),
            strategy(2, "user/carol@example.com", "folder/f1"),
            strategy(1, "user/carol@example.com", "project/p1"),
            strategy(0, "user/carol@example.com", "instance/vm1"),
            strategy(1, "group/devs@example.com", "project/p1"),
        ]
    );

    // the chain stops at the lowest common ancestor
    let strategies = data
        .explain_denied(
            "user/carol@example.com",
            &["instance/vm1", "cloudsqlinstance/db1"],
            &[],
            &["roles/sqlwriter"],
        )
        .unwrap();
    assert_eq!(
        strategies,
        vec![
            strategy(2, "user/carol@example.com", "organization/org"),
            strategy(1, "user/carol@example.com", "folder/f1"),
            strategy(0, "user/carol@example.com", "project/p1"),
            strategy(0, "group/devs@example.com", "project/p1"),
        ]
    );

    assert_eq!(
        data.explain_denied("user/carol@example.com", &["instance/vm1"], &["x.y.z"], &[])
            .unwrap_err(),
        ModelError::NoCoveringRoles
    );
    assert_eq!(
        data.explain_denied("user/carol@example.com", &["instance/vm1"], &[], &[])
            .unwrap_err(),
        ModelError::NoCoveringRoles
    );
    assert!(matches!(
        data.explain_denied("user/carol@example.com", &["instance/vm1"], &[], &["roles/none"]),
        Err(ModelError::NotFound { kind: "Role", .. })
    ));
    assert!(matches!(
        data.explain_denied(
            "user/carol@example.com",
            &["bucket/none"],
            &[],
            &["roles/viewer"]
        ),
        Err(ModelError::NotFound { kind: "Resource", .. })
    ));
}

#[test]
fn test_query_access_by_member() {
    let data = inventory_model();
    assert_eq!(
        data.query_access_by_member(
            "user/felix@example.com",
            &["cloudsql.instances.update"],
            false
        ),
        vec![("roles/sqlwriter", vec!["project/p1"])]
    );
    // no permission filter: every role with permissions
    assert_eq!(
        data.query_access_by_member("user/felix@example.com", &[], false),
        vec![("roles/sqlwriter", vec!["project/p1"])]
    );
    assert!(data
        .query_access_by_member("user/felix@example.com", &["resourcemanager.projects.get"], false)
        .is_empty());
    assert_eq!(
        data.query_access_by_member(
            "user/alice@example.com",
            &["resourcemanager.projects.get"],
            false
        ),
        vec![("roles/viewer", vec!["organization/org"])]
    );

    let expanded = data.query_access_by_member("user/felix@example.com", &[], true);
    assert_eq!(expanded.len(), 1);
    assert_eq!(expanded[0].0, "roles/sqlwriter");
    assert_eq!(expanded[0].1[0], "project/p1");
    assert_eq!(
        expanded[0].1.iter().copied().collect::<BTreeSet<_>>(),
        BTreeSet::from([
            "project/p1",
            "bucket/b1",
            "cloudsqlinstance/db1",
            "instance/vm1"
        ])
    );
}

#[test]
fn test_query_access_by_permission() {
    let data = inventory_model();
    assert_eq!(
        data.query_access_by_permission(
            AccessTarget::Permission("resourcemanager.projects.get"),
            false,
            false
        ),
        vec![
            AccessTuple {
                role: "roles/viewer",
                resource: "bucket/b1",
                members: vec!["serviceAccount/bot@p1.iam"],
            },
            AccessTuple {
                role: "roles/viewer",
                resource: "organization/org",
                members: vec!["user/alice@example.com"],
            },
        ]
    );

    assert_eq!(
        data.query_access_by_permission(AccessTarget::Role("roles/sqlwriter"), true, false),
        vec![AccessTuple {
            role: "roles/sqlwriter",
            resource: "project/p1",
            members: vec!["group/devs@example.com", "user/felix@example.com"],
        }]
    );

    let expanded =
        data.query_access_by_permission(AccessTarget::Role("roles/sqlwriter"), false, true);
    assert_eq!(
        expanded.iter().map(|tuple| tuple.resource).collect::<Vec<_>>(),
        vec![
            "bucket/b1",
            "cloudsqlinstance/db1",
            "instance/vm1",
            "project/p1"
        ]
    );
    assert!(expanded
        .iter()
        .all(|tuple| tuple.members == vec!["group/devs@example.com"]));

    assert!(data
        .query_access_by_permission(AccessTarget::Permission("x.y.z"), true, true)
        .is_empty());
}

#[test]
fn test_query_access_by_resource() {
    let data = explain_scenario().unwrap();
    let access = data.query_access_by_resource("instance/vm1", &["cloudsql.instances.get"], false);
    assert_eq!(access.len(), 2);
    assert_eq!(access["roles/sqlreader"], vec!["group/admins"]);
    assert_eq!(access["roles/sqlwriter"], vec!["group/devs"]);

    let access = data.query_access_by_resource("instance/vm1", &["cloudsql.instances.get"], true);
    assert_eq!(
        access["roles/sqlreader"],
        vec!["group/admins", "group/devs", "user/felix", "user/fooba"]
    );
    assert_eq!(
        access["roles/sqlwriter"],
        vec!["group/devs", "user/felix", "user/fooba"]
    );

    assert!(data
        .query_access_by_resource("bucket/none", &[], false)
        .is_empty());
}

#[test]
fn test_prefix_listings() {
    let data = explain_scenario().unwrap();
    assert_eq!(
        resource_names(&data.list_resources_by_prefix("project/")),
        vec!["project/p1", "project/p2"]
    );
    assert_eq!(data.list_members_by_prefix("group/").len(), 2);
    assert_eq!(
        role_names(&data.list_roles_by_prefix("roles/sql")),
        vec!["roles/sqlreader", "roles/sqlwriter"]
    );

    let permissions: Vec<&str> = data
        .query_permissions_by_roles(&["roles/viewer"], &["roles/sqlr"])
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(
        permissions,
        vec!["cloudsql.instances.get", "resourcemanager.projects.get"]
    );
}

#[test]
fn test_mutation_errors() {
    let mut data = explain_scenario().unwrap();
    assert!(matches!(
        data.add_resource("project/p3", "project", Some("folder/none")),
        Err(ModelError::NotFound { .. })
    ));
    assert!(matches!(
        data.add_resource("project/p1", "project", None),
        Err(ModelError::Duplicate { .. })
    ));
    assert!(matches!(
        data.add_member("user/zed", MemberKind::User, &["user/alice"]),
        Err(ModelError::NotAGroup(_))
    ));
    assert!(matches!(
        data.add_role("roles/viewer", &[]),
        Err(ModelError::Duplicate { .. })
    ));
    assert!(matches!(
        data.add_binding("project/p1", "roles/missing", &["user/alice"]),
        Err(ModelError::NotFound { .. })
    ));

    // binding again merges into the same binding
    data.add_binding("project/p1", "roles/sqlwriter", &["user/alice"])
        .unwrap();
    let binding = data.binding("project/p1", "roles/sqlwriter").unwrap();
    assert_eq!(binding.id, 2);
    assert_eq!(data.binding_members(binding).count(), 2);
}

#[test]
fn test_model_registry() {
    let mut models = ModelManager::new();
    let first = models.create("first");
    let second = models.create("second");
    assert_ne!(first, second);
    assert_eq!(first.len(), 32);

    let model = models.get_mut(&first).unwrap();
    model.data_mut().add_resource("project/p", "project", None).unwrap();
    assert!(models.get(&second).unwrap().data().resource("project/p").is_none());
    assert_eq!(models.get(&first).unwrap().state(), ModelState::Waiting);

    assert_eq!(models.models().len(), 2);
    models.delete(&first).unwrap();
    assert!(matches!(models.get(&first), Err(ModelError::UnknownModel(_))));
}
