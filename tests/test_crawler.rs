use std::collections::BTreeSet;

use iamx::config::{CrawlerConfig, ImporterConfig};
use iamx::crawler::storage::SessionHandle;
use iamx::crawler::{
    CrawlProgress, CrawledResource, Crawler, FixtureClient, InMemoryStorage, PolicyKind,
    Progresser, RecordFilter, Storage, crawl_into_storage,
};
use iamx::error::{CrawlError, ImportError, ModelError, StorageError};
use iamx::importer::import_inventory;
use iamx::model::{MemberKind, ModelManager, ModelState};
use iamx::test_utils::INVENTORY_FIXTURE_FILE;

fn load_inventory() -> FixtureClient {
    let json = std::fs::read_to_string(INVENTORY_FIXTURE_FILE).expect("Cannot open inventory");
    FixtureClient::from_json(&json).expect("Cannot parse inventory fixture")
}

fn committed(storage: &InMemoryStorage) -> Vec<CrawledResource> {
    storage.iterate(RecordFilter::default()).unwrap().collect()
}

fn keys(records: &[CrawledResource]) -> Vec<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}

const FAILING_TREE: &str = r#"
{
  "type": "organization",
  "id": "org",
  "iam_policy": { "bindings": [] },
  "children": [
    {
      "type": "folder",
      "id": "f1",
      "fail": "iam",
      "children": [
        {
          "type": "project",
          "id": "p1",
          "children": [{ "type": "bucket", "id": "b1" }]
        }
      ]
    },
    { "type": "folder", "id": "f2" }
  ]
}
"#;

#[test]
fn test_crawl_inventory() {
    let client = load_inventory();
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let summary = crawl_into_storage(
        &client,
        &storage,
        &progress,
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap();

    assert_eq!(summary.objects, 14);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.warnings, 0);

    let records = committed(&storage);
    assert_eq!(
        keys(&records),
        vec![
            "organization/org",
            "gsuite_group/admins",
            "gsuite_group_member/admins-devs",
            "gsuite_user_member/admins-carol",
            "gsuite_group/devs",
            "gsuite_user_member/devs-felix",
            "gsuite_user/felix",
            "folder/f1",
            "project/p1",
            "bucket/b1",
            "cloudsqlinstance/db1",
            "instance/vm1",
            "role/viewer",
            "role/sqlwriter",
        ]
    );

    let project = records.iter().find(|r| r.key == "project/p1").unwrap();
    assert_eq!(project.parent.as_deref(), Some("folder/f1"));
    assert!(project.policies.iam.is_some());

    let bucket = records.iter().find(|r| r.key == "bucket/b1").unwrap();
    assert!(bucket.policies.get(PolicyKind::Iam).is_some());
    assert!(bucket.policies.get(PolicyKind::Gcs).is_some());
    assert!(bucket.policies.get(PolicyKind::Cloudsql).is_none());

    let database = records
        .iter()
        .find(|r| r.key == "cloudsqlinstance/db1")
        .unwrap();
    assert!(database.policies.cloudsql.is_some());
    assert!(database.policies.iam.is_none());

    let with_iam: Vec<CrawledResource> = storage
        .iterate(RecordFilter {
            types: vec![],
            with_iam_policy: true,
        })
        .unwrap()
        .collect();
    assert_eq!(
        keys(&with_iam),
        vec!["organization/org", "folder/f1", "project/p1", "bucket/b1"]
    );
}

#[test]
fn test_crawl_abort_on_visit_error() {
    let client = FixtureClient::from_json(FAILING_TREE).unwrap();
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let config = CrawlerConfig::default();

    storage.open().unwrap();
    let result = Crawler::new(&client, &storage, &progress, &config).run(client.root().clone());

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        CrawlError::Fetch {
            policy: PolicyKind::Iam,
            ..
        }
    ));
    assert_eq!(err.resource_key(), Some("folder/f1"));
    assert_eq!(progress.get_summary().errors, 1);
    assert!(progress.last_error().unwrap().contains("folder/f1"));
    // nothing below the failing folder, and its sibling is never reached
    assert_eq!(storage.pending_keys().unwrap(), vec!["organization/org"]);
    storage.rollback().unwrap();
    storage.close().unwrap();
}

#[test]
fn test_failed_crawl_is_rolled_back() {
    let client = FixtureClient::from_json(FAILING_TREE).unwrap();
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let result = crawl_into_storage(
        &client,
        &storage,
        &progress,
        &CrawlerConfig::default(),
        client.root().clone(),
    );

    assert!(result.is_err());
    assert!(committed(&storage).is_empty());
    // the session was closed, a new crawl can start
    storage.open().unwrap();
}

#[test]
fn test_parallel_crawl_abort() {
    let client = FixtureClient::from_json(FAILING_TREE).unwrap();
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let config = CrawlerConfig {
        parallel: true,
        threads: 2,
        ..CrawlerConfig::default()
    };
    let result = crawl_into_storage(&client, &storage, &progress, &config, client.root().clone());

    assert_eq!(result.unwrap_err().resource_key(), Some("folder/f1"));
    assert!(progress.get_summary().errors >= 1);
    assert!(committed(&storage).is_empty());
}

#[test]
fn test_parallel_crawl_matches_sequential() {
    let client = load_inventory();

    let sequential = InMemoryStorage::new();
    crawl_into_storage(
        &client,
        &sequential,
        &CrawlProgress::new(),
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap();

    let parallel = InMemoryStorage::new();
    let config = CrawlerConfig {
        parallel: true,
        threads: 4,
        ..CrawlerConfig::default()
    };
    let progress = CrawlProgress::new();
    let summary =
        crawl_into_storage(&client, &parallel, &progress, &config, client.root().clone()).unwrap();
    assert_eq!(summary.objects, 14);

    let as_set = |records: Vec<CrawledResource>| -> BTreeSet<(String, Option<String>)> {
        records.into_iter().map(|r| (r.key, r.parent)).collect()
    };
    assert_eq!(as_set(committed(&sequential)), as_set(committed(&parallel)));
}

#[test]
fn test_child_listing_failure_is_a_warning() {
    let client = FixtureClient::from_json(
        r#"
        {
          "type": "organization",
          "id": "org",
          "fail_children": ["folder"],
          "children": [
            { "type": "folder", "id": "f1" },
            { "type": "project", "id": "p1", "children": [{ "type": "bucket", "id": "b1" }] }
          ]
        }
        "#,
    )
    .unwrap();
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let summary = crawl_into_storage(
        &client,
        &storage,
        &progress,
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap();

    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(
        keys(&committed(&storage)),
        vec!["organization/org", "project/p1", "bucket/b1"]
    );
    let warnings = storage.warnings().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].key, "organization/org");
}

#[test]
fn test_excluded_and_shared_resources() {
    let client = FixtureClient::from_json(
        r#"
        {
          "type": "organization",
          "id": "org",
          "children": [
            {
              "type": "project",
              "id": "p1",
              "children": [{ "type": "bucket", "id": "shared" }, { "type": "instance", "id": "vm1" }]
            },
            {
              "type": "project",
              "id": "p2",
              "children": [{ "type": "bucket", "id": "shared" }]
            },
            {
              "type": "project",
              "id": "skip-me",
              "children": [{ "type": "bucket", "id": "hidden" }]
            }
          ]
        }
        "#,
    )
    .unwrap();
    let storage = InMemoryStorage::new();
    let config = CrawlerConfig {
        excluded_resources: vec!["project/skip-me".to_owned()],
        ..CrawlerConfig::default()
    };
    crawl_into_storage(
        &client,
        &storage,
        &CrawlProgress::new(),
        &config,
        client.root().clone(),
    )
    .unwrap();

    let records = committed(&storage);
    assert_eq!(
        keys(&records),
        vec![
            "organization/org",
            "project/p1",
            "bucket/shared",
            "instance/vm1",
            "project/p2",
            "bucket/shared"
        ]
    );
    // one record per parent listing the resource
    let shared_parents: Vec<Option<&str>> = records
        .iter()
        .filter(|r| r.key == "bucket/shared")
        .map(|r| r.parent.as_deref())
        .collect();
    assert_eq!(shared_parents, vec![Some("project/p1"), Some("project/p2")]);
}

const SHARED_MEMBER_TREE: &str = r#"
{
  "type": "organization",
  "id": "org",
  "children": [
    {
      "type": "gsuite_group",
      "id": "a",
      "data": { "email": "a@x" },
      "children": [{ "type": "gsuite_user_member", "id": "carol", "data": { "email": "carol@x" } }]
    },
    {
      "type": "gsuite_group",
      "id": "b",
      "data": { "email": "b@x" },
      "children": [{ "type": "gsuite_user_member", "id": "carol", "data": { "email": "carol@x" } }]
    }
  ]
}
"#;

#[test]
fn test_member_of_several_groups() {
    let client = FixtureClient::from_json(SHARED_MEMBER_TREE).unwrap();
    let storage = InMemoryStorage::new();
    let summary = crawl_into_storage(
        &client,
        &storage,
        &CrawlProgress::new(),
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap();
    assert_eq!(summary.objects, 5);

    let mut models = ModelManager::new();
    let handle = models.create("shared");
    let model = models.get_mut(&handle).unwrap();
    import_inventory(&storage, model, &ImporterConfig::default()).unwrap();
    assert_eq!(model.state(), ModelState::Done);

    let groups: BTreeSet<&str> = model
        .data()
        .reverse_expand_members(&["user/carol@x"])
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(groups, BTreeSet::from(["user/carol@x", "group/a@x", "group/b@x"]));
}

/// Delegates to an in-memory storage, except for `fail_on` which always fails.
struct FailingStorage {
    inner: InMemoryStorage,
    fail_on: &'static str,
}

impl FailingStorage {
    fn new(fail_on: &'static str) -> Self {
        Self {
            inner: InMemoryStorage::new(),
            fail_on,
        }
    }

    fn check(&self, operation: &str) -> Result<(), StorageError> {
        if self.fail_on == operation {
            return Err(StorageError::Backend(format!("{} refused", operation)));
        }
        Ok(())
    }
}

impl Storage for FailingStorage {
    fn open(&self) -> Result<SessionHandle, StorageError> {
        self.check("open")?;
        self.inner.open()
    }

    fn write(&self, record: CrawledResource) -> Result<(), StorageError> {
        self.check("write")?;
        self.inner.write(record)
    }

    fn warning(&self, key: &str, message: &str) -> Result<(), StorageError> {
        self.check("warning")?;
        self.inner.warning(key, message)
    }

    fn commit(&self) -> Result<(), StorageError> {
        self.check("commit")?;
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), StorageError> {
        self.check("rollback")?;
        self.inner.rollback()
    }

    fn close(&self) -> Result<(), StorageError> {
        self.check("close")?;
        self.inner.close()
    }

    fn iterate(
        &self,
        filter: RecordFilter,
    ) -> Result<Box<dyn Iterator<Item = CrawledResource> + '_>, StorageError> {
        self.inner.iterate(filter)
    }
}

#[test]
fn test_failed_commit_closes_session() {
    let client = load_inventory();
    let storage = FailingStorage::new("commit");
    let result = crawl_into_storage(
        &client,
        &storage,
        &CrawlProgress::new(),
        &CrawlerConfig::default(),
        client.root().clone(),
    );

    assert!(matches!(
        result,
        Err(CrawlError::Storage(StorageError::Backend(_)))
    ));
    assert!(committed(&storage.inner).is_empty());
    storage.inner.open().unwrap();
}

#[test]
fn test_failed_rollback_keeps_crawl_error() {
    let client = FixtureClient::from_json(FAILING_TREE).unwrap();
    let storage = FailingStorage::new("rollback");
    let err = crawl_into_storage(
        &client,
        &storage,
        &CrawlProgress::new(),
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap_err();

    assert!(matches!(err, CrawlError::Fetch { .. }));
    assert_eq!(err.resource_key(), Some("folder/f1"));
    // close dropped the uncommitted records
    assert!(storage.inner.pending_keys().unwrap().is_empty());
    storage.inner.open().unwrap();
}

#[test]
fn test_failed_warning_names_resource() {
    let client = FixtureClient::from_json(
        r#"
        {
          "type": "organization",
          "id": "org",
          "fail_children": ["folder"],
          "children": [{ "type": "folder", "id": "f1" }]
        }
        "#,
    )
    .unwrap();
    let storage = FailingStorage::new("warning");
    let progress = CrawlProgress::new();
    let err = crawl_into_storage(
        &client,
        &storage,
        &progress,
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap_err();

    assert!(matches!(err, CrawlError::Warning { .. }));
    assert_eq!(err.resource_key(), Some("organization/org"));
    assert_eq!(progress.get_summary().errors, 1);
}

#[test]
fn test_crawler_can_run_twice() {
    let client = load_inventory();
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let config = CrawlerConfig::default();
    let crawler = Crawler::new(&client, &storage, &progress, &config);

    storage.open().unwrap();
    crawler.run(client.root().clone()).unwrap();
    crawler.run(client.root().clone()).unwrap();
    assert_eq!(storage.pending_keys().unwrap().len(), 28);
    assert_eq!(progress.get_summary().objects, 28);
    storage.close().unwrap();
}

#[test]
fn test_inapplicable_policies_are_not_fetched() {
    // instances carry no policy kinds, so the failing dataset fetch is never made
    let client = FixtureClient::from_json(
        r#"
        {
          "type": "project",
          "id": "p1",
          "children": [{ "type": "instance", "id": "vm1", "fail": "dataset" }]
        }
        "#,
    )
    .unwrap();
    let storage = InMemoryStorage::new();
    let summary = crawl_into_storage(
        &client,
        &storage,
        &CrawlProgress::new(),
        &CrawlerConfig::default(),
        client.root().clone(),
    )
    .unwrap();
    assert_eq!(summary.objects, 2);
}

#[test]
fn test_import_resource_details() {
    let client = FixtureClient::from_json(
        r#"
        {
          "type": "project",
          "id": "p1",
          "data": { "displayName": "Payments" },
          "children": [
            {
              "type": "serviceaccount",
              "id": "robot",
              "data": { "email": "robot@p1.iam.gserviceaccount.com", "displayName": "Robot" }
            }
          ]
        }
        "#,
    )
    .unwrap();
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
    let handle = models.create("details");
    let model = models.get_mut(&handle).unwrap();
    import_inventory(&storage, model, &ImporterConfig::default()).unwrap();

    let robot = model.data().resource("serviceaccount/robot").unwrap();
    assert_eq!(robot.email, "robot@p1.iam.gserviceaccount.com");
    assert_eq!(robot.display_name, "Robot");
    assert_eq!(model.data().resource("project/p1").unwrap().email, "");
}

#[test]
fn test_import_inventory() {
    let client = load_inventory();
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
    let model = models.get_mut(&handle).unwrap();
    let count = import_inventory(&storage, model, &ImporterConfig { watchdog_interval: 5 }).unwrap();
    assert_eq!(count, 14);

    // unknown role and the deleted member
    assert_eq!(model.state(), ModelState::PartialSuccess);
    assert_eq!(model.warnings().len(), 2);
    assert_eq!(model.message(), "Imported 14 records");

    let data = model.data();
    assert_eq!(data.resources().count(), 6);
    assert_eq!(
        data.find_resource_path("instance/vm1")
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>(),
        vec!["instance/vm1", "project/p1", "folder/f1", "organization/org"]
    );
    assert_eq!(data.resource("project/p1").unwrap().display_name, "Payments");
    assert_eq!(data.role("roles/viewer").unwrap().title, "Viewer");
    assert_eq!(data.roles().count(), 2);
    assert_eq!(
        data.member("serviceAccount/bot@p1.iam").unwrap().kind,
        MemberKind::ServiceAccount
    );

    let admins = data.expand_members(&["group/admins@example.com"]);
    let admin_names: BTreeSet<&str> = admins.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        admin_names,
        BTreeSet::from([
            "group/admins@example.com",
            "group/devs@example.com",
            "user/carol@example.com",
            "user/felix@example.com",
        ])
    );

    assert!(data.check_access(
        "user/felix@example.com",
        "cloudsql.instances.update",
        "instance/vm1"
    ));
    assert!(!data.check_access(
        "user/carol@example.com",
        "cloudsql.instances.update",
        "instance/vm1"
    ));
    assert!(data.check_access(
        "user/alice@example.com",
        "resourcemanager.projects.get",
        "bucket/b1"
    ));
    assert!(data.binding("project/p1", "roles/unknown").is_none());

    // a model is imported once
    assert!(matches!(
        import_inventory(&storage, model, &ImporterConfig::default()),
        Err(ImportError::Model(ModelError::InvalidStateTransition { .. }))
    ));
}
