//! # iamx
//!
//! A library for inventorying IAM policy graphs and explaining who can access what.
//!
//! # Features
//!
//! - Crawl a cloud resource tree, fetching the policies that apply to each resource type.
//! - Import crawled inventories into isolated models of resources, members, roles, permissions and bindings.
//! - Explain access: which members reach a resource through policy inheritance and group membership, and which resources a member reaches.
//! - Query the policy graph with IAMQL, a small declarative language with typed joins and filters.
//!
//! # Example
//!
//! ```rust,no_run
//! use iamx::{
//!     config::Config,
//!     crawler::{CrawlProgress, FixtureClient, InMemoryStorage, crawl_into_storage},
//!     iamql::run_iamql,
//!     importer::import_inventory,
//!     model::ModelManager,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     env_logger::init();
//!
//!     let client = FixtureClient::from_json(&std::fs::read_to_string("inventory.json")?)?;
//!     let storage = InMemoryStorage::new();
//!     let progress = CrawlProgress::new();
//!     let config = Config::default();
//!     crawl_into_storage(
//!         &client,
//!         &storage,
//!         &progress,
//!         &config.crawler,
//!         client.root().clone(),
//!     )?;
//!
//!     let mut models = ModelManager::new();
//!     let handle = models.create("inventory");
//!     let model = models.get_mut(&handle)?;
//!     import_inventory(&storage, model, &config.importer)?;
//!
//!     let path = model.data().find_resource_path("instance/vm1");
//!     println!("Path: {:?}", path.iter().map(|r| &r.name).collect::<Vec<_>>());
//!
//!     let iamql = r#"
//!         owners: { r resource (name == "project/p1"); ro role (name like "roles/owner%");
//!                   m user; b binding; }
//!                 { b.grants(r, ro, m); }
//!                 { m }
//!     "#;
//!     for result in run_iamql(iamql, model.data())? {
//!         println!("{}: {:?}", result.name, result.named_rows(model.data()));
//!     }
//!     Ok(())
//! }
//! ```
mod arena;
pub mod config;
pub mod crawler;
pub mod error;
pub mod iamql;
pub mod importer;
pub mod model;
pub mod test_utils;

pub use arena::ArenaIndex;
