//! Inventory crawling: a depth-first walk over a resource tree that fetches
//! the applicable policies of every node and writes it to storage.
pub mod capability;
pub mod client;
pub mod progress;
pub mod storage;

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub use capability::{Capability, CapabilityTable, PolicyKind};
pub use client::{CloudResourceClient, FixtureClient, FixtureResource, RawPolicy, RawResource};
pub use progress::{CrawlProgress, ProgressSummary, Progresser};
pub use storage::{
    CrawledResource, InMemoryStorage, PolicyAttachments, RecordFilter, Storage, StoredWarning,
};

use crate::config::CrawlerConfig;
use crate::error::{ClientError, CrawlError};

pub struct Crawler<'a> {
    client: &'a dyn CloudResourceClient,
    storage: &'a dyn Storage,
    progress: &'a dyn Progresser,
    config: &'a CrawlerConfig,
    /// `(parent key, key)` of every node visited by the current run.
    visited: Mutex<HashSet<(Option<String>, String)>>,
    aborted: AtomicBool,
    first_error: Mutex<Option<CrawlError>>,
}

impl<'a> Crawler<'a> {
    pub fn new(
        client: &'a dyn CloudResourceClient,
        storage: &'a dyn Storage,
        progress: &'a dyn Progresser,
        config: &'a CrawlerConfig,
    ) -> Self {
        Self {
            client,
            storage,
            progress,
            config,
            visited: Mutex::new(HashSet::new()),
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
        }
    }

    /// Crawls the tree below `root` into the open storage session.
    ///
    /// The first failed visit aborts the whole crawl and is returned. Failures
    /// to list children are reported as warnings and the crawl goes on.
    pub fn run(&self, root: RawResource) -> Result<ProgressSummary, CrawlError> {
        log::info!("Crawling from {}", root.key());
        self.reset();
        if self.config.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .build()
                .map_err(|err| CrawlError::ThreadPool(err.to_string()))?;
            pool.scope(|scope| {
                if let Err(err) = self.accept(root, &[], Some(scope)) {
                    self.abort(err);
                }
            });
            let first_error = self
                .first_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(err) = first_error {
                return Err(err);
            }
        } else {
            self.accept(root, &[], None)?;
        }
        Ok(self.progress.get_summary())
    }

    fn reset(&self) {
        self.visited
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.aborted.store(false, Ordering::SeqCst);
        self.first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn abort(&self, err: CrawlError) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut first_error = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if first_error.is_none() {
            *first_error = Some(err);
        }
    }

    /// Visits `node` and then its children. `stack` holds the keys of the
    /// ancestors of `node`, nearest last.
    fn accept<'s>(
        &'s self,
        node: RawResource,
        stack: &[String],
        scope: Option<&rayon::Scope<'s>>,
    ) -> Result<(), CrawlError> {
        if self.is_aborted() {
            return Ok(());
        }
        let key = node.key();
        if self.config.excluded_resources.contains(&key) {
            log::info!("Skipping excluded resource {}", key);
            return Ok(());
        }
        // the same resource may be listed below several parents, e.g. a user
        // in more than one group, and is recorded once per parent
        let first_visit = self
            .visited
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((stack.last().cloned(), key.clone()));
        if !first_visit {
            log::debug!("Already visited {} below {:?}", key, stack.last());
            return Ok(());
        }

        self.visit(&node, &key, stack.last())?;

        let capability = self.config.capabilities.get(&node.r#type);
        let mut child_stack = stack.to_vec();
        child_stack.push(key.clone());
        for child_type in &capability.children {
            let children = match self.client.fetch_children(&node, child_type) {
                Ok(children) => children,
                Err(err) => {
                    self.on_child_error(&key, child_type, err)?;
                    continue;
                }
            };
            for child in children {
                if self.config.capabilities.is_leaf(&child.r#type) {
                    self.accept(child, &child_stack, scope)?;
                } else {
                    self.dispatch(child, child_stack.clone(), scope)?;
                }
            }
        }
        Ok(())
    }

    /// Crawls a non-leaf subtree, on the thread pool when there is one.
    fn dispatch<'s>(
        &'s self,
        node: RawResource,
        stack: Vec<String>,
        scope: Option<&rayon::Scope<'s>>,
    ) -> Result<(), CrawlError> {
        match scope {
            None => self.accept(node, &stack, None),
            Some(scope) => {
                scope.spawn(move |scope| {
                    if let Err(err) = self.accept(node, &stack, Some(scope)) {
                        self.abort(err);
                    }
                });
                Ok(())
            }
        }
    }

    fn visit(
        &self,
        node: &RawResource,
        key: &str,
        parent: Option<&String>,
    ) -> Result<(), CrawlError> {
        match self.fetch_and_write(node, key, parent) {
            Ok(record) => {
                self.progress.on_new_object(&record);
                Ok(())
            }
            Err(err) => {
                self.progress.on_error(&err);
                Err(err)
            }
        }
    }

    fn fetch_and_write(
        &self,
        node: &RawResource,
        key: &str,
        parent: Option<&String>,
    ) -> Result<CrawledResource, CrawlError> {
        let mut policies = PolicyAttachments::default();
        for kind in &self.config.capabilities.get(&node.r#type).policies {
            let policy =
                self.client
                    .fetch_policy(node, *kind)
                    .map_err(|source| CrawlError::Fetch {
                        key: key.to_owned(),
                        policy: *kind,
                        source,
                    })?;
            policies.set(*kind, policy);
        }
        let record = CrawledResource {
            key: key.to_owned(),
            r#type: node.r#type.clone(),
            parent: parent.cloned(),
            data: node.data.clone(),
            policies,
        };
        self.storage
            .write(record.clone())
            .map_err(|source| CrawlError::Write {
                key: key.to_owned(),
                source,
            })?;
        Ok(record)
    }

    fn on_child_error(
        &self,
        key: &str,
        child_type: &str,
        err: ClientError,
    ) -> Result<(), CrawlError> {
        let message = format!("Failed to list {} children of {}: {}", child_type, key, err);
        if let Err(source) = self.storage.warning(key, &message) {
            let err = CrawlError::Warning {
                key: key.to_owned(),
                source,
            };
            self.progress.on_error(&err);
            return Err(err);
        }
        self.progress.on_warning(&message);
        Ok(())
    }
}

/// Opens a storage session, crawls `root` and commits on success. A failed
/// crawl is rolled back before the error is returned. The session is closed
/// in every case.
pub fn crawl_into_storage(
    client: &dyn CloudResourceClient,
    storage: &dyn Storage,
    progress: &dyn Progresser,
    config: &CrawlerConfig,
    root: RawResource,
) -> Result<ProgressSummary, CrawlError> {
    storage.open()?;
    let result = Crawler::new(client, storage, progress, config).run(root);
    let outcome = match result {
        Ok(summary) => {
            log::info!(
                "Crawl finished: {} objects, {} warnings",
                summary.objects,
                summary.warnings
            );
            storage.commit().map(|_| summary).map_err(CrawlError::from)
        }
        Err(err) => {
            log::error!("Crawl aborted: {}", err);
            if let Err(rollback_err) = storage.rollback() {
                log::error!("Failed to roll back the aborted crawl: {}", rollback_err);
            }
            Err(err)
        }
    };
    if let Err(close_err) = storage.close() {
        log::error!("Failed to close the storage session: {}", close_err);
        if outcome.is_ok() {
            return Err(close_err.into());
        }
    }
    outcome
}
