use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::{PolicyKind, RawPolicy};
use crate::error::StorageError;

/// Policies attached to a crawled resource. Kinds that do not apply to the
/// resource type stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyAttachments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iam: Option<RawPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcs: Option<RawPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<RawPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudsql: Option<RawPolicy>,
}

impl PolicyAttachments {
    pub fn get(&self, kind: PolicyKind) -> Option<&RawPolicy> {
        match kind {
            PolicyKind::Iam => self.iam.as_ref(),
            PolicyKind::Gcs => self.gcs.as_ref(),
            PolicyKind::Dataset => self.dataset.as_ref(),
            PolicyKind::Cloudsql => self.cloudsql.as_ref(),
        }
    }

    pub fn set(&mut self, kind: PolicyKind, policy: Option<RawPolicy>) {
        match kind {
            PolicyKind::Iam => self.iam = policy,
            PolicyKind::Gcs => self.gcs = policy,
            PolicyKind::Dataset => self.dataset = policy,
            PolicyKind::Cloudsql => self.cloudsql = policy,
        }
    }
}

/// The record written for every visited resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledResource {
    pub key: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub parent: Option<String>,
    pub data: serde_json::Value,
    pub policies: PolicyAttachments,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredWarning {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Only these resource types; all types when empty.
    pub types: Vec<String>,
    /// Only records carrying an IAM policy.
    pub with_iam_policy: bool,
}

impl RecordFilter {
    pub fn types(types: &[&str]) -> Self {
        Self {
            types: types.iter().map(|t| (*t).to_owned()).collect(),
            with_iam_policy: false,
        }
    }

    fn matches(&self, record: &CrawledResource) -> bool {
        (self.types.is_empty() || self.types.contains(&record.r#type))
            && (!self.with_iam_policy || record.policies.iam.is_some())
    }
}

pub type SessionHandle = u64;

/// Persistence for crawled resources. Implementations serialize concurrent
/// writes themselves.
pub trait Storage: Send + Sync {
    fn open(&self) -> Result<SessionHandle, StorageError>;
    fn write(&self, record: CrawledResource) -> Result<(), StorageError>;
    fn warning(&self, key: &str, message: &str) -> Result<(), StorageError>;
    fn commit(&self) -> Result<(), StorageError>;
    fn rollback(&self) -> Result<(), StorageError>;
    fn close(&self) -> Result<(), StorageError>;
    /// Committed records in write order.
    fn iterate(
        &self,
        filter: RecordFilter,
    ) -> Result<Box<dyn Iterator<Item = CrawledResource> + '_>, StorageError>;
}

#[derive(Debug, Default)]
struct InnerState {
    session: Option<SessionHandle>,
    sessions_opened: u64,
    pending: Vec<CrawledResource>,
    pending_warnings: Vec<StoredWarning>,
    records: Vec<CrawledResource>,
    warnings: Vec<StoredWarning>,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: Mutex<InnerState>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InnerState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }

    fn session(&self) -> Result<MutexGuard<'_, InnerState>, StorageError> {
        let state = self.lock()?;
        if state.session.is_none() {
            return Err(StorageError::NoSession);
        }
        Ok(state)
    }

    /// Committed warnings.
    pub fn warnings(&self) -> Result<Vec<StoredWarning>, StorageError> {
        Ok(self.lock()?.warnings.clone())
    }

    /// Keys written in the open session that are not committed yet.
    pub fn pending_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.pending.iter().map(|r| r.key.clone()).collect())
    }
}

impl Storage for InMemoryStorage {
    fn open(&self) -> Result<SessionHandle, StorageError> {
        let mut state = self.lock()?;
        if state.session.is_some() {
            return Err(StorageError::SessionAlreadyOpen);
        }
        state.sessions_opened += 1;
        let handle = state.sessions_opened;
        state.session = Some(handle);
        log::debug!("Opened storage session {}", handle);
        Ok(handle)
    }

    fn write(&self, record: CrawledResource) -> Result<(), StorageError> {
        self.session()?.pending.push(record);
        Ok(())
    }

    fn warning(&self, key: &str, message: &str) -> Result<(), StorageError> {
        self.session()?.pending_warnings.push(StoredWarning {
            key: key.to_owned(),
            message: message.to_owned(),
        });
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut state = self.session()?;
        let pending = std::mem::take(&mut state.pending);
        let pending_warnings = std::mem::take(&mut state.pending_warnings);
        log::debug!(
            "Committing {} records and {} warnings",
            pending.len(),
            pending_warnings.len()
        );
        state.records.extend(pending);
        state.warnings.extend(pending_warnings);
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let mut state = self.session()?;
        log::debug!("Rolling back {} records", state.pending.len());
        state.pending.clear();
        state.pending_warnings.clear();
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut state = self.session()?;
        state.pending.clear();
        state.pending_warnings.clear();
        state.session = None;
        Ok(())
    }

    fn iterate(
        &self,
        filter: RecordFilter,
    ) -> Result<Box<dyn Iterator<Item = CrawledResource> + '_>, StorageError> {
        // fail early on a poisoned lock, the iterator itself recovers
        drop(self.lock()?);
        Ok(Box::new(RecordIter {
            storage: self,
            position: 0,
            filter,
        }))
    }
}

/// Lazily walks committed records, taking the lock once per step.
struct RecordIter<'a> {
    storage: &'a InMemoryStorage,
    position: usize,
    filter: RecordFilter,
}

impl Iterator for RecordIter<'_> {
    type Item = CrawledResource;

    fn next(&mut self) -> Option<Self::Item> {
        let state = self
            .storage
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while self.position < state.records.len() {
            let record = &state.records[self.position];
            self.position += 1;
            if self.filter.matches(record) {
                return Some(record.clone());
            }
        }
        None
    }
}
