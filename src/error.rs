use std::fmt::Display;

use thiserror::Error;

use crate::crawler::PolicyKind;
use crate::model::ModelState;

/// Malformed IAMQL text, pinned to the offending token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub lexeme: String,
    pub line: u32,
    pub col: u32,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[line {}, col {}] Error at '{}': {}",
            self.line, self.col, self.lexeme, self.message
        )
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IamqlError {
    #[error("ParseError: {0}")]
    Parse(#[from] ParseError),
    #[error("TypeError: Relation: {relation}, expected: {expected}, actual: {actual}")]
    JoinArgumentType {
        relation: String,
        expected: String,
        actual: String,
    },
    #[error("TypeError: {0}")]
    Type(String),
    #[error("Undefined join relationship `{relation}` for entity kind `{kind}`")]
    UndefinedRelationship { kind: String, relation: String },
    #[error("Undefined variable `{variable}` in query `{query}`")]
    UndefinedVariable { query: String, variable: String },
    #[error("Unknown attribute `{attribute}` for entity kind `{kind}`")]
    UnknownAttribute { kind: String, attribute: String },
    #[error("Variable `{variable}` declared twice in query `{query}`")]
    DuplicateVariable { query: String, variable: String },
    #[error("Query `{0}` defined twice")]
    DuplicateQuery(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} `{name}` already exists")]
    Duplicate { kind: &'static str, name: String },
    #[error("Member `{0}` is not a group")]
    NotAGroup(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Invalid model state transition from {from} to {to}")]
    InvalidStateTransition { from: ModelState, to: ModelState },
    #[error("Unknown model handle `{0}`")]
    UnknownModel(String),
    #[error("Grant not found: ({member}, {resource}, {target})")]
    GrantNotFound {
        member: String,
        resource: String,
        target: String,
    },
    #[error("No roles covering requested permission set")]
    NoCoveringRoles,
}

impl ModelError {
    pub(crate) fn not_found(kind: &'static str, name: &str) -> Self {
        ModelError::NotFound {
            kind,
            name: name.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("API request failed: {0}")]
    Api(String),
    #[error("Resource `{0}` is unknown to the client")]
    UnknownResource(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("No storage session is open")]
    NoSession,
    #[error("A storage session is already open")]
    SessionAlreadyOpen,
    #[error("Storage lock poisoned")]
    Poisoned,
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrawlError {
    #[error("Failed to fetch {policy} policy of resource `{key}`: {source}")]
    Fetch {
        key: String,
        policy: PolicyKind,
        #[source]
        source: ClientError,
    },
    #[error("Failed to write resource `{key}`: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("Failed to record a warning for resource `{key}`: {source}")]
    Warning {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("Storage failure while crawling: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to start crawler thread pool: {0}")]
    ThreadPool(String),
}

impl CrawlError {
    /// Key of the resource whose visit failed, if the failure is tied to one.
    pub fn resource_key(&self) -> Option<&str> {
        match self {
            CrawlError::Fetch { key, .. }
            | CrawlError::Write { key, .. }
            | CrawlError::Warning { key, .. } => Some(key),
            CrawlError::Storage(_) | CrawlError::ThreadPool(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
