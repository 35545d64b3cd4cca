//! Document store capability.
//!
//! The core owns every read, write and subscription against the remote
//! document store; the shell only moves bytes. Paths are validated before
//! they ever reach an operation, so the shell never sees a malformed or
//! relative path.

use std::collections::BTreeMap;
use std::fmt;

use crux_core::capability::{CapabilityContext, Operation};
use crux_core::macros::Capability;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_PATH_LENGTH: usize = 256;
pub const MAX_PATH_DEPTH: usize = 6;

/// Slash-separated document path, e.g. `users/u1/emergencyHistory/SOS-1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self(path))
    }

    pub fn from_segments(segments: &[&str]) -> Result<Self, StoreError> {
        Self::new(segments.join("/"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the second segment names the given owner, the shape every
    /// per-user document shares (`users/{id}`, `users/{id}/notifications`,
    /// `admins/{id}/...`).
    #[must_use]
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.0.split('/').nth(1) == Some(owner_id)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocPath> for String {
    fn from(value: DocPath) -> Self {
        value.0
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("path is empty".into()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(StoreError::InvalidPath(format!(
            "path is {} bytes, maximum is {MAX_PATH_LENGTH}",
            path.len()
        )));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(StoreError::InvalidPath(
            "path has a leading or trailing separator".into(),
        ));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > MAX_PATH_DEPTH {
        return Err(StoreError::InvalidPath(format!(
            "path has {} segments, maximum is {MAX_PATH_DEPTH}",
            segments.len()
        )));
    }
    for segment in segments {
        if segment.is_empty() {
            return Err(StoreError::InvalidPath("path has an empty segment".into()));
        }
        if segment == "." || segment == ".." {
            return Err(StoreError::InvalidPath(
                "path has a relative segment".into(),
            ));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(StoreError::InvalidPath(format!(
                "segment {segment:?} has unsupported characters"
            )));
        }
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "op", content = "data")]
pub enum StoreOperation {
    Get {
        path: DocPath,
    },
    Set {
        path: DocPath,
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },
    /// Shallow field merge into an existing document.
    Merge {
        path: DocPath,
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },
    Delete {
        path: DocPath,
    },
    /// Long-lived watch; the shell resolves this repeatedly, once per
    /// remote snapshot.
    Subscribe {
        path: DocPath,
    },
}

impl Operation for StoreOperation {
    type Output = StoreResult;
}

pub type StoreResult = Result<StoreOutput, StoreError>;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "type", content = "data")]
pub enum StoreOutput {
    Document(DocumentSnapshot),
    Ack { path: DocPath },
}

/// One state of a document or subtree. `body` is the raw JSON encoding, or
/// `None` when nothing exists at the path.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct DocumentSnapshot {
    pub path: DocPath,
    #[serde(with = "serde_bytes", default)]
    pub body: Option<Vec<u8>>,
}

impl DocumentSnapshot {
    #[must_use]
    pub fn exists(&self) -> bool {
        self.body.is_some()
    }

    /// Decodes the body as a single document. `Ok(None)` when the document
    /// is absent.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match &self.body {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| StoreError::Decode {
                    reason: e.to_string(),
                }),
        }
    }

    /// Decodes a subtree keyed by child id into its values, in key order.
    /// An absent subtree decodes to an empty list.
    pub fn decode_collection<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        match &self.body {
            None => Ok(Vec::new()),
            Some(bytes) => {
                let map: BTreeMap<String, T> =
                    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
                        reason: e.to_string(),
                    })?;
                Ok(map.into_values().collect())
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Error)]
pub enum StoreError {
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    #[error("not signed in")]
    Unauthenticated,

    #[error("permission denied at {path}")]
    PermissionDenied { path: String },

    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("decode failed: {reason}")]
    Decode { reason: String },

    #[error("store failure: {message}")]
    Internal { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidPath(_) => "INVALID_PATH",
            StoreError::Unauthenticated => "UNAUTHENTICATED",
            StoreError::PermissionDenied { .. } => "PERMISSION_DENIED",
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::Unavailable { .. } => "UNAVAILABLE",
            StoreError::Decode { .. } => "DECODE_FAILED",
            StoreError::Internal { .. } => "STORE_INTERNAL",
        }
    }

    /// Transient failures worth retrying; everything else needs a code or
    /// data change first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

#[derive(Capability)]
pub struct Store<Ev> {
    context: CapabilityContext<StoreOperation, Ev>,
}

impl<Ev> Store<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<StoreOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn get<F>(&self, path: DocPath, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run_once(StoreOperation::Get { path }, make_event);
    }

    pub fn set<F>(&self, path: DocPath, body: Vec<u8>, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run_once(StoreOperation::Set { path, body }, make_event);
    }

    pub fn merge<F>(&self, path: DocPath, body: Vec<u8>, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run_once(StoreOperation::Merge { path, body }, make_event);
    }

    pub fn delete<F>(&self, path: DocPath, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run_once(StoreOperation::Delete { path }, make_event);
    }

    /// Watches a path; `make_event` fires once per snapshot, for as long as
    /// the shell keeps the watch alive.
    pub fn subscribe<F>(&self, path: DocPath, make_event: F)
    where
        F: Fn(StoreResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let mut snapshots = ctx.stream_from_shell(StoreOperation::Subscribe { path });
            while let Some(response) = snapshots.next().await {
                ctx.update_app(make_event(response));
            }
        });
    }

    fn run_once<F>(&self, operation: StoreOperation, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let response = ctx.request_from_shell(operation).await;
            ctx.update_app(make_event(response));
        });
    }
}
