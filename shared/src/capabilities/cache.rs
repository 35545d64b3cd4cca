//! Device cache capability.
//!
//! A small, closed set of keys backed by whatever durable key-value storage
//! the shell provides. Everything is loaded in one shot at startup; writes
//! and removals are fire-mostly-forget, with failures logged rather than
//! surfaced.

use std::fmt;

use crux_core::capability::{CapabilityContext, Operation};
use crux_core::macros::Capability;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every key the app ever caches. The set is closed so a typo'd key cannot
/// silently create a new storage slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheKey {
    OfflineRequest,
    CurrentUser,
    Users,
    Hotlines,
    Announcement,
    Admins,
    ActiveRequestData,
}

impl CacheKey {
    pub const ALL: [CacheKey; 7] = [
        CacheKey::OfflineRequest,
        CacheKey::CurrentUser,
        CacheKey::Users,
        CacheKey::Hotlines,
        CacheKey::Announcement,
        CacheKey::Admins,
        CacheKey::ActiveRequestData,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheKey::OfflineRequest => "offlineRequest",
            CacheKey::CurrentUser => "currentUser",
            CacheKey::Users => "users",
            CacheKey::Hotlines => "hotlines",
            CacheKey::Announcement => "announcement",
            CacheKey::Admins => "admins",
            CacheKey::ActiveRequestData => "activeRequestData",
        }
    }

    #[must_use]
    pub fn from_str(key: &str) -> Option<Self> {
        CacheKey::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// Keys tied to the signed-in user, cleared on sign-out.
    #[must_use]
    pub const fn is_session_scoped(self) -> bool {
        matches!(
            self,
            CacheKey::OfflineRequest | CacheKey::CurrentUser | CacheKey::ActiveRequestData
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "op", content = "data")]
pub enum CacheOperation {
    /// Reads every stored key at once. Done once, at process start.
    LoadAll,
    Write {
        key: CacheKey,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Remove {
        key: CacheKey,
    },
}

impl Operation for CacheOperation {
    type Output = CacheResult;
}

pub type CacheResult = Result<CacheOutput, CacheError>;

/// One stored key. The key side is a plain string so an entry written by a
/// newer build never poisons the whole load; unknown keys are skipped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CacheEntry {
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "type", content = "data")]
pub enum CacheOutput {
    Loaded { entries: Vec<CacheEntry> },
    Written { key: CacheKey },
    Removed { key: CacheKey },
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Error)]
pub enum CacheError {
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("storage read failed: {message}")]
    ReadFailed { message: String },

    #[error("storage write failed: {message}")]
    WriteFailed { message: String },
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

#[derive(Capability)]
pub struct Cache<Ev> {
    context: CapabilityContext<CacheOperation, Ev>,
}

impl<Ev> Cache<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<CacheOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn load_all<F>(&self, make_event: F)
    where
        F: FnOnce(CacheResult) -> Ev + Send + 'static,
    {
        self.run(CacheOperation::LoadAll, make_event);
    }

    pub fn write<F>(&self, key: CacheKey, value: Vec<u8>, make_event: F)
    where
        F: FnOnce(CacheResult) -> Ev + Send + 'static,
    {
        self.run(CacheOperation::Write { key, value }, make_event);
    }

    pub fn remove<F>(&self, key: CacheKey, make_event: F)
    where
        F: FnOnce(CacheResult) -> Ev + Send + 'static,
    {
        self.run(CacheOperation::Remove { key }, make_event);
    }

    fn run<F>(&self, operation: CacheOperation, make_event: F)
    where
        F: FnOnce(CacheResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let response = ctx.request_from_shell(operation).await;
            ctx.update_app(make_event(response));
        });
    }
}
