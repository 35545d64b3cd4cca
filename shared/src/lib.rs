//! Shared core for the barangay emergency reporting app.
//!
//! Everything that matters lives here: report submission, the offline
//! pending report, the device cache, notifications and directories. The
//! iOS, Android and Web shells drive the core with events and execute the
//! effects it requests; they hold no domain logic of their own.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod event;
pub mod media;
pub mod model;
pub mod offline;
pub mod view;

use chrono::DateTime;

use crate::model::{ReportId, UnixTimeMs};

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use event::Event;
pub use model::Model;
pub use view::ViewModel;

/// How long a report stashed offline stays eligible for replay.
pub const OFFLINE_REPORT_EXPIRY_MS: u64 = 30 * 60 * 1000;
/// How long a submitted report stays active before the backend expires it.
pub const REPORT_ACTIVE_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;
pub const MAX_DESCRIPTION_LENGTH: usize = 2_000;
pub const MAX_PURPOSE_LENGTH: usize = 500;
pub const MAX_CACHE_VALUE_BYTES: usize = 1024 * 1024;
pub const SEEN_NOTIFICATION_CAP: usize = 256;
pub const REPORT_ID_PREFIX: &str = "SOS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Storage,
    Data,
    Media,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Storage => "STORAGE_ERROR",
            Self::Data => "DATA_ERROR",
            Self::Media => "MEDIA_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Storage => ErrorSeverity::Transient,
            Self::Data | Self::InvalidState | Self::Internal => ErrorSeverity::Fatal,
            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::Media
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Storage)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    /// Message shown in the UI. Every code maps to a fixed phrasing;
    /// validation errors carry their own field-specific text through.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => {
                "You don't have permission to perform this action.".into()
            }
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Storage => {
                "Unable to save data on this device. Please free up some storage space.".into()
            }
            ErrorKind::Data => "A data error occurred. Please contact support if this persists.".into(),
            ErrorKind::Media => {
                "The attached photo or video could not be processed. Please try a different one."
                    .into()
            }
            ErrorKind::InvalidState => {
                "The app is in an invalid state. Please restart the app.".into()
            }
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<model::CoordinateError> for AppError {
    fn from(e: model::CoordinateError) -> Self {
        AppError::validation(e.to_string())
    }
}

impl From<model::TextError> for AppError {
    fn from(e: model::TextError) -> Self {
        AppError::validation(e.to_string())
    }
}

impl From<capabilities::StoreError> for AppError {
    fn from(e: capabilities::StoreError) -> Self {
        use capabilities::StoreError;
        let kind = match &e {
            StoreError::Unauthenticated => ErrorKind::Authentication,
            StoreError::PermissionDenied { .. } => ErrorKind::Authorization,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Unavailable { .. } => ErrorKind::Network,
            StoreError::Decode { .. } => ErrorKind::Data,
            StoreError::InvalidPath(_) | StoreError::Internal { .. } => ErrorKind::Internal,
        };
        AppError::new(kind, e.to_string()).with_internal(e.code())
    }
}

impl From<capabilities::CacheError> for AppError {
    fn from(e: capabilities::CacheError) -> Self {
        AppError::new(ErrorKind::Storage, e.to_string())
    }
}

impl From<capabilities::BlobError> for AppError {
    fn from(e: capabilities::BlobError) -> Self {
        use capabilities::BlobError;
        let kind = match &e {
            BlobError::Network { .. } => ErrorKind::Network,
            BlobError::Rejected { .. } => ErrorKind::Authorization,
            BlobError::Cancelled | BlobError::Internal { .. } => ErrorKind::Unknown,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<media::MediaError> for AppError {
    fn from(e: media::MediaError) -> Self {
        AppError::new(ErrorKind::Media, e.to_string())
    }
}

/// Builds a fresh report id: `SOS-20250107-174502-0042`. Date and time of
/// creation, then a random suffix to keep same-second ids distinct.
#[must_use]
pub fn generate_report_id(now: UnixTimeMs) -> ReportId {
    compose_report_id(now, rand::random::<u16>() % 10_000)
}

fn compose_report_id(now: UnixTimeMs, suffix: u16) -> ReportId {
    let stamp = i64::try_from(now.0)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|| "00000000-000000".to_string());
    ReportId::new(format!("{REPORT_ID_PREFIX}-{stamp}-{suffix:04}"))
}
