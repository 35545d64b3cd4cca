use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::offline::{OfflineQueue, PendingReport};
use crate::{AppError, MAX_DESCRIPTION_LENGTH, MAX_PURPOSE_LENGTH, SEEN_NOTIFICATION_CAP};

/// Generates a string-backed id type. Ids arrive from the shell or the remote
/// store as opaque strings; the wrapper keeps them from being mixed up.
macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(UserId);
typed_id!(ReportId);
typed_id!(NotificationId);
typed_id!(ClearanceId);
typed_id!(
    /// Temporary id for a report that only exists locally.
    LocalOpId
);

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub const fn saturating_elapsed_since(self, earlier: UnixTimeMs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub const fn offset(self, millis: u64) -> UnixTimeMs {
        UnixTimeMs(self.0.saturating_add(millis))
    }
}

// --- coordinates ---

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("coordinate is not a finite number")]
    NonFinite,
    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// Validated lat/lon pair.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    lat: f64,
    lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[must_use]
    pub fn lon(&self) -> f64 {
        self.lon
    }
}

// --- bounded text ---

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TextError {
    #[error("text is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },
}

/// Text whose byte length is capped at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoundedText<const MAX: usize>(String);

impl<const MAX: usize> BoundedText<MAX> {
    pub fn new(text: impl Into<String>) -> Result<Self, TextError> {
        let text = text.into();
        if text.len() > MAX {
            return Err(TextError::TooLong {
                len: text.len(),
                max: MAX,
            });
        }
        Ok(Self(text))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<const MAX: usize> TryFrom<String> for BoundedText<MAX> {
    type Error = TextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const MAX: usize> From<BoundedText<MAX>> for String {
    fn from(value: BoundedText<MAX>) -> Self {
        value.0
    }
}

pub type Description = BoundedText<MAX_DESCRIPTION_LENGTH>;
pub type Purpose = BoundedText<MAX_PURPOSE_LENGTH>;

// --- roles & profiles ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Resident,
    Responder,
    Admin,
}

impl Role {
    /// Top-level collection that holds this role's notification subtrees,
    /// i.e. the `{role}` segment of `{role}/{id}/notifications/{id}`.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Role::Resident => "users",
            Role::Responder => "responders",
            Role::Admin => "admins",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub active_request: Option<ReportId>,
}

impl UserProfile {
    /// Required contact fields all present. Only complete responder profiles
    /// receive report notifications.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.full_name.trim().is_empty()
            && !self.phone.trim().is_empty()
            && !self.address.trim().is_empty()
    }

    #[must_use]
    pub fn has_active_request(&self) -> bool {
        self.active_request.is_some()
    }
}

// --- emergency reports ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Fire,
    Flood,
    Medical,
    Crime,
    Accident,
    Other,
}

impl ReportKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ReportKind::Fire => "fire",
            ReportKind::Flood => "flood",
            ReportKind::Medical => "medical",
            ReportKind::Crime => "crime",
            ReportKind::Accident => "accident",
            ReportKind::Other => "other",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ReportKind::Fire => "Fire",
            ReportKind::Flood => "Flood",
            ReportKind::Medical => "Medical emergency",
            ReportKind::Crime => "Crime",
            ReportKind::Accident => "Accident",
            ReportKind::Other => "Other emergency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: ReportStatus,
    pub to: ReportStatus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStatus {
    AwaitingResponse,
    OnGoing,
    Resolved,
    Expired,
}

impl ReportStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ReportStatus::AwaitingResponse => "awaiting-response",
            ReportStatus::OnGoing => "on-going",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Expired => "expired",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "awaiting-response" | "awaiting_response" | "awaiting" => {
                Some(ReportStatus::AwaitingResponse)
            }
            "on-going" | "on_going" | "ongoing" => Some(ReportStatus::OnGoing),
            "resolved" | "completed" => Some(ReportStatus::Resolved),
            "expired" => Some(ReportStatus::Expired),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ReportStatus::AwaitingResponse => "Awaiting response",
            ReportStatus::OnGoing => "Responder on the way",
            ReportStatus::Resolved => "Resolved",
            ReportStatus::Expired => "Expired",
        }
    }

    /// Position in the forward-only ordering.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            ReportStatus::AwaitingResponse => 0,
            ReportStatus::OnGoing => 1,
            ReportStatus::Resolved => 2,
            ReportStatus::Expired => 3,
        }
    }

    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::AwaitingResponse => vec![Self::OnGoing, Self::Resolved, Self::Expired],
            Self::OnGoing => vec![Self::Resolved],
            Self::Resolved | Self::Expired => vec![],
        }
    }

    pub fn validate_transition(self, to: Self) -> Result<(), TransitionError> {
        // The allow-list is authoritative; the rank check keeps any future
        // edit from re-introducing a backward edge.
        if to.rank() > self.rank() && self.valid_transitions().contains(&to) {
            Ok(())
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Expired)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    pub id: ReportId,
    pub reporter: UserId,
    #[serde(default)]
    pub reporter_name: String,
    pub kind: ReportKind,
    #[serde(default)]
    pub description: String,
    /// Empty when no media was attached or the upload failed.
    #[serde(default)]
    pub media_url: String,
    pub location: LatLon,
    #[serde(default)]
    pub address: Option<String>,
    pub status: ReportStatus,
    pub created_at: UnixTimeMs,
    pub expires_at: UnixTimeMs,
    #[serde(default)]
    pub responder: Option<UserId>,
    #[serde(default)]
    pub responder_location: Option<LatLon>,
}

impl EmergencyReport {
    /// Applies a status coming from a remote snapshot. Backward moves are
    /// rejected so a stale snapshot cannot regress the report.
    pub fn apply_remote_status(&mut self, status: ReportStatus) -> Result<(), TransitionError> {
        if status == self.status {
            return Ok(());
        }
        self.status.validate_transition(status)?;
        self.status = status;
        Ok(())
    }
}

// Redact debug output because this carries user-provided content.
impl fmt::Debug for EmergencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmergencyReport")
            .field("id", &self.id)
            .field("reporter", &self.reporter)
            .field("kind", &self.kind)
            .field("description_present", &!self.description.is_empty())
            .field("media_present", &!self.media_url.is_empty())
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .finish()
    }
}

// --- notifications ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Emergency,
    Clearance,
    Announcement,
    #[default]
    System,
}

impl NotificationCategory {
    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            NotificationCategory::Emergency => "siren",
            NotificationCategory::Clearance => "file-text",
            NotificationCategory::Announcement => "megaphone",
            NotificationCategory::System => "bell",
        }
    }
}

/// Immutable once created, except for the seen flag, which is only ever
/// flipped through a partial update of that single field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub seen: bool,
    pub timestamp: UnixTimeMs,
    #[serde(default)]
    pub category: NotificationCategory,
}

impl Notification {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        category: NotificationCategory,
        at: UnixTimeMs,
    ) -> Self {
        Self {
            id: NotificationId::new(uuid::Uuid::new_v4().to_string()),
            title: title.into(),
            message: message.into(),
            seen: false,
            timestamp: at,
            category,
        }
    }
}

// --- reference data ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotline {
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub posted_at: UnixTimeMs,
    #[serde(default)]
    pub author: Option<String>,
}

// --- barangay clearance requests ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClearanceKind {
    BarangayClearance,
    CertificateOfResidency,
    CertificateOfIndigency,
}

impl ClearanceKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ClearanceKind::BarangayClearance => "Barangay clearance",
            ClearanceKind::CertificateOfResidency => "Certificate of residency",
            ClearanceKind::CertificateOfIndigency => "Certificate of indigency",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearanceStatus {
    Pending,
    Processing,
    Ready,
    Released,
    Rejected,
}

impl ClearanceStatus {
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            ClearanceStatus::Pending => 0,
            ClearanceStatus::Processing => 1,
            ClearanceStatus::Ready => 2,
            ClearanceStatus::Released => 3,
            ClearanceStatus::Rejected => 4,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ClearanceStatus::Released | ClearanceStatus::Rejected)
    }

    /// Remote snapshots may only move a request forward.
    #[must_use]
    pub fn accepts_remote(self, next: Self) -> bool {
        next == self || (!self.is_terminal() && next.rank() > self.rank())
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ClearanceStatus::Pending => "Pending",
            ClearanceStatus::Processing => "Processing",
            ClearanceStatus::Ready => "Ready for pickup",
            ClearanceStatus::Released => "Released",
            ClearanceStatus::Rejected => "Rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearanceRequest {
    pub id: ClearanceId,
    pub requester: UserId,
    pub kind: ClearanceKind,
    #[serde(default)]
    pub purpose: String,
    pub status: ClearanceStatus,
    pub requested_at: UnixTimeMs,
}

// --- toasts ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToastKind {
    Success,
    Error,
    Warning,
    Info,
}

impl ToastKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            ToastKind::Success | ToastKind::Info => 3_000,
            ToastKind::Warning => 5_000,
            ToastKind::Error => 8_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToastMessage {
    pub text: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(text: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            text: text.into(),
            kind,
            duration_ms: kind.default_duration_ms(),
        }
    }
}

// --- in-flight submission bookkeeping ---

/// Where a running submission came from. A replay carries the pending
/// report so it can go back into the queue on remote failure; a fresh
/// submission surfaces the error instead.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionOrigin {
    Fresh,
    Replay(PendingReport),
}

#[derive(Clone, Debug)]
pub struct InFlightSubmission {
    pub report: EmergencyReport,
    pub origin: SubmissionOrigin,
}

// --- the model ---

pub struct Model {
    pub user_id: Option<UserId>,
    pub current_user: Option<UserProfile>,

    /// Last observed reachability; `None` until the watch stream first fires.
    pub network_online: Option<bool>,

    pub queue: OfflineQueue,
    pub submission: Option<InFlightSubmission>,
    pub clearance_in_flight: Option<ClearanceRequest>,

    pub active_report: Option<EmergencyReport>,
    /// Report id currently under a store subscription, to keep a second
    /// subscription from piling onto the same document.
    pub watched_report: Option<ReportId>,
    /// Most recent report seen reaching a terminal status. Its subscription
    /// cannot be torn down, so snapshots naming it still arrive and must be
    /// treated as stale echoes.
    pub closed_report: Option<ReportId>,
    pub inbox_subscribed: bool,

    pub notifications: Vec<Notification>,
    /// Ids already surfaced as a toast, so repeated inbox snapshots don't
    /// re-announce old notifications. Bounded.
    pub toasted_notifications: LruCache<NotificationId, ()>,

    pub users: Vec<UserProfile>,
    pub admins: Vec<UserProfile>,
    pub hotlines: Vec<Hotline>,
    pub announcements: Vec<Announcement>,
    pub clearance_requests: Vec<ClearanceRequest>,

    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
}

impl Model {
    #[must_use]
    pub fn new() -> Self {
        let cap = NonZeroUsize::new(SEEN_NOTIFICATION_CAP).unwrap_or(NonZeroUsize::MIN);
        Self {
            user_id: None,
            current_user: None,
            network_online: None,
            queue: OfflineQueue::new(),
            submission: None,
            clearance_in_flight: None,
            active_report: None,
            watched_report: None,
            closed_report: None,
            inbox_subscribed: false,
            notifications: Vec::new(),
            toasted_notifications: LruCache::new(cap),
            users: Vec::new(),
            admins: Vec::new(),
            hotlines: Vec::new(),
            announcements: Vec::new(),
            clearance_requests: Vec::new(),
            active_error: None,
            active_toast: None,
        }
    }

    #[must_use]
    pub fn signed_in(&self) -> bool {
        self.user_id.is_some()
    }

    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.submission.is_some()
    }

    pub fn show_toast(&mut self, text: impl Into<String>, kind: ToastKind) {
        self.active_toast = Some(ToastMessage::new(text, kind));
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    /// Responders eligible for report notifications.
    #[must_use]
    pub fn notifiable_responders(&self) -> Vec<&UserProfile> {
        self.users
            .iter()
            .filter(|u| u.role == Role::Responder && u.is_complete())
            .collect()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}
