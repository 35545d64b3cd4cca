use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capabilities::{BlobResult, CacheKey, CacheResult, ConnectivityStatus, StoreResult};
use crate::media::MediaAttachment;
use crate::model::{ClearanceKind, NotificationId, ReportKind, UserId};

/// A report as captured by the UI, before any validation.
///
/// Coordinates stay raw here; they become a validated location in the
/// update loop so a missing or garbage fix surfaces as a field error.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub kind: ReportKind,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub media: Option<MediaAttachment>,
}

impl fmt::Debug for ReportDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportDraft")
            .field("kind", &self.kind)
            .field("description_present", &!self.description.is_empty())
            .field(
                "has_location",
                &(self.latitude.is_some() && self.longitude.is_some()),
            )
            .field("media", &self.media)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceDraft {
    pub kind: ClearanceKind,
    pub purpose: String,
}

/// Best-effort follow-up writes after a report lands in the global
/// collection. Their failures are logged, never surfaced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffectTask {
    HistoryWrite,
    ActivePointer,
    NotifyAdmin(UserId),
    NotifyReporter,
    NotifyResponder(UserId),
    ClearanceHistory,
    ClearanceNotice(UserId),
}

impl SideEffectTask {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            SideEffectTask::HistoryWrite => "history_write",
            SideEffectTask::ActivePointer => "active_pointer",
            SideEffectTask::NotifyAdmin(_) => "notify_admin",
            SideEffectTask::NotifyReporter => "notify_reporter",
            SideEffectTask::NotifyResponder(_) => "notify_responder",
            SideEffectTask::ClearanceHistory => "clearance_history",
            SideEffectTask::ClearanceNotice(_) => "clearance_notice",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// First event after the core comes up; kicks off the cache load and
    /// the connectivity watch.
    Start,
    CacheLoaded(CacheResult),
    CacheWritten {
        key: CacheKey,
        result: CacheResult,
    },

    ConnectivityChanged(ConnectivityStatus),

    SignedIn {
        user_id: UserId,
    },
    SignedOut,
    SaveProfile(Box<ProfileDraft>),
    ProfileWritten(StoreResult),

    CurrentUserSnapshot(StoreResult),
    UsersSnapshot(StoreResult),
    AdminsSnapshot(StoreResult),
    HotlinesSnapshot(StoreResult),
    AnnouncementsSnapshot(StoreResult),
    NotificationsSnapshot(StoreResult),
    ActiveReportSnapshot(StoreResult),
    ClearanceSnapshot(StoreResult),

    SubmitReport {
        draft: Box<ReportDraft>,
        now_ms: u64,
    },
    /// Manual replay nudge, e.g. pull-to-refresh on the report screen.
    RetryPending {
        now_ms: u64,
    },
    MediaUploaded(BlobResult),
    ReportPersisted(StoreResult),
    SideEffectDone {
        task: SideEffectTask,
        result: StoreResult,
    },

    MarkNotificationSeen(NotificationId),
    NotificationSeenWritten {
        id: NotificationId,
        result: StoreResult,
    },

    SubmitClearance {
        draft: Box<ClearanceDraft>,
        now_ms: u64,
    },
    ClearancePersisted(StoreResult),

    DismissToast,
    DismissError,
}
