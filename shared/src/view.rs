//! View model construction. Everything here is a pure projection of the
//! model; shells render it verbatim and never compute domain state.

use serde::Serialize;

use crate::model::{
    Announcement, ClearanceRequest, EmergencyReport, Hotline, LatLon, Model, Notification,
    ToastKind, ToastMessage, UnixTimeMs,
};
use crate::{AppError, OFFLINE_REPORT_EXPIRY_MS};

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ViewModel {
    pub signed_in: bool,
    pub profile_complete: bool,
    pub user_name: String,
    pub online: bool,
    pub submitting: bool,
    pub active_report: Option<ActiveReportView>,
    pub pending_report: Option<PendingReportView>,
    pub notifications: Vec<NotificationView>,
    pub unseen_count: usize,
    pub hotlines: Vec<HotlineView>,
    pub announcements: Vec<AnnouncementView>,
    pub clearances: Vec<ClearanceView>,
    pub toast: Option<ToastView>,
    pub error: Option<ErrorView>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ActiveReportView {
    pub id: String,
    pub kind_label: String,
    pub status: String,
    pub status_label: String,
    pub created_label: String,
    pub responder_assigned: bool,
    pub responder_distance: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PendingReportView {
    pub kind_label: String,
    pub enqueued_at_ms: u64,
    pub replay_deadline_ms: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NotificationView {
    pub id: String,
    pub title: String,
    pub message: String,
    pub seen: bool,
    pub time_label: String,
    pub icon: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct HotlineView {
    pub name: String,
    pub number: String,
    pub category: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AnnouncementView {
    pub id: String,
    pub title: String,
    pub body: String,
    pub date_label: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ClearanceView {
    pub id: String,
    pub kind_label: String,
    pub status_label: String,
    pub requested_label: String,
    pub closed: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ToastView {
    pub text: String,
    pub kind: String,
    pub duration_ms: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ErrorView {
    pub code: String,
    pub message: String,
    pub detail: String,
}

pub(crate) fn build(model: &Model) -> ViewModel {
    let mut notifications: Vec<&Notification> = model.notifications.iter().collect();
    notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut announcements: Vec<&Announcement> = model.announcements.iter().collect();
    announcements.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));

    ViewModel {
        signed_in: model.signed_in(),
        profile_complete: model
            .current_user
            .as_ref()
            .is_some_and(|u| u.is_complete()),
        user_name: model
            .current_user
            .as_ref()
            .map(|u| u.full_name.clone())
            .unwrap_or_default(),
        online: model.network_online.unwrap_or(false),
        submitting: model.is_submitting(),
        active_report: model.active_report.as_ref().map(build_active_report),
        pending_report: model.queue.peek().map(|p| PendingReportView {
            kind_label: p.kind.label().to_string(),
            enqueued_at_ms: p.enqueued_at.0,
            replay_deadline_ms: p.enqueued_at.offset(OFFLINE_REPORT_EXPIRY_MS).0,
        }),
        unseen_count: model.notifications.iter().filter(|n| !n.seen).count(),
        notifications: notifications.into_iter().map(build_notification).collect(),
        hotlines: model.hotlines.iter().map(build_hotline).collect(),
        announcements: announcements.into_iter().map(build_announcement).collect(),
        clearances: model.clearance_requests.iter().map(build_clearance).collect(),
        toast: model.active_toast.as_ref().map(build_toast),
        error: model.active_error.as_ref().map(build_error),
    }
}

fn build_active_report(report: &EmergencyReport) -> ActiveReportView {
    let responder_distance = report
        .responder_location
        .map(|loc| format_distance(haversine_km(loc, report.location)));
    ActiveReportView {
        id: report.id.to_string(),
        kind_label: report.kind.label().to_string(),
        status: report.status.as_str().to_string(),
        status_label: report.status.label().to_string(),
        created_label: format_timestamp(report.created_at),
        responder_assigned: report.responder.is_some(),
        responder_distance,
    }
}

fn build_notification(notification: &Notification) -> NotificationView {
    NotificationView {
        id: notification.id.to_string(),
        title: notification.title.clone(),
        message: notification.message.clone(),
        seen: notification.seen,
        time_label: format_timestamp(notification.timestamp),
        icon: notification.category.icon().to_string(),
    }
}

fn build_hotline(hotline: &Hotline) -> HotlineView {
    HotlineView {
        name: hotline.name.clone(),
        number: hotline.number.clone(),
        category: hotline.category.clone().unwrap_or_default(),
    }
}

fn build_announcement(announcement: &Announcement) -> AnnouncementView {
    AnnouncementView {
        id: announcement.id.clone(),
        title: announcement.title.clone(),
        body: announcement.body.clone(),
        date_label: format_timestamp(announcement.posted_at),
    }
}

fn build_clearance(request: &ClearanceRequest) -> ClearanceView {
    ClearanceView {
        id: request.id.to_string(),
        kind_label: request.kind.label().to_string(),
        status_label: request.status.label().to_string(),
        requested_label: format_timestamp(request.requested_at),
        closed: request.status.is_terminal(),
    }
}

fn build_toast(toast: &ToastMessage) -> ToastView {
    let kind = match toast.kind {
        ToastKind::Success => "success",
        ToastKind::Error => "error",
        ToastKind::Warning => "warning",
        ToastKind::Info => "info",
    };
    ToastView {
        text: toast.text.clone(),
        kind: kind.to_string(),
        duration_ms: toast.duration_ms,
    }
}

fn build_error(error: &AppError) -> ErrorView {
    ErrorView {
        code: error.code().to_string(),
        message: error.user_facing_message().to_string(),
        detail: error.message.clone(),
    }
}

/// Great-circle distance between two points.
#[must_use]
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (b.lat() - a.lat()).to_radians();
    let d_lon = (b.lon() - a.lon()).to_radians();
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push the intermediate past 1.0, where asin turns NaN.
    let h = h.clamp(0.0, 1.0);
    let km = 2.0 * EARTH_RADIUS_KM * h.sqrt().asin();
    if km.is_finite() {
        km
    } else {
        f64::MAX
    }
}

#[must_use]
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{} m away", (km * 1000.0).round() as i64)
    } else {
        format!("{km:.1} km away")
    }
}

fn format_timestamp(at: UnixTimeMs) -> String {
    i64::try_from(at.0)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%b %d, %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
