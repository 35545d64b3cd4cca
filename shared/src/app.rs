//! The app core: a single update loop over [`Event`]s, mutating [`Model`]
//! and requesting side effects through [`Capabilities`].
//!
//! The submission saga lives here. A report travels: validate, optionally
//! upload media, write the global report document, then fan out the
//! best-effort follow-ups (history copy, active-request pointer, and
//! notifications to admins, eligible responders and the reporter). Only the
//! global write can fail a submission; everything after it is logged and
//! forgotten.

use serde::de::DeserializeOwned;

use crate::capabilities::{
    BlobOutput, BlobResult, CacheKey, CacheOutput, CacheResult, Capabilities, ConnectivityStatus,
    DocPath, DocumentSnapshot, StoreOutput, StoreResult,
};
use crate::event::{ClearanceDraft, Event, ProfileDraft, ReportDraft, SideEffectTask};
use crate::media::{prepare_media, MediaAttachment};
use crate::model::{
    ClearanceId, ClearanceRequest, ClearanceStatus, Description, EmergencyReport,
    InFlightSubmission, LatLon, Model, Notification, NotificationCategory, NotificationId,
    Purpose, ReportId, ReportKind, ReportStatus, Role, SubmissionOrigin, ToastKind, UnixTimeMs,
    UserId, UserProfile,
};
use crate::offline::{seal_cache_value, CacheCodecError, PendingReport, ReplayDecision};
use crate::view::ViewModel;
use crate::{generate_report_id, AppError, AppResult, ErrorKind, REPORT_ACTIVE_WINDOW_MS};

const USERS_COLLECTION: &str = "users";
const ADMINS_COLLECTION: &str = "admins";
const HOTLINES_COLLECTION: &str = "hotlines";
const ANNOUNCEMENTS_COLLECTION: &str = "announcement";
const REPORTS_COLLECTION: &str = "emergencyRequest";
const CLEARANCE_COLLECTION: &str = "clearanceRequest";
const HISTORY_SUBTREE: &str = "emergencyHistory";
const CLEARANCE_SUBTREE: &str = "clearanceHistory";
const NOTIFICATIONS_SUBTREE: &str = "notifications";

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        match event {
            Event::Start => Self::handle_start(caps),
            Event::CacheLoaded(result) => Self::handle_cache_loaded(model, caps, result),
            Event::CacheWritten { key, result } => Self::handle_cache_written(&key, &result),

            Event::ConnectivityChanged(status) => Self::handle_connectivity(model, caps, status),

            Event::SignedIn { user_id } => Self::handle_signed_in(model, caps, user_id),
            Event::SignedOut => Self::handle_signed_out(model, caps),
            Event::SaveProfile(draft) => Self::handle_save_profile(model, caps, *draft),
            Event::ProfileWritten(result) => Self::handle_profile_written(model, caps, result),

            Event::CurrentUserSnapshot(result) => {
                Self::handle_current_user_snapshot(model, caps, result);
            }
            Event::UsersSnapshot(result) => Self::handle_users_snapshot(model, caps, result),
            Event::AdminsSnapshot(result) => Self::handle_admins_snapshot(model, caps, result),
            Event::HotlinesSnapshot(result) => Self::handle_hotlines_snapshot(model, caps, result),
            Event::AnnouncementsSnapshot(result) => {
                Self::handle_announcements_snapshot(model, caps, result);
            }
            Event::NotificationsSnapshot(result) => {
                Self::handle_notifications_snapshot(model, caps, result);
            }
            Event::ActiveReportSnapshot(result) => {
                Self::handle_active_report_snapshot(model, caps, result);
            }
            Event::ClearanceSnapshot(result) => {
                Self::handle_clearance_snapshot(model, caps, result);
            }

            Event::SubmitReport { draft, now_ms } => {
                Self::handle_submit_report(model, caps, *draft, UnixTimeMs(now_ms));
            }
            Event::RetryPending { now_ms } => {
                Self::handle_retry_pending(model, caps, UnixTimeMs(now_ms));
            }
            Event::MediaUploaded(result) => Self::handle_media_uploaded(model, caps, result),
            Event::ReportPersisted(result) => Self::handle_report_persisted(model, caps, result),
            Event::SideEffectDone { task, result } => Self::handle_side_effect_done(&task, &result),

            Event::MarkNotificationSeen(id) => Self::handle_mark_seen(model, caps, id),
            Event::NotificationSeenWritten { id, result } => {
                Self::handle_seen_written(&id, &result);
            }

            Event::SubmitClearance { draft, now_ms } => {
                Self::handle_submit_clearance(model, caps, *draft, UnixTimeMs(now_ms));
            }
            Event::ClearancePersisted(result) => {
                Self::handle_clearance_persisted(model, caps, result);
            }

            Event::DismissToast => {
                model.active_toast = None;
                caps.render.render();
            }
            Event::DismissError => {
                model.active_error = None;
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        crate::view::build(model)
    }
}

// --- lifecycle ---

impl App {
    fn handle_start(caps: &Capabilities) {
        caps.cache.load_all(Event::CacheLoaded);
        caps.connectivity.watch(Event::ConnectivityChanged);
        caps.render.render();
    }

    fn handle_cache_loaded(model: &mut Model, caps: &Capabilities, result: CacheResult) {
        match result {
            Err(e) => tracing::warn!(error = %e, "device cache load failed"),
            Ok(CacheOutput::Loaded { entries }) => {
                for entry in entries {
                    match CacheKey::from_str(&entry.key) {
                        None => tracing::debug!(key = %entry.key, "ignoring unknown cache key"),
                        Some(key) => {
                            if let Err(e) = Self::apply_cached_entry(model, key, &entry.value) {
                                tracing::warn!(key = %key, error = %e, "dropping corrupt cached value");
                            }
                        }
                    }
                }
                caps.render.render();
            }
            Ok(other) => tracing::warn!(?other, "unexpected cache output during load"),
        }
    }

    fn apply_cached_entry(
        model: &mut Model,
        key: CacheKey,
        value: &[u8],
    ) -> Result<(), CacheCodecError> {
        use crate::offline::open_cache_value;
        match key {
            CacheKey::OfflineRequest => {
                let pending: PendingReport = open_cache_value(value)?;
                if !model.queue.restore(pending) {
                    tracing::info!("cached pending report ignored, slot already taken");
                }
            }
            CacheKey::CurrentUser => model.current_user = Some(open_cache_value(value)?),
            CacheKey::Users => model.users = open_cache_value(value)?,
            CacheKey::Hotlines => model.hotlines = open_cache_value(value)?,
            CacheKey::Announcement => model.announcements = open_cache_value(value)?,
            CacheKey::Admins => model.admins = open_cache_value(value)?,
            CacheKey::ActiveRequestData => model.active_report = Some(open_cache_value(value)?),
        }
        Ok(())
    }

    fn handle_cache_written(key: &CacheKey, result: &CacheResult) {
        match result {
            Ok(_) => tracing::debug!(key = %key, "cache write finished"),
            // Persistence failures never surface; the report flow carries on.
            Err(e) => tracing::warn!(key = %key, error = %e, "cache write failed"),
        }
    }
}

// --- connectivity & replay ---

impl App {
    fn handle_connectivity(model: &mut Model, caps: &Capabilities, status: ConnectivityStatus) {
        let was_online = model.network_online;
        model.network_online = Some(status.online);
        if status.online && was_online != Some(true) {
            tracing::info!(observed_at_ms = status.observed_at_ms, "connectivity restored");
            Self::attempt_replay(model, caps, UnixTimeMs(status.observed_at_ms));
        }
        caps.render.render();
    }

    fn handle_retry_pending(model: &mut Model, caps: &Capabilities, now: UnixTimeMs) {
        if model.network_online == Some(true) {
            Self::attempt_replay(model, caps, now);
        } else {
            model.show_toast(
                "Still offline. Your report will be sent automatically once you reconnect.",
                ToastKind::Info,
            );
        }
        caps.render.render();
    }

    fn attempt_replay(model: &mut Model, caps: &Capabilities, now: UnixTimeMs) {
        if model.is_submitting() {
            // At most one submission runs at a time; the pending report
            // stays queued for the next trigger.
            tracing::info!("replay deferred, a submission is already in flight");
            return;
        }
        match model.queue.replay_decision(now) {
            ReplayDecision::Empty => {}
            ReplayDecision::Expired => {
                model.queue.clear();
                Self::remove_cached(caps, CacheKey::OfflineRequest);
                model.show_toast(
                    "Your saved report expired before it could be sent.",
                    ToastKind::Warning,
                );
                tracing::info!("discarded expired pending report");
            }
            ReplayDecision::Ready => {
                if let Some(reason) = Self::replay_blocked_reason(model) {
                    model.queue.clear();
                    Self::remove_cached(caps, CacheKey::OfflineRequest);
                    model.show_toast(
                        "Your saved report could not be sent and was discarded.",
                        ToastKind::Warning,
                    );
                    tracing::info!(reason, "discarded pending report");
                    return;
                }
                let Some(pending) = model.queue.take() else {
                    return;
                };
                tracing::info!(local_id = %pending.local_id, "replaying pending report");
                Self::begin_submission(
                    model,
                    caps,
                    pending.kind,
                    pending.description.clone(),
                    pending.location,
                    pending.address.clone(),
                    pending.media.clone(),
                    SubmissionOrigin::Replay(pending),
                    now,
                );
            }
        }
    }

    fn replay_blocked_reason(model: &Model) -> Option<&'static str> {
        if model.user_id.is_none() {
            return Some("signed out");
        }
        if Self::has_active_report(model) {
            return Some("another report is already active");
        }
        None
    }

    fn has_active_report(model: &Model) -> bool {
        model
            .active_report
            .as_ref()
            .is_some_and(|r| r.status.is_active())
            || model
                .current_user
                .as_ref()
                .is_some_and(UserProfile::has_active_request)
    }
}

// --- report submission ---

impl App {
    fn handle_submit_report(
        model: &mut Model,
        caps: &Capabilities,
        draft: ReportDraft,
        now: UnixTimeMs,
    ) {
        if model.is_submitting() {
            model.set_error(AppError::validation(
                "Your previous report is still being submitted.",
            ));
            caps.render.render();
            return;
        }
        let (location, description) = match Self::validate_draft(model, &draft) {
            Ok(valid) => valid,
            Err(e) => {
                model.set_error(e);
                caps.render.render();
                return;
            }
        };

        if model.network_online == Some(true) {
            Self::begin_submission(
                model,
                caps,
                draft.kind,
                description,
                location,
                draft.address,
                draft.media,
                SubmissionOrigin::Fresh,
                now,
            );
        } else {
            let pending = PendingReport::new(
                draft.kind,
                description,
                location,
                draft.address,
                draft.media,
                now,
            );
            if model.queue.enqueue(pending).is_some() {
                tracing::info!("new offline report replaced the previous one");
            }
            if let Some(p) = model.queue.peek() {
                Self::persist_cache(caps, CacheKey::OfflineRequest, p);
            }
            model.show_toast(
                "You're offline. Your report is saved and will be sent when connection returns.",
                ToastKind::Info,
            );
        }
        caps.render.render();
    }

    fn validate_draft(model: &Model, draft: &ReportDraft) -> AppResult<(LatLon, String)> {
        if model.user_id.is_none() {
            return Err(AppError::new(
                ErrorKind::Authentication,
                "sign-in required before submitting a report",
            ));
        }
        let (Some(lat), Some(lon)) = (draft.latitude, draft.longitude) else {
            return Err(AppError::validation(
                "A location fix is required before submitting.",
            ));
        };
        let location = LatLon::new(lat, lon)?;
        let description = Description::new(draft.description.clone())
            .map_err(|_| AppError::validation("The description is too long."))?;
        if Self::has_active_report(model) {
            return Err(AppError::validation(
                "You already have an active emergency report.",
            ));
        }
        Ok((location, description.into_inner()))
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_submission(
        model: &mut Model,
        caps: &Capabilities,
        kind: ReportKind,
        description: String,
        location: LatLon,
        address: Option<String>,
        media: Option<MediaAttachment>,
        origin: SubmissionOrigin,
        now: UnixTimeMs,
    ) {
        let Some(reporter) = model.user_id.clone() else {
            tracing::error!("submission started without a signed-in user");
            return;
        };
        let id = generate_report_id(now);
        let report = EmergencyReport {
            id: id.clone(),
            reporter,
            reporter_name: model
                .current_user
                .as_ref()
                .map(|u| u.full_name.clone())
                .unwrap_or_default(),
            kind,
            description,
            media_url: String::new(),
            location,
            address,
            status: ReportStatus::AwaitingResponse,
            created_at: now,
            expires_at: now.offset(REPORT_ACTIVE_WINDOW_MS),
            responder: None,
            responder_location: None,
        };
        model.submission = Some(InFlightSubmission { report, origin });

        match media {
            Some(attachment) => match prepare_media(&attachment, &id) {
                Ok(prepared) => {
                    caps.blob.upload(
                        prepared.path,
                        prepared.content_type,
                        prepared.data,
                        Event::MediaUploaded,
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "attachment preparation failed, submitting without media");
                    model.show_toast(
                        "The attachment could not be processed. Your report will be sent without it.",
                        ToastKind::Warning,
                    );
                    Self::persist_report(model, caps);
                }
            },
            None => Self::persist_report(model, caps),
        }
    }

    fn handle_media_uploaded(model: &mut Model, caps: &Capabilities, result: BlobResult) {
        let Some(submission) = &mut model.submission else {
            tracing::warn!("upload resolved with no submission in flight");
            return;
        };
        // Media is best-effort; on any failure the report goes out with an
        // empty media reference.
        match result.and_then(BlobOutput::into_fetchable_url) {
            Ok(url) => submission.report.media_url = url,
            Err(e) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "media upload failed, continuing without attachment");
            }
        }
        Self::persist_report(model, caps);
    }

    fn persist_report(model: &mut Model, caps: &Capabilities) {
        let Some(submission) = &model.submission else {
            return;
        };
        let report = &submission.report;
        let body = match serde_json::to_vec(report) {
            Ok(body) => body,
            Err(e) => {
                Self::abort_submission(
                    model,
                    AppError::new(ErrorKind::Data, "could not encode the report")
                        .with_internal(e.to_string()),
                );
                caps.render.render();
                return;
            }
        };
        let Some(path) = Self::try_path(&[REPORTS_COLLECTION, report.id.as_str()]) else {
            Self::abort_submission(
                model,
                AppError::new(ErrorKind::Internal, "could not build the report path"),
            );
            caps.render.render();
            return;
        };
        caps.store.set(path, body, Event::ReportPersisted);
    }

    fn abort_submission(model: &mut Model, error: AppError) {
        if let Some(submission) = model.submission.take() {
            if let SubmissionOrigin::Replay(pending) = submission.origin {
                model.queue.restore(pending);
            }
        }
        model.set_error(error);
    }

    fn handle_report_persisted(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(submission) = model.submission.take() else {
            tracing::warn!("report write resolved with no submission in flight");
            return;
        };
        match result {
            Err(e) => match submission.origin {
                SubmissionOrigin::Replay(pending) => {
                    tracing::warn!(code = e.code(), error = %e, "replay failed, keeping pending report");
                    if !model.queue.restore(pending) {
                        tracing::info!("a newer pending report took the slot");
                    }
                    caps.render.render();
                }
                SubmissionOrigin::Fresh => {
                    model.set_error(AppError::from(e));
                    caps.render.render();
                }
            },
            Ok(_) => {
                let was_replay = matches!(submission.origin, SubmissionOrigin::Replay(_));
                Self::finish_submission(model, caps, submission.report, was_replay);
            }
        }
    }

    fn finish_submission(
        model: &mut Model,
        caps: &Capabilities,
        report: EmergencyReport,
        was_replay: bool,
    ) {
        Self::write_history(caps, &report);
        Self::write_active_pointer(caps, &report);
        Self::fan_out_report_notifications(model, caps, &report);

        if let Some(profile) = &mut model.current_user {
            profile.active_request = Some(report.id.clone());
            Self::persist_cache(caps, CacheKey::CurrentUser, profile);
        }
        Self::persist_cache(caps, CacheKey::ActiveRequestData, &report);
        model.closed_report = None;
        Self::watch_report(model, caps, report.id.clone());
        model.active_report = Some(report);

        if was_replay {
            Self::remove_cached(caps, CacheKey::OfflineRequest);
            model.show_toast("Your saved report has been submitted.", ToastKind::Success);
        } else {
            if model.queue.has_pending() {
                model.queue.clear();
                Self::remove_cached(caps, CacheKey::OfflineRequest);
                tracing::info!("discarded pending report superseded by a fresh submission");
            }
            model.show_toast("Emergency report submitted.", ToastKind::Success);
        }
        caps.render.render();
    }

    fn write_history(caps: &Capabilities, report: &EmergencyReport) {
        let Some(path) = Self::try_path(&[
            USERS_COLLECTION,
            report.reporter.as_str(),
            HISTORY_SUBTREE,
            report.id.as_str(),
        ]) else {
            return;
        };
        match serde_json::to_vec(report) {
            Ok(body) => caps.store.set(path, body, |result| Event::SideEffectDone {
                task: SideEffectTask::HistoryWrite,
                result,
            }),
            Err(e) => tracing::warn!(error = %e, "could not encode report for history"),
        }
    }

    fn write_active_pointer(caps: &Capabilities, report: &EmergencyReport) {
        let Some(path) = Self::try_path(&[USERS_COLLECTION, report.reporter.as_str()]) else {
            return;
        };
        let patch = serde_json::json!({ "activeRequest": report.id.as_str() });
        match serde_json::to_vec(&patch) {
            Ok(body) => caps.store.merge(path, body, |result| Event::SideEffectDone {
                task: SideEffectTask::ActivePointer,
                result,
            }),
            Err(e) => tracing::warn!(error = %e, "could not encode active-request pointer"),
        }
    }

    fn fan_out_report_notifications(
        model: &Model,
        caps: &Capabilities,
        report: &EmergencyReport,
    ) {
        let at = report.created_at;
        let reporter_name = if report.reporter_name.is_empty() {
            "A resident"
        } else {
            report.reporter_name.as_str()
        };
        let summary = format!("{reporter_name} reported: {}", report.kind.label());

        for admin in &model.admins {
            let alert = Notification::new(
                "New emergency report",
                summary.clone(),
                NotificationCategory::Emergency,
                at,
            );
            Self::write_notification(
                caps,
                Role::Admin,
                &admin.id,
                &alert,
                SideEffectTask::NotifyAdmin(admin.id.clone()),
            );
        }
        for responder in model.notifiable_responders() {
            let alert = Notification::new(
                "New emergency report",
                summary.clone(),
                NotificationCategory::Emergency,
                at,
            );
            Self::write_notification(
                caps,
                Role::Responder,
                &responder.id,
                &alert,
                SideEffectTask::NotifyResponder(responder.id.clone()),
            );
        }
        let receipt = Notification::new(
            "Report submitted",
            "Your emergency report was sent to the barangay.",
            NotificationCategory::System,
            at,
        );
        Self::write_notification(
            caps,
            Role::Resident,
            &report.reporter,
            &receipt,
            SideEffectTask::NotifyReporter,
        );
    }

    fn write_notification(
        caps: &Capabilities,
        role: Role,
        owner: &UserId,
        notification: &Notification,
        task: SideEffectTask,
    ) {
        let Some(path) = Self::try_path(&[
            role.collection(),
            owner.as_str(),
            NOTIFICATIONS_SUBTREE,
            notification.id.as_str(),
        ]) else {
            return;
        };
        match serde_json::to_vec(notification) {
            Ok(body) => caps.store.set(path, body, move |result| Event::SideEffectDone {
                task,
                result,
            }),
            Err(e) => tracing::warn!(error = %e, "could not encode notification"),
        }
    }

    fn handle_side_effect_done(task: &SideEffectTask, result: &StoreResult) {
        match result {
            Ok(_) => tracing::debug!(task = task.label(), "follow-up write finished"),
            Err(e) => {
                tracing::warn!(task = task.label(), code = e.code(), error = %e, "follow-up write failed");
            }
        }
    }
}

// --- session & profile ---

impl App {
    fn handle_signed_in(model: &mut Model, caps: &Capabilities, user_id: UserId) {
        if model.user_id.as_ref() == Some(&user_id) {
            return;
        }
        model.user_id = Some(user_id.clone());

        if let Some(path) = Self::try_path(&[USERS_COLLECTION, user_id.as_str()]) {
            caps.store.subscribe(path, Event::CurrentUserSnapshot);
        }
        if let Some(path) = Self::try_path(&[USERS_COLLECTION]) {
            caps.store.subscribe(path, Event::UsersSnapshot);
        }
        if let Some(path) = Self::try_path(&[ADMINS_COLLECTION]) {
            caps.store.subscribe(path, Event::AdminsSnapshot);
        }
        if let Some(path) = Self::try_path(&[HOTLINES_COLLECTION]) {
            caps.store.subscribe(path, Event::HotlinesSnapshot);
        }
        if let Some(path) = Self::try_path(&[ANNOUNCEMENTS_COLLECTION]) {
            caps.store.subscribe(path, Event::AnnouncementsSnapshot);
        }
        if let Some(path) =
            Self::try_path(&[USERS_COLLECTION, user_id.as_str(), CLEARANCE_SUBTREE])
        {
            caps.store.subscribe(path, Event::ClearanceSnapshot);
        }

        let watch = model
            .active_report
            .as_ref()
            .map(|r| r.id.clone())
            .or_else(|| {
                model
                    .current_user
                    .as_ref()
                    .and_then(|u| u.active_request.clone())
            });
        if let Some(report_id) = watch {
            Self::watch_report(model, caps, report_id);
        }
        caps.render.render();
    }

    fn handle_signed_out(model: &mut Model, caps: &Capabilities) {
        model.user_id = None;
        model.current_user = None;
        model.active_report = None;
        model.watched_report = None;
        model.closed_report = None;
        model.inbox_subscribed = false;
        model.submission = None;
        model.clearance_in_flight = None;
        model.queue.clear();
        model.notifications.clear();
        model.clearance_requests.clear();
        model.toasted_notifications.clear();

        for key in CacheKey::ALL {
            if key.is_session_scoped() {
                Self::remove_cached(caps, key);
            }
        }
        caps.render.render();
    }

    fn handle_save_profile(model: &mut Model, caps: &Capabilities, draft: ProfileDraft) {
        let Some(user_id) = model.user_id.clone() else {
            model.set_error(AppError::new(
                ErrorKind::Authentication,
                "sign-in required before saving a profile",
            ));
            caps.render.render();
            return;
        };
        if draft.full_name.trim().is_empty()
            || draft.phone.trim().is_empty()
            || draft.address.trim().is_empty()
        {
            model.set_error(AppError::validation(
                "Name, phone and address are all required.",
            ));
            caps.render.render();
            return;
        }

        let mut patch = serde_json::Map::new();
        patch.insert("fullName".into(), draft.full_name.into());
        patch.insert("phone".into(), draft.phone.into());
        patch.insert("address".into(), draft.address.into());
        if let Some(email) = draft.email {
            patch.insert("email".into(), email.into());
        }

        match serde_json::to_vec(&serde_json::Value::Object(patch)) {
            Ok(body) => {
                if let Some(path) = Self::try_path(&[USERS_COLLECTION, user_id.as_str()]) {
                    caps.store.merge(path, body, Event::ProfileWritten);
                }
            }
            Err(e) => tracing::error!(error = %e, "could not encode profile patch"),
        }
        caps.render.render();
    }

    fn handle_profile_written(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        match result {
            Ok(_) => model.show_toast("Profile saved.", ToastKind::Success),
            Err(e) => model.set_error(AppError::from(e)),
        }
        caps.render.render();
    }

    fn handle_current_user_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(snapshot) = Self::session_document(model, result, "profile") else {
            return;
        };
        match snapshot.decode::<UserProfile>() {
            Err(e) => tracing::warn!(error = %e, "bad profile snapshot"),
            Ok(None) => tracing::debug!("no profile on record yet"),
            Ok(Some(profile)) => {
                if !model.inbox_subscribed {
                    if let Some(path) = Self::try_path(&[
                        profile.role.collection(),
                        profile.id.as_str(),
                        NOTIFICATIONS_SUBTREE,
                    ]) {
                        caps.store.subscribe(path, Event::NotificationsSnapshot);
                        model.inbox_subscribed = true;
                    }
                }
                if let Some(report_id) = profile.active_request.clone() {
                    Self::watch_report(model, caps, report_id);
                } else if model
                    .active_report
                    .as_ref()
                    .is_some_and(|r| r.status.is_terminal())
                {
                    Self::clear_active_report(model, caps);
                }
                Self::persist_cache(caps, CacheKey::CurrentUser, &profile);
                model.current_user = Some(profile);
                caps.render.render();
            }
        }
    }
}

// --- directories & reference data ---

impl App {
    fn handle_users_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(list) = Self::decode_directory::<UserProfile>(result, "users") else {
            return;
        };
        model.users = list;
        Self::persist_cache(caps, CacheKey::Users, &model.users);
        caps.render.render();
    }

    fn handle_admins_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(list) = Self::decode_directory::<UserProfile>(result, "admins") else {
            return;
        };
        model.admins = list;
        Self::persist_cache(caps, CacheKey::Admins, &model.admins);
        caps.render.render();
    }

    fn handle_hotlines_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(list) = Self::decode_directory(result, "hotlines") else {
            return;
        };
        model.hotlines = list;
        Self::persist_cache(caps, CacheKey::Hotlines, &model.hotlines);
        caps.render.render();
    }

    fn handle_announcements_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(list) = Self::decode_directory(result, "announcements") else {
            return;
        };
        model.announcements = list;
        Self::persist_cache(caps, CacheKey::Announcement, &model.announcements);
        caps.render.render();
    }
}

// --- notifications inbox ---

impl App {
    fn handle_notifications_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(list) = Self::session_directory::<Notification>(model, result, "notifications")
        else {
            return;
        };

        // Toast the newest arrival we haven't announced yet.
        let mut newest: Option<&Notification> = None;
        for n in &list {
            if !n.seen
                && !model.toasted_notifications.contains(&n.id)
                && newest.is_none_or(|current| n.timestamp > current.timestamp)
            {
                newest = Some(n);
            }
        }
        if let Some(n) = newest {
            let kind = match n.category {
                NotificationCategory::Emergency => ToastKind::Warning,
                _ => ToastKind::Info,
            };
            model.show_toast(n.title.clone(), kind);
        }
        for n in &list {
            model.toasted_notifications.put(n.id.clone(), ());
        }

        model.notifications = list;
        caps.render.render();
    }

    fn handle_mark_seen(model: &mut Model, caps: &Capabilities, id: NotificationId) {
        let Some(notification) = model.notifications.iter_mut().find(|n| n.id == id) else {
            tracing::debug!(id = %id, "mark-seen for unknown notification");
            return;
        };
        if notification.seen {
            return;
        }
        notification.seen = true;

        let owner = model.user_id.clone();
        let role = model.current_user.as_ref().map(|u| u.role);
        match (owner, role) {
            (Some(owner), Some(role)) => {
                // Only the seen flag goes out; the rest of the record is
                // immutable.
                let patch = serde_json::json!({ "seen": true });
                if let (Ok(body), Some(path)) = (
                    serde_json::to_vec(&patch),
                    Self::try_path(&[
                        role.collection(),
                        owner.as_str(),
                        NOTIFICATIONS_SUBTREE,
                        id.as_str(),
                    ]),
                ) {
                    let event_id = id.clone();
                    caps.store.merge(path, body, move |result| {
                        Event::NotificationSeenWritten {
                            id: event_id,
                            result,
                        }
                    });
                }
            }
            _ => tracing::warn!(id = %id, "seen flag kept local, no session role"),
        }
        caps.render.render();
    }

    fn handle_seen_written(id: &NotificationId, result: &StoreResult) {
        match result {
            Ok(_) => tracing::debug!(id = %id, "seen flag written"),
            Err(e) => tracing::warn!(id = %id, code = e.code(), error = %e, "seen flag write failed"),
        }
    }
}

// --- active report tracking ---

impl App {
    fn watch_report(model: &mut Model, caps: &Capabilities, id: ReportId) {
        if model.closed_report.as_ref() == Some(&id) {
            tracing::debug!(id = %id, "not watching a report that already closed");
            return;
        }
        if model.watched_report.as_ref() == Some(&id) {
            return;
        }
        let Some(path) = Self::try_path(&[REPORTS_COLLECTION, id.as_str()]) else {
            return;
        };
        caps.store.subscribe(path, Event::ActiveReportSnapshot);
        model.watched_report = Some(id);
    }

    /// Whether a snapshot for this report id still belongs to the session.
    /// The store has no unsubscribe, so streams for reports the core already
    /// closed keep delivering.
    fn tracks_report(model: &Model, id: &ReportId) -> bool {
        if model.closed_report.as_ref() == Some(id) {
            return false;
        }
        model.watched_report.as_ref() == Some(id)
            || model.active_report.as_ref().is_some_and(|r| r.id == *id)
            || model
                .current_user
                .as_ref()
                .is_some_and(|u| u.active_request.as_ref() == Some(id))
    }

    fn handle_active_report_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(snapshot) = Self::document(result, "active report") else {
            return;
        };
        match snapshot.decode::<EmergencyReport>() {
            Err(e) => tracing::warn!(error = %e, "bad active report snapshot"),
            Ok(None) => {
                if model.active_report.is_some() || model.watched_report.is_some() {
                    Self::clear_active_report(model, caps);
                    caps.render.render();
                }
            }
            Ok(Some(remote)) => {
                if !Self::tracks_report(model, &remote.id) {
                    tracing::debug!(id = %remote.id, status = remote.status.as_str(), "dropped snapshot for a report no longer tracked");
                    return;
                }
                Self::apply_active_report(model, caps, remote);
                caps.render.render();
            }
        }
    }

    fn apply_active_report(model: &mut Model, caps: &Capabilities, remote: EmergencyReport) {
        let report = match &mut model.active_report {
            Some(current) if current.id == remote.id => {
                current.responder = remote.responder.clone();
                current.responder_location = remote.responder_location;
                current.media_url = remote.media_url.clone();
                // Location and responder details always apply, even when
                // the status move is rejected as backward.
                if let Err(e) = current.apply_remote_status(remote.status) {
                    tracing::warn!(error = %e, "ignoring backward status move from snapshot");
                }
                current.clone()
            }
            _ => {
                model.active_report = Some(remote.clone());
                remote
            }
        };

        if report.status.is_terminal() {
            tracing::info!(id = %report.id, status = report.status.as_str(), "report reached a terminal status");
            Self::clear_active_report(model, caps);
        } else {
            Self::persist_cache(caps, CacheKey::ActiveRequestData, &report);
        }
    }

    fn clear_active_report(model: &mut Model, caps: &Capabilities) {
        let closed = model
            .active_report
            .take()
            .map(|r| r.id)
            .or_else(|| model.watched_report.clone());
        if closed.is_some() {
            model.closed_report = closed;
        }
        model.watched_report = None;
        if let Some(profile) = &mut model.current_user {
            if profile.active_request.is_some() {
                profile.active_request = None;
                Self::persist_cache(caps, CacheKey::CurrentUser, profile);
            }
        }
        Self::remove_cached(caps, CacheKey::ActiveRequestData);
    }
}

// --- barangay clearance requests ---

impl App {
    fn handle_submit_clearance(
        model: &mut Model,
        caps: &Capabilities,
        draft: ClearanceDraft,
        now: UnixTimeMs,
    ) {
        if model.clearance_in_flight.is_some() {
            model.set_error(AppError::validation(
                "Another request is still being submitted.",
            ));
            caps.render.render();
            return;
        }
        let Some(requester) = model.user_id.clone() else {
            model.set_error(AppError::new(
                ErrorKind::Authentication,
                "sign-in required before requesting a document",
            ));
            caps.render.render();
            return;
        };
        let purpose = match Purpose::new(draft.purpose.clone()) {
            Ok(p) if !p.as_str().trim().is_empty() => p,
            Ok(_) => {
                model.set_error(AppError::validation("A purpose is required."));
                caps.render.render();
                return;
            }
            Err(_) => {
                model.set_error(AppError::validation("The purpose text is too long."));
                caps.render.render();
                return;
            }
        };

        let request = ClearanceRequest {
            id: ClearanceId::new(uuid::Uuid::new_v4().to_string()),
            requester,
            kind: draft.kind,
            purpose: purpose.into_inner(),
            status: ClearanceStatus::Pending,
            requested_at: now,
        };
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(e) => {
                model.set_error(
                    AppError::new(ErrorKind::Data, "could not encode the request")
                        .with_internal(e.to_string()),
                );
                caps.render.render();
                return;
            }
        };
        let Some(path) = Self::try_path(&[CLEARANCE_COLLECTION, request.id.as_str()]) else {
            model.set_error(AppError::new(
                ErrorKind::Internal,
                "could not build the request path",
            ));
            caps.render.render();
            return;
        };
        model.clearance_in_flight = Some(request);
        caps.store.set(path, body, Event::ClearancePersisted);
        caps.render.render();
    }

    fn handle_clearance_persisted(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(request) = model.clearance_in_flight.take() else {
            tracing::warn!("clearance write resolved with no request in flight");
            return;
        };
        match result {
            Err(e) => {
                model.set_error(AppError::from(e));
                caps.render.render();
            }
            Ok(_) => {
                Self::write_clearance_history(caps, &request);
                Self::fan_out_clearance_notices(model, caps, &request);
                model.clearance_requests.push(request);
                model.show_toast(
                    "Request submitted. The barangay office will process it.",
                    ToastKind::Success,
                );
                caps.render.render();
            }
        }
    }

    fn write_clearance_history(caps: &Capabilities, request: &ClearanceRequest) {
        let Some(path) = Self::try_path(&[
            USERS_COLLECTION,
            request.requester.as_str(),
            CLEARANCE_SUBTREE,
            request.id.as_str(),
        ]) else {
            return;
        };
        match serde_json::to_vec(request) {
            Ok(body) => caps.store.set(path, body, |result| Event::SideEffectDone {
                task: SideEffectTask::ClearanceHistory,
                result,
            }),
            Err(e) => tracing::warn!(error = %e, "could not encode clearance history entry"),
        }
    }

    fn fan_out_clearance_notices(
        model: &Model,
        caps: &Capabilities,
        request: &ClearanceRequest,
    ) {
        let requester_name = model
            .current_user
            .as_ref()
            .map(|u| u.full_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "A resident".to_string());
        let summary = format!("{requester_name} requested: {}", request.kind.label());

        for admin in &model.admins {
            let notice = Notification::new(
                "New document request",
                summary.clone(),
                NotificationCategory::Clearance,
                request.requested_at,
            );
            Self::write_notification(
                caps,
                Role::Admin,
                &admin.id,
                &notice,
                SideEffectTask::ClearanceNotice(admin.id.clone()),
            );
        }
    }

    fn handle_clearance_snapshot(model: &mut Model, caps: &Capabilities, result: StoreResult) {
        let Some(mut incoming) =
            Self::session_directory::<ClearanceRequest>(model, result, "clearance history")
        else {
            return;
        };
        for item in &mut incoming {
            if let Some(existing) = model.clearance_requests.iter().find(|c| c.id == item.id) {
                if !existing.status.accepts_remote(item.status) {
                    tracing::warn!(id = %item.id, "ignoring backward clearance status move");
                    item.status = existing.status;
                }
            }
        }
        model.clearance_requests = incoming;
        caps.render.render();
    }
}

// --- small shared helpers ---

impl App {
    fn try_path(segments: &[&str]) -> Option<DocPath> {
        match DocPath::from_segments(segments) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "refusing to build store path");
                None
            }
        }
    }

    fn document(result: StoreResult, what: &str) -> Option<DocumentSnapshot> {
        match result {
            Ok(StoreOutput::Document(snapshot)) => Some(snapshot),
            Ok(StoreOutput::Ack { path }) => {
                tracing::warn!(path = %path, "unexpected ack for {what}");
                None
            }
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "{what} snapshot delivery failed");
                None
            }
        }
    }

    fn decode_directory<T: DeserializeOwned>(result: StoreResult, what: &str) -> Option<Vec<T>> {
        let snapshot = Self::document(result, what)?;
        match snapshot.decode_collection() {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::warn!(error = %e, "bad {what} snapshot");
                None
            }
        }
    }

    /// [`Self::document`] plus an ownership check: the path must sit under
    /// the signed-in user. Streams from a closed session cannot be torn down
    /// and keep delivering; their snapshots are dropped here.
    fn session_document(model: &Model, result: StoreResult, what: &str) -> Option<DocumentSnapshot> {
        let snapshot = Self::document(result, what)?;
        let owned = model
            .user_id
            .as_ref()
            .is_some_and(|id| snapshot.path.is_owned_by(id.as_str()));
        if !owned {
            tracing::debug!(path = %snapshot.path, "dropped {what} snapshot for a closed session");
            return None;
        }
        Some(snapshot)
    }

    fn session_directory<T: DeserializeOwned>(
        model: &Model,
        result: StoreResult,
        what: &str,
    ) -> Option<Vec<T>> {
        let snapshot = Self::session_document(model, result, what)?;
        match snapshot.decode_collection() {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::warn!(error = %e, "bad {what} snapshot");
                None
            }
        }
    }

    fn persist_cache<T: serde::Serialize>(caps: &Capabilities, key: CacheKey, value: &T) {
        match seal_cache_value(value) {
            Ok(bytes) => caps.cache.write(key, bytes, move |result| Event::CacheWritten {
                key,
                result,
            }),
            // Logged, never surfaced: a cache mishap must not block the
            // report flow.
            Err(e) => tracing::warn!(key = %key, error = %e, "could not encode cache value"),
        }
    }

    fn remove_cached(caps: &Capabilities, key: CacheKey) {
        caps.cache
            .remove(key, move |result| Event::CacheWritten { key, result });
    }
}
