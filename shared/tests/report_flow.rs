use crux_core::testing::AppTester;
use crux_core::Request;

use sagip_core::capabilities::{
    BlobError, BlobOperation, BlobOutput, CacheKey, CacheOperation, DocPath, DocumentSnapshot,
    StoreError, StoreOperation, StoreOutput,
};
use sagip_core::event::{Event, ReportDraft};
use sagip_core::media::MediaAttachment;
use sagip_core::model::{
    EmergencyReport, LatLon, Model, ReportId, ReportKind, ReportStatus, Role, ToastKind,
    UnixTimeMs, UserId, UserProfile,
};
use sagip_core::offline::PendingReport;
use sagip_core::{App, Effect, ErrorKind, REPORT_ACTIVE_WINDOW_MS};

const NOW: u64 = 1_756_000_000_000;

fn profile(id: &str, role: Role, name: &str) -> UserProfile {
    UserProfile {
        id: UserId::new(id),
        role,
        full_name: name.into(),
        phone: "+63 917 555 0100".into(),
        address: "Purok 2, Barangay San Roque".into(),
        email: None,
        active_request: None,
    }
}

fn signed_in_model() -> Model {
    let mut model = Model::new();
    model.user_id = Some(UserId::new("u-1"));
    model.current_user = Some(profile("u-1", Role::Resident, "Maria Santos"));
    model.network_online = Some(true);
    model
}

fn draft(kind: ReportKind, description: &str) -> ReportDraft {
    ReportDraft {
        kind,
        description: description.into(),
        latitude: Some(14.676),
        longitude: Some(121.0437),
        address: Some("Seaside Road".into()),
        media: None,
    }
}

fn sample_report(id: &str, status: ReportStatus) -> EmergencyReport {
    EmergencyReport {
        id: ReportId::new(id),
        reporter: UserId::new("u-1"),
        reporter_name: "Maria Santos".into(),
        kind: ReportKind::Fire,
        description: "Kitchen fire".into(),
        media_url: String::new(),
        location: LatLon::new(14.676, 121.0437).unwrap(),
        address: None,
        status,
        created_at: UnixTimeMs(NOW),
        expires_at: UnixTimeMs(NOW + REPORT_ACTIVE_WINDOW_MS),
        responder: None,
        responder_location: None,
    }
}

fn test_png(width: u32, height: u32) -> Vec<u8> {
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
    let img = RgbImage::from_pixel(width, height, Rgb([180, 40, 20]));
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .expect("png encode");
    out
}

fn take_store_requests(effects: Vec<Effect>) -> Vec<Request<StoreOperation>> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Store(req) => Some(req),
            _ => None,
        })
        .collect()
}

fn write_paths(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Store(req) => match &req.operation {
                StoreOperation::Set { path, .. } | StoreOperation::Merge { path, .. } => {
                    Some(path.as_str().to_string())
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn cache_keys_written(effects: &[Effect]) -> Vec<CacheKey> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Cache(req) => match &req.operation {
                CacheOperation::Write { key, .. } => Some(*key),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn cache_keys_removed(effects: &[Effect]) -> Vec<CacheKey> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Cache(req) => match &req.operation {
                CacheOperation::Remove { key } => Some(*key),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

#[test]
fn test_online_submission_persists_then_fans_out() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();
    model.admins = vec![profile("a-1", Role::Admin, "Captain Cruz")];
    model.users = vec![
        profile("u-1", Role::Resident, "Maria Santos"),
        profile("r-1", Role::Responder, "Rescue One"),
    ];

    // 1. Submit a fresh report while online
    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(draft(ReportKind::Fire, "Kitchen fire, heavy smoke")),
            now_ms: NOW,
        },
        &mut model,
    );
    assert!(model.is_submitting());

    let mut sets = take_store_requests(update.effects);
    assert_eq!(sets.len(), 1, "exactly one write before the ack");
    let mut request = sets.remove(0);
    let (path, body) = match &request.operation {
        StoreOperation::Set { path, body } => (path.clone(), body.clone()),
        other => panic!("expected a set, got {other:?}"),
    };
    assert!(path.as_str().starts_with("emergencyRequest/SOS-"));

    let report: EmergencyReport = serde_json::from_slice(&body).expect("report json");
    assert_eq!(report.status, ReportStatus::AwaitingResponse);
    assert_eq!(report.reporter.as_str(), "u-1");
    assert_eq!(report.reporter_name, "Maria Santos");
    assert_eq!(report.created_at, UnixTimeMs(NOW));
    assert_eq!(report.expires_at, UnixTimeMs(NOW + REPORT_ACTIVE_WINDOW_MS));
    assert!(report.media_url.is_empty());

    // 2. Ack the global write; the follow-ups fan out
    let update = app
        .resolve(&mut request, Ok(StoreOutput::Ack { path }))
        .expect("resolve report write");
    let mut follow_ups = Vec::new();
    for event in update.events {
        follow_ups.extend(app.update(event, &mut model).effects);
    }

    // 3. Local state settles
    assert!(!model.is_submitting());
    let active = model.active_report.as_ref().expect("active report");
    assert_eq!(active.id, report.id);
    assert_eq!(
        model.current_user.as_ref().unwrap().active_request,
        Some(report.id.clone())
    );
    assert_eq!(
        model.active_toast.as_ref().map(|t| t.kind),
        Some(ToastKind::Success)
    );

    // 4. History copy, pointer and one notification per inbox
    let paths = write_paths(&follow_ups);
    let id = report.id.as_str();
    assert!(paths.contains(&format!("users/u-1/emergencyHistory/{id}")));
    assert!(paths.contains(&"users/u-1".to_string()), "pointer merge");
    assert!(paths
        .iter()
        .any(|p| p.starts_with("admins/a-1/notifications/")));
    assert!(paths
        .iter()
        .any(|p| p.starts_with("responders/r-1/notifications/")));
    assert!(paths
        .iter()
        .any(|p| p.starts_with("users/u-1/notifications/")));

    // 5. The report doc is watched and the cache is refreshed
    let subscribed = follow_ups.iter().any(|e| match e {
        Effect::Store(req) => matches!(
            &req.operation,
            StoreOperation::Subscribe { path } if path.as_str() == format!("emergencyRequest/{id}")
        ),
        _ => false,
    });
    assert!(subscribed, "should watch the submitted report");

    let cached = cache_keys_written(&follow_ups);
    assert!(cached.contains(&CacheKey::CurrentUser));
    assert!(cached.contains(&CacheKey::ActiveRequestData));
}

#[test]
fn test_submission_uploads_media_before_the_report() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();

    let mut d = draft(ReportKind::Fire, "Smoke from the second floor");
    d.media = Some(MediaAttachment {
        filename: "scene.png".into(),
        data: test_png(64, 48),
    });

    // 1. Only the upload goes out first
    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(d),
            now_ms: NOW,
        },
        &mut model,
    );
    assert!(
        !update.effects.iter().any(|e| matches!(e, Effect::Store(_))),
        "report write must wait for the upload"
    );
    let mut upload = update
        .effects
        .into_iter()
        .find_map(|e| match e {
            Effect::Blob(req) => Some(req),
            _ => None,
        })
        .expect("an upload request");
    let (blob_path, content_type) = match &upload.operation {
        BlobOperation::Upload {
            path, content_type, ..
        } => (path.clone(), content_type.clone()),
    };
    assert!(blob_path.starts_with("media/SOS-"));
    assert!(blob_path.ends_with(".jpg"));
    assert_eq!(content_type, "image/jpeg");

    // 2. Resolve the upload; the report write carries the URL
    let update = app
        .resolve(
            &mut upload,
            Ok(BlobOutput::Uploaded {
                url: "https://cdn.example.com/media/scene.jpg".into(),
            }),
        )
        .expect("resolve upload");
    let mut effects = Vec::new();
    for event in update.events {
        effects.extend(app.update(event, &mut model).effects);
    }
    let sets = take_store_requests(effects);
    let body = match &sets[0].operation {
        StoreOperation::Set { body, .. } => body.clone(),
        other => panic!("expected a set, got {other:?}"),
    };
    let report: EmergencyReport = serde_json::from_slice(&body).expect("report json");
    assert_eq!(report.media_url, "https://cdn.example.com/media/scene.jpg");
}

#[test]
fn test_media_upload_failure_still_submits_the_report() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();

    let mut d = draft(ReportKind::Accident, "Two cars collided");
    d.media = Some(MediaAttachment {
        filename: "crash.png".into(),
        data: test_png(32, 32),
    });
    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(d),
            now_ms: NOW,
        },
        &mut model,
    );
    let mut upload = update
        .effects
        .into_iter()
        .find_map(|e| match e {
            Effect::Blob(req) => Some(req),
            _ => None,
        })
        .expect("an upload request");

    // 1. The upload fails; the report still goes out, without media
    let update = app
        .resolve(&mut upload, Err(BlobError::network("socket closed")))
        .expect("resolve upload");
    let mut effects = Vec::new();
    for event in update.events {
        effects.extend(app.update(event, &mut model).effects);
    }
    let sets = take_store_requests(effects);
    assert_eq!(sets.len(), 1);
    let body = match &sets[0].operation {
        StoreOperation::Set { body, .. } => body.clone(),
        other => panic!("expected a set, got {other:?}"),
    };
    let report: EmergencyReport = serde_json::from_slice(&body).expect("report json");
    assert!(report.media_url.is_empty());

    // 2. An upload failure is not a submission failure
    assert!(model.active_error.is_none());
}

#[test]
fn test_remote_failure_surfaces_error_for_fresh_submission() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();

    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(draft(ReportKind::Medical, "Chest pain, needs transport")),
            now_ms: NOW,
        },
        &mut model,
    );
    let mut request = take_store_requests(update.effects).remove(0);

    // 1. The backend rejects the write
    let update = app
        .resolve(&mut request, Err(StoreError::unavailable("backend down")))
        .expect("resolve report write");
    for event in update.events {
        app.update(event, &mut model);
    }

    // 2. The saga unwinds into a visible error
    assert!(!model.is_submitting());
    assert!(model.active_report.is_none());
    let error = model.active_error.as_ref().expect("surfaced error");
    assert_eq!(error.kind, ErrorKind::Network);
}

#[test]
fn test_rejects_submission_without_location() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();

    let mut d = draft(ReportKind::Crime, "Break-in at the sari-sari store");
    d.latitude = None;
    d.longitude = None;
    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(d),
            now_ms: NOW,
        },
        &mut model,
    );

    let error = model.active_error.as_ref().expect("validation error");
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(error.message.contains("location"));
    assert!(!model.is_submitting());
    assert!(!update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Store(_) | Effect::Blob(_) | Effect::Cache(_))));
}

#[test]
fn test_rejects_second_report_while_one_is_active() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();
    model.current_user.as_mut().unwrap().active_request = Some(ReportId::new("SOS-1"));

    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(draft(ReportKind::Flood, "Water entering the house")),
            now_ms: NOW,
        },
        &mut model,
    );

    let error = model.active_error.as_ref().expect("validation error");
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(error.message.contains("active"));
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Store(_))));
}

#[test]
fn test_fresh_success_discards_superseded_pending() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();
    model.queue.enqueue(PendingReport::new(
        ReportKind::Flood,
        "basement flooding".into(),
        LatLon::new(14.676, 121.0437).unwrap(),
        None,
        None,
        UnixTimeMs(NOW - 60_000),
    ));

    // 1. A fresh submission goes through while the stash still holds one
    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(draft(ReportKind::Fire, "Fire at the market")),
            now_ms: NOW,
        },
        &mut model,
    );
    let mut request = take_store_requests(update.effects).remove(0);
    let path = match &request.operation {
        StoreOperation::Set { path, .. } => path.clone(),
        other => panic!("expected a set, got {other:?}"),
    };
    let update = app
        .resolve(&mut request, Ok(StoreOutput::Ack { path }))
        .expect("resolve report write");
    let mut follow_ups = Vec::new();
    for event in update.events {
        follow_ups.extend(app.update(event, &mut model).effects);
    }

    // 2. The stale pending report is gone, in memory and on disk
    assert!(!model.queue.has_pending());
    assert!(cache_keys_removed(&follow_ups).contains(&CacheKey::OfflineRequest));
}

#[test]
fn test_terminal_snapshot_clears_the_active_report() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();
    model.active_report = Some(sample_report("SOS-1", ReportStatus::OnGoing));
    model.current_user.as_mut().unwrap().active_request = Some(ReportId::new("SOS-1"));

    let resolved = sample_report("SOS-1", ReportStatus::Resolved);
    let snapshot = DocumentSnapshot {
        path: DocPath::new("emergencyRequest/SOS-1").unwrap(),
        body: Some(serde_json::to_vec(&resolved).unwrap()),
    };
    let update = app.update(
        Event::ActiveReportSnapshot(Ok(StoreOutput::Document(snapshot))),
        &mut model,
    );

    assert!(model.active_report.is_none());
    assert!(model.current_user.as_ref().unwrap().active_request.is_none());
    assert!(cache_keys_removed(&update.effects).contains(&CacheKey::ActiveRequestData));
    assert!(cache_keys_written(&update.effects).contains(&CacheKey::CurrentUser));
}

#[test]
fn test_backward_status_snapshot_is_ignored() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();
    model.active_report = Some(sample_report("SOS-1", ReportStatus::OnGoing));

    let stale = sample_report("SOS-1", ReportStatus::AwaitingResponse);
    let snapshot = DocumentSnapshot {
        path: DocPath::new("emergencyRequest/SOS-1").unwrap(),
        body: Some(serde_json::to_vec(&stale).unwrap()),
    };
    app.update(
        Event::ActiveReportSnapshot(Ok(StoreOutput::Document(snapshot))),
        &mut model,
    );

    let active = model.active_report.as_ref().expect("report retained");
    assert_eq!(active.status, ReportStatus::OnGoing);
}

#[test]
fn test_late_snapshot_after_terminal_cannot_resurrect_the_report() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();
    model.active_report = Some(sample_report("SOS-1", ReportStatus::OnGoing));
    model.watched_report = Some(ReportId::new("SOS-1"));
    model.current_user.as_mut().unwrap().active_request = Some(ReportId::new("SOS-1"));

    // 1. The report reaches a terminal status and the slot empties
    let resolved = sample_report("SOS-1", ReportStatus::Resolved);
    let snapshot = DocumentSnapshot {
        path: DocPath::new("emergencyRequest/SOS-1").unwrap(),
        body: Some(serde_json::to_vec(&resolved).unwrap()),
    };
    app.update(
        Event::ActiveReportSnapshot(Ok(StoreOutput::Document(snapshot))),
        &mut model,
    );
    assert!(model.active_report.is_none());

    // 2. The stream cannot be torn down, so an older OnGoing echo still
    //    arrives. It must not refill the slot or touch the cache.
    let echo = sample_report("SOS-1", ReportStatus::OnGoing);
    let snapshot = DocumentSnapshot {
        path: DocPath::new("emergencyRequest/SOS-1").unwrap(),
        body: Some(serde_json::to_vec(&echo).unwrap()),
    };
    let update = app.update(
        Event::ActiveReportSnapshot(Ok(StoreOutput::Document(snapshot))),
        &mut model,
    );
    assert!(model.active_report.is_none());
    assert!(!cache_keys_written(&update.effects).contains(&CacheKey::ActiveRequestData));

    // 3. The next report is not blocked by the ghost
    let update = app.update(
        Event::SubmitReport {
            draft: Box::new(draft(ReportKind::Fire, "Fire at the market")),
            now_ms: NOW,
        },
        &mut model,
    );
    assert!(model.active_error.is_none());
    assert!(!take_store_requests(update.effects).is_empty());
}

#[test]
fn test_notification_snapshot_toasts_each_arrival_once() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();

    let body = serde_json::json!({
        "n-1": {
            "id": "n-1",
            "title": "Flood advisory",
            "message": "River level rising in Zone 3",
            "seen": false,
            "timestamp": 42,
            "category": "emergency"
        }
    })
    .to_string()
    .into_bytes();
    let snapshot = DocumentSnapshot {
        path: DocPath::new("users/u-1/notifications").unwrap(),
        body: Some(body),
    };

    // 1. First delivery announces the notification
    app.update(
        Event::NotificationsSnapshot(Ok(StoreOutput::Document(snapshot.clone()))),
        &mut model,
    );
    assert_eq!(model.notifications.len(), 1);
    let toast = model.active_toast.as_ref().expect("toast");
    assert_eq!(toast.kind, ToastKind::Warning);
    assert_eq!(toast.text, "Flood advisory");

    // 2. The same snapshot again stays quiet
    app.update(Event::DismissToast, &mut model);
    app.update(
        Event::NotificationsSnapshot(Ok(StoreOutput::Document(snapshot))),
        &mut model,
    );
    assert!(model.active_toast.is_none());
}

#[test]
fn test_mark_seen_updates_locally_and_remotely() {
    let app = AppTester::<App, _>::default();
    let mut model = signed_in_model();

    let body = serde_json::json!({
        "n-1": {
            "id": "n-1",
            "title": "Clearance ready",
            "message": "Pick up at the barangay hall",
            "seen": false,
            "timestamp": 7,
            "category": "clearance"
        }
    })
    .to_string()
    .into_bytes();
    let snapshot = DocumentSnapshot {
        path: DocPath::new("users/u-1/notifications").unwrap(),
        body: Some(body),
    };
    app.update(
        Event::NotificationsSnapshot(Ok(StoreOutput::Document(snapshot))),
        &mut model,
    );

    let id = model.notifications[0].id.clone();
    let update = app.update(Event::MarkNotificationSeen(id), &mut model);

    // 1. Optimistic local flip
    assert!(model.notifications[0].seen);

    // 2. Partial update against the owner's inbox
    let merge = take_store_requests(update.effects)
        .into_iter()
        .find_map(|req| match req.operation {
            StoreOperation::Merge { path, body } => Some((path, body)),
            _ => None,
        })
        .expect("a merge request");
    assert_eq!(merge.0.as_str(), "users/u-1/notifications/n-1");
    let patch: serde_json::Value = serde_json::from_slice(&merge.1).unwrap();
    assert_eq!(patch, serde_json::json!({ "seen": true }));
}
