//! Offline pending report and the sealed envelope wrapped around every
//! cached value.
//!
//! The queue holds at most one report. A report submitted while the device
//! is offline overwrites whatever was stashed before it, and a stashed
//! report older than thirty minutes is discarded instead of replayed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaAttachment;
use crate::model::{LatLon, LocalOpId, ReportKind, UnixTimeMs};
use crate::{MAX_CACHE_VALUE_BYTES, OFFLINE_REPORT_EXPIRY_MS};

/// A report captured while offline, waiting for connectivity.
///
/// Attachment bytes are deliberately not persisted: after a process restart
/// a replayed report goes out with an empty media reference, the same
/// degradation the submission path applies when an upload fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReport {
    pub local_id: LocalOpId,
    pub kind: ReportKind,
    #[serde(default)]
    pub description: String,
    pub location: LatLon,
    #[serde(default)]
    pub address: Option<String>,
    pub enqueued_at: UnixTimeMs,
    #[serde(skip)]
    pub media: Option<MediaAttachment>,
}

impl PendingReport {
    #[must_use]
    pub fn new(
        kind: ReportKind,
        description: String,
        location: LatLon,
        address: Option<String>,
        media: Option<MediaAttachment>,
        enqueued_at: UnixTimeMs,
    ) -> Self {
        Self {
            local_id: LocalOpId::new(uuid::Uuid::new_v4().to_string()),
            kind,
            description,
            location,
            address,
            enqueued_at,
            media,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: UnixTimeMs) -> bool {
        now.saturating_elapsed_since(self.enqueued_at) > OFFLINE_REPORT_EXPIRY_MS
    }
}

/// What to do with the stash when connectivity returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplayDecision {
    /// Nothing stashed.
    Empty,
    /// Stashed report is past the replay window and must be discarded.
    Expired,
    /// Stashed report is still fresh and should be submitted.
    Ready,
}

/// Single-slot queue for the offline pending report.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    slot: Option<PendingReport>,
}

impl OfflineQueue {
    #[must_use]
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Stashes a report, returning the one it displaced.
    pub fn enqueue(&mut self, report: PendingReport) -> Option<PendingReport> {
        self.slot.replace(report)
    }

    /// Puts a report back after a failed replay. A report stashed in the
    /// meantime wins; the returned flag says whether the restore happened.
    pub fn restore(&mut self, report: PendingReport) -> bool {
        if self.slot.is_some() {
            return false;
        }
        self.slot = Some(report);
        true
    }

    pub fn take(&mut self) -> Option<PendingReport> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    #[must_use]
    pub fn peek(&self) -> Option<&PendingReport> {
        self.slot.as_ref()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slot.is_some()
    }

    #[must_use]
    pub fn replay_decision(&self, now: UnixTimeMs) -> ReplayDecision {
        match &self.slot {
            None => ReplayDecision::Empty,
            Some(report) if report.is_expired(now) => ReplayDecision::Expired,
            Some(_) => ReplayDecision::Ready,
        }
    }
}

// --- cache envelope ---

pub const CACHE_MAGIC: &str = "SGP1";
pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheCodecError {
    #[error("cached value is {len} bytes, maximum is {max}")]
    Oversized { len: usize, max: usize },

    #[error("bad magic: {found:?}")]
    BadMagic { found: String },

    #[error("schema version {found} is newer than supported version {max}")]
    FutureSchema { found: u32, max: u32 },

    #[error("no migration path from schema version {found}")]
    UnsupportedSchema { found: u32 },

    #[error("checksum mismatch: expected {expected}, found {found}")]
    IntegrityCheckFailed { expected: String, found: String },

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Wrapper written around every cached value. The checksum covers the
/// payload string; a mismatch means the stored bytes were corrupted and the
/// value is treated as absent rather than trusted.
#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    magic: String,
    schema_version: u32,
    checksum: String,
    payload: String,
}

pub fn seal_cache_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheCodecError> {
    let payload =
        serde_json::to_string(value).map_err(|e| CacheCodecError::Encode(e.to_string()))?;
    let envelope = CacheEnvelope {
        magic: CACHE_MAGIC.to_string(),
        schema_version: CACHE_SCHEMA_VERSION,
        checksum: hex::encode(blake3::hash(payload.as_bytes()).as_bytes()),
        payload,
    };
    let bytes =
        serde_json::to_vec(&envelope).map_err(|e| CacheCodecError::Encode(e.to_string()))?;
    if bytes.len() > MAX_CACHE_VALUE_BYTES {
        return Err(CacheCodecError::Oversized {
            len: bytes.len(),
            max: MAX_CACHE_VALUE_BYTES,
        });
    }
    Ok(bytes)
}

pub fn open_cache_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheCodecError> {
    if bytes.len() > MAX_CACHE_VALUE_BYTES {
        return Err(CacheCodecError::Oversized {
            len: bytes.len(),
            max: MAX_CACHE_VALUE_BYTES,
        });
    }
    let envelope: CacheEnvelope =
        serde_json::from_slice(bytes).map_err(|e| CacheCodecError::Decode(e.to_string()))?;
    if envelope.magic != CACHE_MAGIC {
        return Err(CacheCodecError::BadMagic {
            found: envelope.magic,
        });
    }
    if envelope.schema_version > CACHE_SCHEMA_VERSION {
        return Err(CacheCodecError::FutureSchema {
            found: envelope.schema_version,
            max: CACHE_SCHEMA_VERSION,
        });
    }
    let expected = hex::encode(blake3::hash(envelope.payload.as_bytes()).as_bytes());
    if expected != envelope.checksum {
        return Err(CacheCodecError::IntegrityCheckFailed {
            expected,
            found: envelope.checksum,
        });
    }
    let payload = migrate_payload(envelope.schema_version, envelope.payload)?;
    serde_json::from_str(&payload).map_err(|e| CacheCodecError::Decode(e.to_string()))
}

fn migrate_payload(from_version: u32, payload: String) -> Result<String, CacheCodecError> {
    // Single live schema so far. Older versions get a migration arm here
    // when the schema changes.
    match from_version {
        CACHE_SCHEMA_VERSION => Ok(payload),
        other => Err(CacheCodecError::UnsupportedSchema { found: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_at(enqueued_at: u64) -> PendingReport {
        PendingReport::new(
            ReportKind::Flood,
            "Water rising on the main road".into(),
            LatLon::new(14.6, 121.0).unwrap(),
            Some("Purok 5".into()),
            None,
            UnixTimeMs(enqueued_at),
        )
    }

    mod queue_tests {
        use super::*;

        #[test]
        fn test_enqueue_overwrites_previous() {
            let mut queue = OfflineQueue::new();
            assert!(queue.enqueue(pending_at(1_000)).is_none());

            let displaced = queue.enqueue(pending_at(2_000));
            assert_eq!(displaced.unwrap().enqueued_at, UnixTimeMs(1_000));
            assert_eq!(queue.peek().unwrap().enqueued_at, UnixTimeMs(2_000));
        }

        #[test]
        fn test_replay_decision_empty() {
            let queue = OfflineQueue::new();
            assert_eq!(queue.replay_decision(UnixTimeMs(0)), ReplayDecision::Empty);
        }

        #[test]
        fn test_replay_decision_at_window_edge() {
            let mut queue = OfflineQueue::new();
            queue.enqueue(pending_at(0));

            // Exactly thirty minutes old is still fresh.
            assert_eq!(
                queue.replay_decision(UnixTimeMs(OFFLINE_REPORT_EXPIRY_MS)),
                ReplayDecision::Ready
            );
            assert_eq!(
                queue.replay_decision(UnixTimeMs(OFFLINE_REPORT_EXPIRY_MS + 1)),
                ReplayDecision::Expired
            );
        }

        #[test]
        fn test_take_empties_slot() {
            let mut queue = OfflineQueue::new();
            queue.enqueue(pending_at(1_000));
            assert!(queue.take().is_some());
            assert!(!queue.has_pending());
            assert!(queue.take().is_none());
        }

        #[test]
        fn test_restore_only_into_empty_slot() {
            let mut queue = OfflineQueue::new();
            let old = pending_at(1_000);
            assert!(queue.restore(old.clone()));

            // A newer stash wins over a restored one.
            queue.enqueue(pending_at(2_000));
            assert!(!queue.restore(old));
            assert_eq!(queue.peek().unwrap().enqueued_at, UnixTimeMs(2_000));
        }

        #[test]
        fn test_expiry_uses_enqueue_time() {
            let report = pending_at(10_000);
            assert!(!report.is_expired(UnixTimeMs(10_000)));
            assert!(!report.is_expired(UnixTimeMs(5_000)));
            assert!(report.is_expired(UnixTimeMs(10_000 + OFFLINE_REPORT_EXPIRY_MS + 1)));
        }
    }

    mod envelope_tests {
        use super::*;

        #[test]
        fn test_seal_open_roundtrip() {
            let report = pending_at(42_000);
            let bytes = seal_cache_value(&report).unwrap();
            let restored: PendingReport = open_cache_value(&bytes).unwrap();
            assert_eq!(restored, report);
        }

        #[test]
        fn test_media_not_persisted() {
            let mut report = pending_at(42_000);
            report.media = Some(MediaAttachment {
                filename: "photo.jpg".into(),
                data: vec![0xFF, 0xD8, 0xFF, 0xE0],
            });

            let bytes = seal_cache_value(&report).unwrap();
            let restored: PendingReport = open_cache_value(&bytes).unwrap();
            assert!(restored.media.is_none());
        }

        #[test]
        fn test_corrupted_payload_fails_integrity() {
            let bytes = seal_cache_value(&pending_at(1_000)).unwrap();
            let mut envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            let tampered = envelope["payload"]
                .as_str()
                .unwrap()
                .replace("Water", "Fire!");
            envelope["payload"] = serde_json::Value::String(tampered);

            let result: Result<PendingReport, _> =
                open_cache_value(&serde_json::to_vec(&envelope).unwrap());
            assert!(matches!(
                result,
                Err(CacheCodecError::IntegrityCheckFailed { .. })
            ));
        }

        #[test]
        fn test_bad_magic_rejected() {
            let bytes = seal_cache_value(&pending_at(1_000)).unwrap();
            let mut envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            envelope["magic"] = serde_json::Value::String("XXXX".into());

            let result: Result<PendingReport, _> =
                open_cache_value(&serde_json::to_vec(&envelope).unwrap());
            assert!(matches!(result, Err(CacheCodecError::BadMagic { .. })));
        }

        #[test]
        fn test_future_schema_rejected() {
            let bytes = seal_cache_value(&pending_at(1_000)).unwrap();
            let mut envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            envelope["schema_version"] = serde_json::Value::from(CACHE_SCHEMA_VERSION + 1);

            let result: Result<PendingReport, _> =
                open_cache_value(&serde_json::to_vec(&envelope).unwrap());
            assert!(matches!(
                result,
                Err(CacheCodecError::FutureSchema { found, .. }) if found == CACHE_SCHEMA_VERSION + 1
            ));
        }

        #[test]
        fn test_garbage_bytes_fail_decode() {
            let result: Result<PendingReport, _> = open_cache_value(b"not json at all");
            assert!(matches!(result, Err(CacheCodecError::Decode(_))));
        }
    }
}
