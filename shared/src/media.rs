//! Media attachment preparation for report submission.
//!
//! Photos are decoded under strict limits, downscaled and re-encoded as JPEG
//! before upload. Videos pass through untouched apart from a size cap. The
//! format is sniffed from magic bytes; the shell-declared filename is only
//! used (sanitized) for the blob path.

use std::fmt;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageReader, Limits};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ReportId;

pub const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 25 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 8_000;
pub const MAX_IMAGE_PIXELS: u64 = 40_000_000;
pub const MAX_DECODE_ALLOC_BYTES: u64 = 256 * 1024 * 1024;
pub const OUTPUT_MAX_WIDTH: u32 = 1_600;
pub const OUTPUT_MAX_HEIGHT: u32 = 1_600;
pub const JPEG_QUALITY: u8 = 80;
pub const MAX_FILENAME_LENGTH: usize = 64;

/// Raw attachment handed over by the shell.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub filename: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Jpeg,
    Png,
    WebP,
    Video,
}

impl MediaFormat {
    /// Sniffs the container from magic bytes. Returns `None` for anything
    /// this app does not accept.
    #[must_use]
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() >= 3 && data[0..3] == [0xFF, 0xD8, 0xFF] {
            return Some(MediaFormat::Jpeg);
        }
        if data.len() >= 8 && data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
            return Some(MediaFormat::Png);
        }
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Some(MediaFormat::WebP);
        }
        if data.len() >= 12 && &data[4..8] == b"ftyp" {
            return Some(MediaFormat::Video);
        }
        None
    }

    #[must_use]
    pub const fn is_video(self) -> bool {
        matches!(self, MediaFormat::Video)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("attachment is empty")]
    Empty,

    #[error("attachment is {len} bytes, maximum is {max}")]
    TooLarge { len: usize, max: usize },

    #[error("unrecognized media format")]
    UnsupportedFormat,

    #[error("image is {width}x{height}, which exceeds the pixel budget")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("image encode failed: {0}")]
    Encode(String),
}

/// Upload-ready bytes plus where to put them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedMedia {
    pub path: String,
    pub content_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl fmt::Debug for PreparedMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedMedia")
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub fn prepare_media(
    attachment: &MediaAttachment,
    report_id: &ReportId,
) -> Result<PreparedMedia, MediaError> {
    if attachment.data.is_empty() {
        return Err(MediaError::Empty);
    }
    let format =
        MediaFormat::from_magic_bytes(&attachment.data).ok_or(MediaError::UnsupportedFormat)?;

    if format.is_video() {
        if attachment.data.len() > MAX_VIDEO_BYTES {
            return Err(MediaError::TooLarge {
                len: attachment.data.len(),
                max: MAX_VIDEO_BYTES,
            });
        }
        let name = sanitize_filename(&attachment.filename);
        return Ok(PreparedMedia {
            path: blob_path(report_id, &name),
            content_type: video_content_type(&attachment.data).to_string(),
            data: attachment.data.clone(),
        });
    }

    if attachment.data.len() > MAX_PHOTO_BYTES {
        return Err(MediaError::TooLarge {
            len: attachment.data.len(),
            max: MAX_PHOTO_BYTES,
        });
    }

    let mut reader = ImageReader::new(Cursor::new(&attachment.data))
        .with_guessed_format()
        .map_err(|e| MediaError::Decode(e.to_string()))?;
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC_BYTES);
    reader.limits(limits);

    let img = reader
        .decode()
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    if u64::from(width) * u64::from(height) > MAX_IMAGE_PIXELS {
        return Err(MediaError::DimensionsTooLarge { width, height });
    }

    let img = if width > OUTPUT_MAX_WIDTH || height > OUTPUT_MAX_HEIGHT {
        img.resize(OUTPUT_MAX_WIDTH, OUTPUT_MAX_HEIGHT, FilterType::Triangle)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    // A valid JPEG stream always starts with the SOI marker.
    if out.len() < 3 || out[0..3] != [0xFF, 0xD8, 0xFF] {
        return Err(MediaError::Encode("output is not a JPEG stream".into()));
    }

    let name = jpeg_filename(&sanitize_filename(&attachment.filename));
    Ok(PreparedMedia {
        path: blob_path(report_id, &name),
        content_type: "image/jpeg".to_string(),
        data: out,
    })
}

fn blob_path(report_id: &ReportId, filename: &str) -> String {
    format!("media/{}/{}", report_id.as_str(), filename)
}

fn video_content_type(data: &[u8]) -> &'static str {
    match data.get(8..12) {
        Some(b"qt  ") => "video/quicktime",
        Some(brand) if brand.starts_with(b"3gp") => "video/3gpp",
        _ => "video/mp4",
    }
}

fn jpeg_filename(sanitized: &str) -> String {
    let stem = sanitized
        .rsplit_once('.')
        .map_or(sanitized, |(stem, _)| stem);
    format!("{stem}.jpg")
}

/// Keeps ASCII alphanumerics, dots, dashes and underscores; everything else
/// becomes an underscore. Leading dots are stripped so a name can never
/// start a hidden or relative path segment.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(['.', '_', '-']);
    let capped: String = trimmed.chars().take(MAX_FILENAME_LENGTH).collect();
    if capped.is_empty() {
        "upload".to_string()
    } else {
        capped
    }
}
