//! Blob upload capability.
//!
//! Uploads prepared media bytes to shell-managed blob storage and reports
//! back the public URL. Upload failure never blocks a report; the caller
//! degrades to an empty media reference.

use crux_core::capability::{CapabilityContext, Operation};
use crux_core::macros::Capability;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "op", content = "data")]
pub enum BlobOperation {
    Upload {
        path: String,
        content_type: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl Operation for BlobOperation {
    type Output = BlobResult;
}

pub type BlobResult = Result<BlobOutput, BlobError>;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "type", content = "data")]
pub enum BlobOutput {
    Uploaded { url: String },
}

impl BlobOutput {
    /// The uploaded URL, accepted only if it parses as a fetchable http(s)
    /// URL. The reference is persisted into the report document, so a
    /// malformed one is treated as a rejected upload.
    pub fn into_fetchable_url(self) -> Result<String, BlobError> {
        let BlobOutput::Uploaded { url } = self;
        match url::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url),
            Ok(parsed) => Err(BlobError::rejected(format!(
                "unsupported scheme `{}`",
                parsed.scheme()
            ))),
            Err(e) => Err(BlobError::rejected(format!("malformed url: {e}"))),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Error)]
pub enum BlobError {
    #[error("network failure during upload: {message}")]
    Network { message: String },

    #[error("upload rejected: {message}")]
    Rejected { message: String },

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload failed: {message}")]
    Internal { message: String },
}

impl BlobError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            BlobError::Network { .. } => true,
            BlobError::Rejected { .. } | BlobError::Cancelled | BlobError::Internal { .. } => false,
        }
    }
}

#[derive(Capability)]
pub struct Blob<Ev> {
    context: CapabilityContext<BlobOperation, Ev>,
}

impl<Ev> Blob<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<BlobOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn upload<F>(&self, path: String, content_type: String, data: Vec<u8>, make_event: F)
    where
        F: FnOnce(BlobResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let response = ctx
                .request_from_shell(BlobOperation::Upload {
                    path,
                    content_type,
                    data,
                })
                .await;
            ctx.update_app(make_event(response));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(BlobError::network("timed out").is_retryable());
        assert!(!BlobError::rejected("too large").is_retryable());
        assert!(!BlobError::Cancelled.is_retryable());
    }

    #[test]
    fn test_uploaded_url_must_be_fetchable() {
        let ok = BlobOutput::Uploaded {
            url: "https://cdn.example.com/media/scene.jpg".into(),
        };
        assert_eq!(
            ok.into_fetchable_url().unwrap(),
            "https://cdn.example.com/media/scene.jpg"
        );

        let bad_scheme = BlobOutput::Uploaded {
            url: "file:///etc/hosts".into(),
        };
        assert!(bad_scheme.into_fetchable_url().is_err());

        let garbage = BlobOutput::Uploaded {
            url: "not a url".into(),
        };
        assert!(garbage.into_fetchable_url().is_err());
    }

    #[test]
    fn test_operation_wire_shape() {
        let op = BlobOperation::Upload {
            path: "media/SOS-1/scene.jpg".into(),
            content_type: "image/jpeg".into(),
            data: vec![0xFF, 0xD8, 0xFF],
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "Upload");
        assert_eq!(json["data"]["path"], "media/SOS-1/scene.jpg");
        assert_eq!(json["data"]["content_type"], "image/jpeg");
    }
}
