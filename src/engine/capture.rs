//! Image-capture collaborator contract.

use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;

use crate::data::models::ElementInfo;

/// Error from a capture host.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("image payload not decodable: {0}")]
    Undecodable(String),
}

/// Opaque image payload as delivered by a capture host.
///
/// Browser capture APIs commonly hand back a base64 data URL; native hosts
/// hand back raw bytes. Both normalize through [`ImagePayload::into_bytes`].
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// Raw encoded image bytes plus their media type.
    Bytes {
        bytes: Vec<u8>,
        media_type: String,
    },
    /// A `data:<media type>;base64,<payload>` URL.
    DataUrl(String),
}

impl ImagePayload {
    /// Normalize to raw bytes and a media type.
    pub fn into_bytes(self) -> Result<(Vec<u8>, String), CaptureError> {
        match self {
            ImagePayload::Bytes { bytes, media_type } => Ok((bytes, media_type)),
            ImagePayload::DataUrl(url) => {
                let rest = url
                    .strip_prefix("data:")
                    .ok_or_else(|| CaptureError::Undecodable("missing data: prefix".into()))?;
                let (head, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| CaptureError::Undecodable("missing payload separator".into()))?;
                let media_type = head
                    .strip_suffix(";base64")
                    .ok_or_else(|| CaptureError::Undecodable("payload is not base64".into()))?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(payload)
                    .map_err(|e| CaptureError::Undecodable(e.to_string()))?;
                let media_type = if media_type.is_empty() {
                    "image/png".to_string()
                } else {
                    media_type.to_string()
                };
                Ok((bytes, media_type))
            }
        }
    }
}

/// Capture host the engine asks for view images.
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    /// Capture the currently visible view for `owner`, focused on `element`
    /// when one is known.
    async fn capture(
        &self,
        owner: &str,
        element: Option<&ElementInfo>,
    ) -> Result<ImagePayload, CaptureError>;
}
