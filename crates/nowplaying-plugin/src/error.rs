use thiserror::Error;

/// Failures talking to a playback backend.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not authenticated with {0}")]
    NeedsAuth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected payload: {0}")]
    Malformed(String),
    #[error("{0} is not reachable")]
    NotConnected(String),
    #[error("{backend} does not support {feature}")]
    Unsupported {
        backend: &'static str,
        feature: &'static str,
    },
}

impl SourceError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::NeedsAuth(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("key is too small to draw ({width}x{height})")]
    Degenerate { width: u32, height: u32 },
}
