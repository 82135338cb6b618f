use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::json;
use tryon_contracts::events::{EventPayload, EventWriter};
use tryon_contracts::images::{
    is_image_media_type, media_type_for_extension, normalize_media_type, ImageData,
    MAX_IMAGE_BYTES,
};
use tryon_contracts::proxies::{NamedProvider, ProxyList};

use crate::transport::{HttpTransport, TransportError};

const INVALID_IMAGE_MESSAGE: &str =
    "The fetched file is not a valid image. Ensure you're using a direct link to an image file.";
const RETRY_SUFFIX: &str = " Please try again or upload manually.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    EmptyUrl,
    Timeout,
    InvalidImage,
    Failed,
}

/// Why a single proxy attempt did not produce an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptCause {
    Transport(TransportError),
    Status(u16),
    InvalidImage(String),
}

impl AttemptCause {
    fn kind(&self) -> FetchFailureKind {
        match self {
            Self::Transport(err) if err.is_timeout() => FetchFailureKind::Timeout,
            Self::Status(408) => FetchFailureKind::Timeout,
            Self::InvalidImage(_) => FetchFailureKind::InvalidImage,
            Self::Transport(_) | Self::Status(_) => FetchFailureKind::Failed,
        }
    }
}

impl fmt::Display for AttemptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::Status(code) => write!(f, "HTTP status {code}"),
            Self::InvalidImage(reason) => write!(f, "not a valid image: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAttempt {
    pub proxy: String,
    pub cause: AttemptCause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FetchFailureKind,
    pub attempts: Vec<ProxyAttempt>,
}

impl FetchError {
    pub fn user_message(&self) -> String {
        match self.kind {
            FetchFailureKind::EmptyUrl => "Please enter a URL.".to_string(),
            FetchFailureKind::Timeout => format!(
                "Could not fetch image: The request timed out. The server may be busy.{RETRY_SUFFIX}"
            ),
            FetchFailureKind::InvalidImage => format!("{INVALID_IMAGE_MESSAGE}{RETRY_SUFFIX}"),
            FetchFailureKind::Failed => format!(
                "Could not fetch image. The URL may be invalid or protected.{RETRY_SUFFIX}"
            ),
        }
    }

    /// One `fetch_attempt_failed` event per proxy tried.
    pub fn record_attempts(&self, events: &EventWriter, target: &str) {
        for attempt in &self.attempts {
            let mut fields = EventPayload::new();
            fields.insert("url".to_string(), json!(target));
            fields.insert("proxy".to_string(), json!(attempt.proxy));
            fields.insert("cause".to_string(), json!(attempt.cause.to_string()));
            events.record("fetch_attempt_failed", fields);
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())?;
        for attempt in &self.attempts {
            write!(f, " [{}: {}]", attempt.proxy, attempt.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {}

/// Fetches remote images through pass-through proxies, in order, until one
/// returns a usable image.
#[derive(Clone)]
pub struct RemoteImageFetcher {
    proxies: ProxyList,
    timeout: Duration,
    transport: Arc<dyn HttpTransport>,
}

impl RemoteImageFetcher {
    pub fn new(proxies: ProxyList, timeout: Duration, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            proxies,
            timeout,
            transport,
        }
    }

    pub fn fetch(&self, url: &str) -> Result<ImageData, FetchError> {
        let target = url.trim();
        if target.is_empty() {
            return Err(FetchError {
                kind: FetchFailureKind::EmptyUrl,
                attempts: Vec::new(),
            });
        }

        let mut attempts = Vec::new();
        for proxy in self.proxies.providers() {
            match self.try_proxy(&proxy.request_url(target), target) {
                Ok(image) => return Ok(image),
                Err(cause) => attempts.push(ProxyAttempt {
                    proxy: proxy.name().to_string(),
                    cause,
                }),
            }
        }

        let kind = attempts
            .last()
            .map(|attempt| attempt.cause.kind())
            .unwrap_or(FetchFailureKind::Failed);
        Err(FetchError { kind, attempts })
    }

    fn try_proxy(&self, request_url: &str, target: &str) -> Result<ImageData, AttemptCause> {
        let reply = self
            .transport
            .get(request_url, self.timeout, MAX_IMAGE_BYTES)
            .map_err(|err| match err {
                TransportError::BodyTooLarge { .. } => AttemptCause::InvalidImage(err.to_string()),
                err => AttemptCause::Transport(err),
            })?;
        if !reply.is_success() {
            return Err(AttemptCause::Status(reply.status));
        }

        let media_type = reply
            .content_type
            .as_deref()
            .map(normalize_media_type)
            .filter(|value| is_image_media_type(value))
            .or_else(|| media_type_from_url(target).map(str::to_string))
            .ok_or_else(|| {
                AttemptCause::InvalidImage(format!(
                    "content type {}",
                    reply.content_type.as_deref().unwrap_or("missing")
                ))
            })?;

        ImageData::new(reply.body, media_type)
            .map_err(|err| AttemptCause::InvalidImage(err.to_string()))
    }
}

/// Media type implied by the extension of the URL path, if any.
pub fn media_type_from_url(url: &str) -> Option<&'static str> {
    let parsed = Url::parse(url.trim()).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    media_type_for_extension(ext)
}
