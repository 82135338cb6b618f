use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Upper bound for a single inline image payload accepted by the edit API.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDataError {
    NotAnImage { media_type: String },
    EmptyPayload,
    TooLarge { bytes: usize },
    InvalidEncoding(String),
}

impl fmt::Display for ImageDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnImage { media_type } if media_type.is_empty() => {
                write!(f, "missing media type; expected image/*")
            }
            Self::NotAnImage { media_type } => {
                write!(f, "media type '{media_type}' is not an image type")
            }
            Self::EmptyPayload => write!(f, "image payload is empty"),
            Self::TooLarge { bytes } => write!(
                f,
                "image payload is {bytes} bytes; the limit is {MAX_IMAGE_BYTES} bytes"
            ),
            Self::InvalidEncoding(reason) => write!(f, "invalid image encoding: {reason}"),
        }
    }
}

impl std::error::Error for ImageDataError {}

/// An image held in memory: raw bytes plus an `image/*` media type.
///
/// Construction always validates, so a value of this type is never empty,
/// never larger than [`MAX_IMAGE_BYTES`], and always carries an image type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    bytes: Vec<u8>,
    media_type: String,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Result<Self, ImageDataError> {
        let media_type = normalize_media_type(&media_type.into());
        if !is_image_media_type(&media_type) {
            return Err(ImageDataError::NotAnImage { media_type });
        }
        if bytes.is_empty() {
            return Err(ImageDataError::EmptyPayload);
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageDataError::TooLarge { bytes: bytes.len() });
        }
        Ok(Self { bytes, media_type })
    }

    pub fn from_base64(payload: &str, media_type: &str) -> Result<Self, ImageDataError> {
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|err| ImageDataError::InvalidEncoding(err.to_string()))?;
        Self::new(bytes, media_type)
    }

    /// Parses `data:<media_type>;base64,<payload>`.
    pub fn from_data_uri(uri: &str) -> Result<Self, ImageDataError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| ImageDataError::InvalidEncoding("missing 'data:' prefix".into()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| ImageDataError::InvalidEncoding("missing ',' separator".into()))?;
        let mut meta_parts = meta.split(';');
        let media_type = meta_parts.next().unwrap_or_default().trim().to_string();
        if !meta_parts.any(|part| part.trim().eq_ignore_ascii_case("base64")) {
            return Err(ImageDataError::InvalidEncoding(
                "only base64 payloads are supported".into(),
            ));
        }
        Self::from_base64(payload, &media_type)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.to_base64())
    }

    /// Hex SHA-256 of the payload, used to identify images in the event log.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("media_type", &self.media_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

pub fn is_image_media_type(media_type: &str) -> bool {
    media_type.len() > "image/".len() && media_type.starts_with("image/")
}

/// Drops parameters (`; charset=...`) and lower-cases a content type.
pub fn normalize_media_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|value| value.to_str())
        .and_then(media_type_for_extension)
}
