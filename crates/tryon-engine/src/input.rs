use std::fmt;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use tryon_contracts::images::{media_type_for_path, ImageData, MAX_IMAGE_BYTES};

use crate::fetch::{FetchError, RemoteImageFetcher};

/// Where an input image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Url(String),
}

impl ImageSource {
    /// `http://` and `https://` arguments are URLs, anything else a path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }
}

#[derive(Debug)]
pub enum InputError {
    NotAnImage(PathBuf),
    Unreadable { path: PathBuf, source: io::Error },
    TooLarge { path: PathBuf, bytes: u64 },
    Empty(PathBuf),
    Fetch(FetchError),
}

impl InputError {
    pub fn user_message(&self) -> String {
        match self {
            Self::NotAnImage(_) => "Please upload an image file.".to_string(),
            Self::Unreadable { path, .. } => {
                format!("Could not read {}. Check the path and try again.", path.display())
            }
            Self::TooLarge { .. } => format!(
                "The image is too large. Please use an image under {} MB.",
                MAX_IMAGE_BYTES / (1024 * 1024)
            ),
            Self::Empty(path) => format!("{} is empty. Please upload an image file.", path.display()),
            Self::Fetch(err) => err.user_message(),
        }
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Self::Fetch(err) => write!(f, "{err}"),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for InputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            Self::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FetchError> for InputError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

/// Turns a local file or a remote URL into [`ImageData`]. Never touches
/// session state.
#[derive(Clone)]
pub struct ImageInputAdapter {
    fetcher: RemoteImageFetcher,
}

impl ImageInputAdapter {
    pub fn new(fetcher: RemoteImageFetcher) -> Self {
        Self { fetcher }
    }

    pub fn load(&self, source: &ImageSource) -> Result<ImageData, InputError> {
        match source {
            ImageSource::File(path) => self.from_file(path),
            ImageSource::Url(url) => self.from_url(url),
        }
    }

    pub fn from_file(&self, path: &Path) -> Result<ImageData, InputError> {
        let media_type =
            media_type_for_path(path).ok_or_else(|| InputError::NotAnImage(path.to_path_buf()))?;
        let unreadable = |source| InputError::Unreadable {
            path: path.to_path_buf(),
            source,
        };
        let size = fs::metadata(path).map_err(unreadable)?.len();
        if size > MAX_IMAGE_BYTES as u64 {
            return Err(InputError::TooLarge {
                path: path.to_path_buf(),
                bytes: size,
            });
        }
        let bytes = fs::read(path).map_err(unreadable)?;
        if bytes.is_empty() {
            return Err(InputError::Empty(path.to_path_buf()));
        }
        ImageData::new(bytes, media_type).map_err(|_| InputError::NotAnImage(path.to_path_buf()))
    }

    pub fn from_url(&self, url: &str) -> Result<ImageData, InputError> {
        Ok(self.fetcher.fetch(url)?)
    }
}

/// Pixel dimensions, when the payload decodes as a known format.
pub fn image_dimensions(image: &ImageData) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(image.bytes()))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use tryon_contracts::proxies::default_proxies;

    use super::*;
    use crate::fetch::FetchFailureKind;
    use crate::test_support::png_bytes;
    use crate::transport::testing::{reply, ScriptedTransport};
    use crate::transport::TransportError;

    fn adapter(transport: Arc<ScriptedTransport>) -> ImageInputAdapter {
        ImageInputAdapter::new(RemoteImageFetcher::new(
            default_proxies(),
            Duration::from_secs(15),
            transport,
        ))
    }

    #[test]
    fn parse_source_by_scheme() {
        assert_eq!(
            ImageSource::parse(" HTTPS://img.example/a.png "),
            ImageSource::Url("HTTPS://img.example/a.png".to_string())
        );
        assert_eq!(
            ImageSource::parse("http://img.example/a.png"),
            ImageSource::Url("http://img.example/a.png".to_string())
        );
        assert_eq!(
            ImageSource::parse("photos/me.jpg"),
            ImageSource::File(PathBuf::from("photos/me.jpg"))
        );
        assert_eq!(
            ImageSource::parse("ftp://img.example/a.png"),
            ImageSource::File(PathBuf::from("ftp://img.example/a.png"))
        );
    }

    #[test]
    fn loads_local_png_with_dimensions() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("person.png");
        fs::write(&path, png_bytes(12, 7))?;

        let image = adapter(Arc::new(ScriptedTransport::default()))
            .load(&ImageSource::File(path))?;
        assert_eq!(image.media_type(), "image/png");
        assert_eq!(image_dimensions(&image), Some((12, 7)));
        Ok(())
    }

    #[test]
    fn loaded_file_survives_data_uri_round_trip() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("garment.JPEG");
        let payload = b"\xff\xd8\xff\xe0jpeg-body".to_vec();
        fs::write(&path, &payload)?;

        let loaded = adapter(Arc::new(ScriptedTransport::default())).from_file(&path)?;
        let decoded = ImageData::from_data_uri(&loaded.to_data_uri())?;
        assert_eq!(decoded.bytes(), payload.as_slice());
        assert_eq!(decoded.media_type(), "image/jpeg");
        assert_eq!(decoded, loaded);
        Ok(())
    }

    #[test]
    fn rejects_non_image_extension() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"hello")?;

        let err = adapter(Arc::new(ScriptedTransport::default()))
            .from_file(&path)
            .expect_err("text file");
        assert!(matches!(err, InputError::NotAnImage(_)));
        assert_eq!(err.user_message(), "Please upload an image file.");
        Ok(())
    }

    #[test]
    fn rejects_empty_and_missing_files_distinctly() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let empty = temp.path().join("blank.png");
        fs::write(&empty, b"")?;
        let missing = temp.path().join("missing.jpg");
        let loader = adapter(Arc::new(ScriptedTransport::default()));

        let empty_err = loader.from_file(&empty).expect_err("empty file");
        let missing_err = loader.from_file(&missing).expect_err("missing file");
        assert!(matches!(empty_err, InputError::Empty(_)));
        assert!(matches!(missing_err, InputError::Unreadable { .. }));
        assert_ne!(empty_err.user_message(), missing_err.user_message());
        Ok(())
    }

    #[test]
    fn rejects_oversized_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("huge.png");
        let file = fs::File::create(&path)?;
        file.set_len(MAX_IMAGE_BYTES as u64 + 1)?;

        let err = adapter(Arc::new(ScriptedTransport::default()))
            .from_file(&path)
            .expect_err("too large");
        assert!(matches!(err, InputError::TooLarge { .. }));
        assert!(err.user_message().contains("20 MB"));
        Ok(())
    }

    #[test]
    fn url_source_goes_through_proxies() -> Result<()> {
        let body = png_bytes(3, 3);
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(reply(
            200,
            Some("image/png"),
            &body,
        ))]));
        let image = adapter(transport.clone())
            .load(&ImageSource::parse("https://img.example/top.png"))?;
        assert_eq!(image.bytes(), body.as_slice());
        assert_eq!(transport.requests().len(), 1);
        Ok(())
    }

    #[test]
    fn url_failure_carries_fetch_message() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Timeout("a".into())),
            Err(TransportError::Timeout("b".into())),
        ]));
        let err = adapter(transport)
            .from_url("https://img.example/top.png")
            .expect_err("timeouts");
        match &err {
            InputError::Fetch(fetch) => assert_eq!(fetch.kind, FetchFailureKind::Timeout),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.user_message().starts_with("Could not fetch image: The request timed out."));
    }

    #[test]
    fn undecodable_payload_has_no_dimensions() {
        let image = ImageData::new(b"not really a png".to_vec(), "image/png").expect("image data");
        assert_eq!(image_dimensions(&image), None);
    }
}
