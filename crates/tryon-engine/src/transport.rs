use std::fmt;
use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Cap on API response bodies. Generated images arrive base64-encoded inside
/// JSON, so this sits well above the image limit.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// The request never produced a usable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout(String),
    Network(String),
    BodyTooLarge { limit: usize },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(message) => write!(f, "request timed out: {message}"),
            Self::Network(message) => write!(f, "request failed: {message}"),
            Self::BodyTooLarge { limit } => {
                write!(f, "response body exceeds {limit} bytes")
            }
        }
    }
}

impl std::error::Error for TransportError {}

pub trait HttpTransport: Send + Sync {
    /// Bodies longer than `max_bytes` fail with [`TransportError::BodyTooLarge`].
    fn get(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpReply, TransportError>;

    fn post_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        payload: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }

    fn finish(
        response: reqwest::Result<reqwest::blocking::Response>,
        max_bytes: usize,
    ) -> Result<HttpReply, TransportError> {
        let response = response.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let declared = response.content_length();
        let body = read_limited(response, declared, max_bytes)?;
        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpReply, TransportError> {
        Self::finish(self.http.get(url).timeout(timeout).send(), max_bytes)
    }

    fn post_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        payload: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        Self::finish(
            self.http
                .post(url)
                .query(query)
                .timeout(timeout)
                .json(payload)
                .send(),
            MAX_RESPONSE_BYTES,
        )
    }
}

/// Reads at most `limit` bytes. A declared length over the limit is refused
/// before anything is read.
pub fn read_limited(
    reader: impl Read,
    declared: Option<u64>,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(TransportError::BodyTooLarge { limit });
    }
    let mut body = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut body)
        .map_err(map_read_error)?;
    if body.len() > limit {
        return Err(TransportError::BodyTooLarge { limit });
    }
    Ok(body)
}

fn map_read_error(err: std::io::Error) -> TransportError {
    let timed_out = err.kind() == std::io::ErrorKind::TimedOut
        || err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(reqwest::Error::is_timeout);
    if timed_out {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let timed_out = err.is_timeout();
    // Proxy and API URLs carry the target or the key; keep them out of messages.
    let message = err.without_url().to_string();
    if timed_out {
        TransportError::Timeout(message)
    } else {
        TransportError::Network(message)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_success_range() {
        let ok = testing::reply(204, None, b"");
        let moved = testing::reply(302, None, b"");
        assert!(ok.is_success());
        assert!(!moved.is_success());
        assert_eq!(testing::reply(500, None, b"boom").body_text(), "boom");
    }

    #[test]
    fn timeout_classification() {
        assert!(TransportError::Timeout("x".into()).is_timeout());
        assert!(!TransportError::Network("x".into()).is_timeout());
    }

    #[test]
    fn scripted_transport_records_and_runs_dry() {
        let transport = testing::ScriptedTransport::new(vec![Ok(testing::reply(200, None, b"a"))]);
        let first = transport.get("https://one.test", Duration::from_secs(1), 16);
        let second = transport.get("https://two.test", Duration::from_secs(2), 16);
        assert_eq!(first.map(|row| row.body), Ok(b"a".to_vec()));
        assert!(matches!(second, Err(TransportError::Network(_))));
        let urls: Vec<String> = transport.requests().into_iter().map(|row| row.url).collect();
        assert_eq!(urls, vec!["https://one.test", "https://two.test"]);
    }

    #[test]
    fn read_limited_refuses_declared_oversize_without_reading() {
        let mut reader: &[u8] = b"0123456789";
        let result = read_limited(&mut reader, Some(10), 4);
        assert_eq!(result, Err(TransportError::BodyTooLarge { limit: 4 }));
        assert_eq!(reader.len(), 10);
    }

    #[test]
    fn read_limited_caps_undeclared_bodies() {
        assert_eq!(
            read_limited(&b"0123456789"[..], None, 4),
            Err(TransportError::BodyTooLarge { limit: 4 })
        );
        assert_eq!(read_limited(&b"0123"[..], None, 4), Ok(b"0123".to_vec()));
        assert_eq!(read_limited(&b"0123"[..], Some(4), 4), Ok(b"0123".to_vec()));
    }
}
