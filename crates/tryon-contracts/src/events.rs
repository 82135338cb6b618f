use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::images::ImageData;

pub type EventPayload = Map<String, Value>;

/// Append-only structured log written as `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// A writer built with [`EventWriter::disabled`] builds the same event
/// objects but never touches the filesystem.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), session_id.into())
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::build(None, session_id.into())
    }

    fn build(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                session_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Like [`EventWriter::emit`], but a write failure is reported on stderr
    /// instead of aborting the operation being logged.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            eprintln!("tryon: failed to record {event_type} event: {err:#}");
        }
    }
}

/// Fields describing an image without its payload.
pub fn image_fields(image: &ImageData) -> EventPayload {
    let mut fields = EventPayload::new();
    fields.insert(
        "media_type".to_string(),
        Value::String(image.media_type().to_string()),
    );
    fields.insert("bytes".to_string(), Value::from(image.len()));
    fields.insert("sha256".to_string(), Value::String(image.sha256_hex()));
    fields
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("slot".to_string(), Value::String("person".to_string()));
        let emitted = writer.emit("input_set", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("input_set"));
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["slot"], json!("person"));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("session-123");
        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), json!("override"));
        let emitted = writer.emit("generation_started", payload)?;
        assert_eq!(emitted["session_id"], json!("override"));
        assert_eq!(emitted["type"], json!("generation_started"));
        Ok(())
    }

    #[test]
    fn emit_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.emit("one", EventPayload::new())?;
        writer.record("two", EventPayload::new());

        let content = fs::read_to_string(&path)?;
        let types: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).map(|v| v["type"].clone()))
            .collect::<Result<_, _>>()?;
        assert_eq!(types, vec![json!("one"), json!("two")]);
        Ok(())
    }

    #[test]
    fn disabled_writer_touches_no_files() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("s");
        assert!(writer.path().is_none());
        let emitted = writer.emit("session_started", EventPayload::new())?;
        assert_eq!(emitted["type"], json!("session_started"));
        Ok(())
    }

    #[test]
    fn image_fields_describe_without_payload() {
        let image = ImageData::new(b"abc".to_vec(), "image/png").expect("valid");
        let fields = image_fields(&image);
        assert_eq!(fields["media_type"], json!("image/png"));
        assert_eq!(fields["bytes"], json!(3));
        assert_eq!(fields.len(), 3);
    }
}
