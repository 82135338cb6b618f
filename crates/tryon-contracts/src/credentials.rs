use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde_json::{Map, Value};

/// Storage slot name for the Gemini API key.
pub const CREDENTIAL_SLOT: &str = "gemini-api-key";

/// An API key. Never empty; `Debug` and `Display` do not reveal the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short masked form for status output, e.g. `AIza…(39 chars)`.
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}…({} chars)", self.0.chars().count())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

pub trait CredentialStore: Send {
    fn load(&mut self) -> anyhow::Result<Option<Credential>>;
    fn save(&mut self, credential: &Credential) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// Credential slot kept in a JSON object file.
///
/// Other keys in the file are preserved on write, and every read goes back
/// to disk so two handles on the same file stay consistent.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `$TRYON_HOME/credentials.json`, else `$HOME/.tryon/credentials.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(home) = non_empty_env("TRYON_HOME") {
            return Some(PathBuf::from(home).join("credentials.json"));
        }
        non_empty_env("HOME").map(|home| PathBuf::from(home).join(".tryon").join("credentials.json"))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&mut self) -> anyhow::Result<Option<Credential>> {
        let payload = read_json_object(&self.path)?;
        Ok(payload
            .get(CREDENTIAL_SLOT)
            .and_then(Value::as_str)
            .and_then(Credential::parse))
    }

    fn save(&mut self, credential: &Credential) -> anyhow::Result<()> {
        let mut payload = read_json_object(&self.path)?;
        payload.insert(
            CREDENTIAL_SLOT.to_string(),
            Value::String(credential.expose().to_string()),
        );
        write_json_object(&self.path, &payload)
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        let mut payload = read_json_object(&self.path)?;
        if payload.remove(CREDENTIAL_SLOT).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &payload)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    value: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<Credential>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Option<Credential> {
        self.value.lock().ok().and_then(|guard| guard.clone())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&mut self) -> anyhow::Result<Option<Credential>> {
        Ok(self.current())
    }

    fn save(&mut self, credential: &Credential) -> anyhow::Result<()> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store lock poisoned"))?;
        *guard = Some(credential.clone());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store lock poisoned"))?;
        *guard = None;
        Ok(())
    }
}

/// A missing file reads as an empty object; a corrupt one is an error.
fn read_json_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("credential file {} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("credential file {} must hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(&Value::Object(payload.clone()))?;
    let mut file = owner_only_options()
        .open(path)
        .with_context(|| format!("failed opening {}", path.display()))?;
    restrict_to_owner(&file)
        .with_context(|| format!("failed restricting permissions on {}", path.display()))?;
    file.write_all(raw.as_bytes())
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

fn owner_only_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

/// `mode` only applies on creation; tighten files written by older builds.
#[cfg(unix)]
fn restrict_to_owner(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &File) -> std::io::Result<()> {
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn credential_parse_trims_and_rejects_blank() {
        assert_eq!(
            Credential::parse("  key-123 \n").map(|c| c.expose().to_string()),
            Some("key-123".to_string())
        );
        assert!(Credential::parse("   ").is_none());
        assert!(Credential::parse("").is_none());
    }

    #[test]
    fn credential_formatting_never_reveals_value() {
        let credential = Credential::parse("AIzaSecretValue").expect("credential");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        assert_eq!(credential.to_string(), "AIza…(15 chars)");
    }

    #[test]
    fn file_store_round_trips_and_clears() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("credentials.json");
        let mut store = FileCredentialStore::new(&path);

        assert_eq!(store.load()?, None);
        store.save(&Credential::parse("abc").expect("credential"))?;
        assert_eq!(store.load()?.map(|c| c.expose().to_string()), Some("abc".into()));

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(on_disk[CREDENTIAL_SLOT], json!("abc"));

        store.clear()?;
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_readable_by_owner_only() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        let mut store = FileCredentialStore::new(&path);
        store.save(&Credential::parse("abc").expect("credential"))?;
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        store.save(&Credential::parse("def").expect("credential"))?;
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn file_store_preserves_unrelated_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        fs::write(&path, r#"{"other": {"value": 1}}"#)?;

        let mut store = FileCredentialStore::new(&path);
        store.save(&Credential::parse("abc").expect("credential"))?;
        store.clear()?;

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(on_disk, json!({"other": {"value": 1}}));
        Ok(())
    }

    #[test]
    fn file_store_handles_see_each_others_writes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        let mut store_a = FileCredentialStore::new(&path);
        let mut store_b = FileCredentialStore::new(&path);

        store_a.save(&Credential::parse("first").expect("credential"))?;
        assert_eq!(
            store_b.load()?.map(|c| c.expose().to_string()),
            Some("first".into())
        );
        store_b.clear()?;
        assert_eq!(store_a.load()?, None);
        Ok(())
    }

    #[test]
    fn file_store_ignores_blank_stored_value() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        fs::write(&path, format!(r#"{{"{CREDENTIAL_SLOT}": "   "}}"#))?;
        assert_eq!(FileCredentialStore::new(&path).load()?, None);
        Ok(())
    }

    #[test]
    fn file_store_reports_corrupt_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        fs::write(&path, "[1, 2]")?;
        assert!(FileCredentialStore::new(&path).load().is_err());
        Ok(())
    }

    #[test]
    fn memory_store_round_trips() -> anyhow::Result<()> {
        let mut store = MemoryCredentialStore::new(None);
        assert_eq!(store.load()?, None);
        store.save(&Credential::parse("k").expect("credential"))?;
        assert!(store.current().is_some());
        store.clear()?;
        assert_eq!(store.load()?, None);
        Ok(())
    }
}
