use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tryon_contracts::credentials::{Credential, CredentialStore};
use tryon_contracts::events::{image_fields, EventPayload, EventWriter};
use tryon_contracts::garments::{GarmentSet, InputSlot};
use tryon_contracts::images::ImageData;

use crate::compose::{compose, GenerationRequest};
use crate::gemini::{GenerationError, ImageEditor};
use crate::output::save_output;

pub const SOFT_FAILURE_MESSAGE: &str =
    "The AI could not generate an image. Please try different images.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastOutcome {
    Output(ImageData),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingCredential { notice: Option<String> },
    Ready { last: Option<LastOutcome> },
    Generating { started_at: Instant },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingCredential { .. } => "awaiting_credential",
            Self::Ready { .. } => "ready",
            Self::Generating { .. } => "generating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    MissingCredential,
    MissingPerson,
    MissingGarment,
}

impl ValidationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingCredential => "API key is not set. Enter your Gemini API key to continue.",
            Self::MissingPerson => "Please upload a photo of a person.",
            Self::MissingGarment => "Please upload at least one clothing item.",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MissingPerson => "missing_person",
            Self::MissingGarment => "missing_garment",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    AlreadyGenerating,
    Validation(ValidationError),
}

impl SubmitRejection {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyGenerating => "A try-on is already being generated. Please wait.",
            Self::Validation(err) => err.user_message(),
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyGenerating => "already_generating",
            Self::Validation(err) => err.reason(),
        }
    }
}

impl fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

impl std::error::Error for SubmitRejection {}

/// Inputs and the stored key cannot change while a generation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBusy;

impl fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("A try-on is being generated. Try again when it finishes.")
    }
}

impl std::error::Error for SessionBusy {}

/// `finish_generation` was called with no generation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotGenerating;

impl fmt::Display for NotGenerating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no try-on generation is in flight")
    }
}

impl std::error::Error for NotGenerating {}

/// Everything the external call needs, captured when generation begins.
#[derive(Debug, Clone)]
pub struct PreparedGeneration {
    pub credential: Credential,
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Output,
    NoImage,
    Rejected(SubmitRejection),
    Failed(GenerationError),
}

impl GenerationOutcome {
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Output => None,
            Self::NoImage => Some(SOFT_FAILURE_MESSAGE),
            Self::Rejected(rejection) => Some(rejection.user_message()),
            Self::Failed(err) => Some(err.user_message()),
        }
    }
}

/// The try-on workflow: inputs, credential, and the generate cycle.
///
/// All external effects go through the credential store, the event writer,
/// and the [`ImageEditor`] passed to [`Session::generate`].
pub struct Session {
    state: SessionState,
    credential: Option<Credential>,
    store: Box<dyn CredentialStore>,
    person: Option<ImageData>,
    garments: GarmentSet,
    events: EventWriter,
}

impl Session {
    pub fn new(store: Box<dyn CredentialStore>, events: EventWriter) -> Self {
        Self {
            state: SessionState::Idle,
            credential: None,
            store,
            person: None,
            garments: GarmentSet::default(),
            events,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.credential = self.store.load().context("failed to load stored API key")?;
        self.state = match self.credential {
            Some(_) => SessionState::Ready { last: None },
            None => SessionState::AwaitingCredential { notice: None },
        };
        self.events.record(
            "session_started",
            payload(json!({ "credential_present": self.credential.is_some() })),
        );
        Ok(())
    }

    /// Stores a new API key. Blank input is refused and returns `false`.
    pub fn save_credential(&mut self, raw: &str) -> Result<bool> {
        let Some(credential) = Credential::parse(raw) else {
            return Ok(false);
        };
        self.store
            .save(&credential)
            .context("failed to store API key")?;
        self.credential = Some(credential);
        if matches!(
            self.state,
            SessionState::Idle | SessionState::AwaitingCredential { .. }
        ) {
            self.state = SessionState::Ready { last: None };
        }
        self.events.record("credential_saved", EventPayload::new());
        Ok(true)
    }

    /// Forgets the stored key. Refused with [`SessionBusy`] while generating.
    pub fn clear_credential(&mut self) -> Result<()> {
        if self.is_generating() {
            return Err(SessionBusy.into());
        }
        self.store.clear().context("failed to clear stored API key")?;
        self.credential = None;
        self.state = SessionState::AwaitingCredential { notice: None };
        self.events
            .record("credential_cleared", payload(json!({ "reason": "user" })));
        Ok(())
    }

    pub fn set_input(&mut self, slot: InputSlot, image: ImageData) -> Result<(), SessionBusy> {
        if self.is_generating() {
            return Err(SessionBusy);
        }
        let mut fields = image_fields(&image);
        fields.insert("slot".to_string(), json!(slot.as_str()));
        match slot {
            InputSlot::Person => self.person = Some(image),
            InputSlot::Garment(garment) => self.garments.set(garment, Some(image)),
        }
        self.events.record("input_set", fields);
        Ok(())
    }

    /// Returns whether the slot held an image.
    pub fn remove_input(&mut self, slot: InputSlot) -> Result<bool, SessionBusy> {
        if self.is_generating() {
            return Err(SessionBusy);
        }
        let removed = match slot {
            InputSlot::Person => self.person.take().is_some(),
            InputSlot::Garment(garment) => {
                let had = self.garments.get(garment).is_some();
                self.garments.set(garment, None);
                had
            }
        };
        if removed {
            self.events
                .record("input_removed", payload(json!({ "slot": slot.as_str() })));
        }
        Ok(removed)
    }

    /// Validates and enters `Generating`. No network I/O happens here, and a
    /// rejection leaves the inputs untouched.
    pub fn begin_generation(&mut self) -> Result<PreparedGeneration, SubmitRejection> {
        self.begin(None)
    }

    fn begin(&mut self, model: Option<&str>) -> Result<PreparedGeneration, SubmitRejection> {
        let prepared = self.prepare();
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(rejection) => {
                self.reject(rejection);
                return Err(rejection);
            }
        };

        self.state = SessionState::Generating {
            started_at: Instant::now(),
        };
        let garments: Vec<&str> = prepared
            .request
            .garment_slots()
            .iter()
            .map(|slot| slot.as_str())
            .collect();
        let mut fields = payload(json!({
            "garments": garments,
            "parts": prepared.request.parts().len(),
        }));
        if let Some(model) = model {
            fields.insert("model".to_string(), json!(model));
        }
        self.events.record("generation_started", fields);
        Ok(prepared)
    }

    fn prepare(&self) -> Result<PreparedGeneration, SubmitRejection> {
        if self.is_generating() {
            return Err(SubmitRejection::AlreadyGenerating);
        }
        let Some(credential) = self.credential.clone() else {
            return Err(SubmitRejection::Validation(
                ValidationError::MissingCredential,
            ));
        };
        let Some(person) = self.person.as_ref() else {
            return Err(SubmitRejection::Validation(ValidationError::MissingPerson));
        };
        let request = compose(person, &self.garments)
            .map_err(|_| SubmitRejection::Validation(ValidationError::MissingGarment))?;
        Ok(PreparedGeneration {
            credential,
            request,
        })
    }

    fn reject(&mut self, rejection: SubmitRejection) {
        match rejection {
            SubmitRejection::AlreadyGenerating => {}
            SubmitRejection::Validation(ValidationError::MissingCredential) => {
                self.state = SessionState::AwaitingCredential {
                    notice: Some(rejection.user_message().to_string()),
                };
            }
            SubmitRejection::Validation(_) => {
                self.state = SessionState::Ready {
                    last: Some(LastOutcome::Failed(rejection.user_message().to_string())),
                };
            }
        }
        self.events.record(
            "generation_rejected",
            payload(json!({ "reason": rejection.reason() })),
        );
    }

    /// Leaves `Generating` with the result of the external call. Any other
    /// state is left untouched.
    pub fn finish_generation(
        &mut self,
        result: Result<Option<ImageData>, GenerationError>,
    ) -> Result<GenerationOutcome, NotGenerating> {
        let SessionState::Generating { started_at } = self.state else {
            return Err(NotGenerating);
        };
        Ok(self.complete(started_at, result))
    }

    fn complete(
        &mut self,
        started_at: Instant,
        result: Result<Option<ImageData>, GenerationError>,
    ) -> GenerationOutcome {
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match result {
            Ok(Some(image)) => {
                let mut fields = image_fields(&image);
                fields.insert("elapsed_ms".to_string(), json!(elapsed_ms));
                self.state = SessionState::Ready {
                    last: Some(LastOutcome::Output(image)),
                };
                self.events.record("generation_finished", fields);
                GenerationOutcome::Output
            }
            Ok(None) => {
                self.state = SessionState::Ready {
                    last: Some(LastOutcome::Failed(SOFT_FAILURE_MESSAGE.to_string())),
                };
                self.events.record(
                    "generation_finished",
                    payload(json!({ "no_image": true, "elapsed_ms": elapsed_ms })),
                );
                GenerationOutcome::NoImage
            }
            Err(err) => {
                self.events.record(
                    "generation_failed",
                    payload(json!({
                        "kind": err.kind(),
                        "detail": err.detail(),
                        "elapsed_ms": elapsed_ms,
                    })),
                );
                if matches!(err, GenerationError::CredentialInvalid(_)) {
                    self.invalidate_credential(err.user_message());
                } else {
                    self.state = SessionState::Ready {
                        last: Some(LastOutcome::Failed(err.user_message().to_string())),
                    };
                }
                GenerationOutcome::Failed(err)
            }
        }
    }

    fn invalidate_credential(&mut self, notice: &str) {
        if let Err(err) = self.store.clear() {
            eprintln!("tryon: failed to clear rejected API key: {err:#}");
        }
        self.credential = None;
        self.state = SessionState::AwaitingCredential {
            notice: Some(notice.to_string()),
        };
        self.events
            .record("credential_cleared", payload(json!({ "reason": "rejected" })));
    }

    /// Begin, call the editor with the session credential, finish.
    pub fn generate(&mut self, editor: &dyn ImageEditor) -> GenerationOutcome {
        let started_at = Instant::now();
        let prepared = match self.begin(Some(editor.model_name())) {
            Ok(prepared) => prepared,
            Err(rejection) => return GenerationOutcome::Rejected(rejection),
        };
        let result = editor.edit_image(&prepared.credential, &prepared.request);
        self.complete(started_at, result)
    }

    /// Saves the current output; see [`save_output`].
    pub fn save_output(&self, target: &Path) -> Result<PathBuf> {
        let Some(image) = self.output() else {
            bail!("no generated image to save yet");
        };
        let written = save_output(image, target)?;
        let mut fields = image_fields(image);
        fields.insert(
            "path".to_string(),
            json!(written.to_string_lossy().to_string()),
        );
        self.events.record("output_saved", fields);
        Ok(written)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn person(&self) -> Option<&ImageData> {
        self.person.as_ref()
    }

    pub fn garments(&self) -> &GarmentSet {
        &self.garments
    }

    pub fn input(&self, slot: InputSlot) -> Option<&ImageData> {
        match slot {
            InputSlot::Person => self.person(),
            InputSlot::Garment(garment) => self.garments.get(garment),
        }
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn is_generating(&self) -> bool {
        matches!(self.state, SessionState::Generating { .. })
    }

    pub fn output(&self) -> Option<&ImageData> {
        match &self.state {
            SessionState::Ready {
                last: Some(LastOutcome::Output(image)),
            } => Some(image),
            _ => None,
        }
    }

    /// The message to show the user, if the last step failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SessionState::Ready {
                last: Some(LastOutcome::Failed(message)),
            } => Some(message),
            SessionState::AwaitingCredential {
                notice: Some(message),
            } => Some(message),
            _ => None,
        }
    }
}

fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
