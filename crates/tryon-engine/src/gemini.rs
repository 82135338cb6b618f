use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tryon_contracts::credentials::Credential;
use tryon_contracts::images::ImageData;
use tryon_contracts::models::normalize_model_name;

use crate::compose::{GenerationRequest, RequestPart};
use crate::transport::HttpTransport;

const FALLBACK_OUTPUT_MEDIA_TYPE: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    CredentialInvalid(String),
    RateLimited(String),
    Failed(String),
}

impl GenerationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CredentialInvalid(_) => {
                "Your API key is not valid. Please enter a valid Gemini API key."
            }
            Self::RateLimited(_) => {
                "You have exceeded your API quota. Please wait a moment and try again, or check your plan and billing details."
            }
            Self::Failed(_) => "An error occurred while generating the image. Please try again.",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::CredentialInvalid(detail) | Self::RateLimited(detail) | Self::Failed(detail) => {
                detail
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredentialInvalid(_) => "credential_invalid",
            Self::RateLimited(_) => "rate_limited",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_message(), self.detail())
    }
}

impl std::error::Error for GenerationError {}

/// The external "edit image" operation. `Ok(None)` means the service answered
/// but produced no image.
pub trait ImageEditor {
    fn model_name(&self) -> &str;

    fn edit_image(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<Option<ImageData>, GenerationError>;
}

pub struct GeminiImageEditor {
    api_base: String,
    model: String,
    timeout: Duration,
    transport: Arc<dyn HttpTransport>,
}

impl GeminiImageEditor {
    pub fn new(
        api_base: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            model: normalize_model_name(&model.into()).to_string(),
            timeout,
            transport,
        }
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = normalize_model_name(model).to_string();
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

impl ImageEditor for GeminiImageEditor {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn edit_image(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<Option<ImageData>, GenerationError> {
        let endpoint = self.endpoint();
        let payload = build_payload(request);
        let reply = self
            .transport
            .post_json(
                &endpoint,
                &[("key", credential.expose())],
                &payload,
                self.timeout,
            )
            .map_err(|err| GenerationError::Failed(format!("Gemini request failed: {err}")))?;

        let body = reply.body_text();
        if !reply.is_success() {
            return Err(classify_failure(reply.status, &body));
        }
        let response: Value = serde_json::from_str(&body).map_err(|err| {
            GenerationError::Failed(format!("Gemini returned invalid JSON payload: {err}"))
        })?;
        if let Some(error) = response.get("error") {
            return Err(classify_failure(reply.status, &error.to_string()));
        }
        extract_first_inline_image(&response)
    }
}

pub fn build_payload(request: &GenerationRequest) -> Value {
    let parts: Vec<Value> = request
        .parts()
        .iter()
        .map(|part| match part {
            RequestPart::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.media_type(),
                    "data": image.to_base64(),
                }
            }),
            RequestPart::Text(text) => json!({ "text": text }),
        })
        .collect();

    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        Value::Array(vec![json!({
            "role": "user",
            "parts": parts,
        })]),
    );
    let mut generation_config = Map::new();
    generation_config.insert(
        "responseModalities".to_string(),
        json!(["IMAGE", "TEXT"]),
    );
    payload.insert(
        "generationConfig".to_string(),
        Value::Object(generation_config),
    );
    Value::Object(payload)
}

/// First part with non-empty inline data, across candidates in order.
pub fn extract_first_inline_image(response: &Value) -> Result<Option<ImageData>, GenerationError> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let media_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(FALLBACK_OUTPUT_MEDIA_TYPE);
            return ImageData::from_base64(data, media_type)
                .map(Some)
                .map_err(|err| GenerationError::Failed(format!("Gemini image decode failed: {err}")));
        }
    }
    Ok(None)
}

pub fn classify_failure(status: u16, body: &str) -> GenerationError {
    let detail = format!("Gemini request failed ({status}): {}", truncate_text(body, 512));
    if status == 401 || body.contains("API key not valid") || body.contains("API_KEY_INVALID") {
        return GenerationError::CredentialInvalid(detail);
    }
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") || body.contains("\"code\":429") {
        return GenerationError::RateLimited(detail);
    }
    GenerationError::Failed(detail)
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use tryon_contracts::garments::GarmentSet;

    use super::*;
    use crate::compose::compose;
    use crate::transport::testing::{json_reply, reply, ScriptedTransport};
    use crate::transport::TransportError;

    fn sample_request() -> GenerationRequest {
        let person = ImageData::new(b"person".to_vec(), "image/jpeg").expect("person");
        let garments = GarmentSet {
            top: Some(ImageData::new(b"top".to_vec(), "image/png").expect("top")),
            trousers: None,
        };
        compose(&person, &garments).expect("request")
    }

    fn editor(transport: &Arc<ScriptedTransport>) -> GeminiImageEditor {
        GeminiImageEditor::new(
            "https://gemini.test/v1beta/",
            "models/gemini-2.5-flash-image-preview",
            Duration::from_secs(90),
            transport.clone(),
        )
    }

    fn credential() -> Credential {
        Credential::parse("AIza-test-key").expect("credential")
    }

    #[test]
    fn payload_has_inline_parts_then_text() {
        let payload = build_payload(&sample_request());
        let parts = payload["contents"][0]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("cGVyc29u"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/png"));
        assert!(parts[2]["text"].as_str().unwrap_or_default().contains("a top"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn success_returns_first_inline_image() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json_reply(
            200,
            &json!({
                "candidates": [
                    { "content": { "parts": [ { "text": "Here you go" } ] } },
                    { "content": { "parts": [
                        { "inline_data": { "mime_type": "image/webp", "data": "" } },
                        { "inlineData": { "mimeType": "image/png", "data": "b3V0cHV0" } },
                        { "inlineData": { "mimeType": "image/png", "data": "c2Vjb25k" } }
                    ] } }
                ]
            }),
        ))]));
        let output = editor(&transport)
            .edit_image(&credential(), &sample_request())
            .expect("edit succeeds")
            .expect("image returned");
        assert_eq!(output.bytes(), b"output");
        assert_eq!(output.media_type(), "image/png");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].url,
            "https://gemini.test/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
        assert_eq!(
            requests[0].query,
            vec![("key".to_string(), "AIza-test-key".to_string())]
        );
        assert_eq!(requests[0].timeout, Duration::from_secs(90));
    }

    #[test]
    fn snake_case_inline_data_is_accepted() {
        let response = json!({
            "candidates": [{ "content": { "parts": [
                { "inline_data": { "mime_type": "image/jpeg", "data": "anBlZw==" } }
            ] } }]
        });
        let image = extract_first_inline_image(&response)
            .expect("decodes")
            .expect("image");
        assert_eq!(image.media_type(), "image/jpeg");
        assert_eq!(image.bytes(), b"jpeg");
    }

    #[test]
    fn text_only_response_is_soft_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json_reply(
            200,
            &json!({ "candidates": [{ "content": { "parts": [{ "text": "I can't do that." }] } }] }),
        ))]));
        let output = editor(&transport)
            .edit_image(&credential(), &sample_request())
            .expect("not an error");
        assert_eq!(output, None);
        assert_eq!(extract_first_inline_image(&json!({})), Ok(None));
    }

    #[test]
    fn invalid_key_is_classified() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json_reply(
            400,
            &json!({ "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT"
            } }),
        ))]));
        let err = editor(&transport)
            .edit_image(&credential(), &sample_request())
            .expect_err("rejected");
        assert!(matches!(err, GenerationError::CredentialInvalid(_)));
        assert_eq!(
            err.user_message(),
            "Your API key is not valid. Please enter a valid Gemini API key."
        );
    }

    #[test]
    fn quota_errors_are_rate_limited() {
        assert!(matches!(
            classify_failure(429, ""),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(400, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(401, "unauthorized"),
            GenerationError::CredentialInvalid(_)
        ));
        assert!(matches!(
            classify_failure(500, "internal"),
            GenerationError::Failed(_)
        ));
    }

    #[test]
    fn transport_and_decode_failures_are_generic() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Timeout("deadline".into())),
            Ok(reply(200, Some("application/json"), b"not json")),
        ]));
        let gemini = editor(&transport);
        let first = gemini
            .edit_image(&credential(), &sample_request())
            .expect_err("timeout");
        let second = gemini
            .edit_image(&credential(), &sample_request())
            .expect_err("bad json");
        assert!(matches!(first, GenerationError::Failed(_)));
        assert!(matches!(second, GenerationError::Failed(_)));
        assert_eq!(
            second.user_message(),
            "An error occurred while generating the image. Please try again."
        );
    }

    #[test]
    fn set_model_changes_endpoint() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut gemini = editor(&transport);
        gemini.set_model("models/gemini-3-pro-image-preview");
        assert_eq!(gemini.model_name(), "gemini-3-pro-image-preview");
        assert!(gemini
            .endpoint()
            .ends_with("/models/gemini-3-pro-image-preview:generateContent"));
    }

    #[test]
    fn long_bodies_are_truncated_in_detail() {
        let body = "x".repeat(2000);
        let err = classify_failure(500, &body);
        assert!(err.detail().chars().count() < 600);
        assert!(err.detail().ends_with('…'));
    }
}
