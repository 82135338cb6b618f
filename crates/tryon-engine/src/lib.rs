pub mod compose;
pub mod config;
pub mod fetch;
pub mod gemini;
pub mod input;
pub mod output;
pub mod session;
pub mod transport;

use std::sync::Arc;

use tryon_contracts::models::{ModelSelection, ModelSelector, EDIT_CAPABILITY};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::fetch::RemoteImageFetcher;
use crate::gemini::GeminiImageEditor;
use crate::input::ImageInputAdapter;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Input adapter and image editor wired to one HTTP transport.
pub struct TryOnEngine {
    config: EngineConfig,
    adapter: ImageInputAdapter,
    editor: GeminiImageEditor,
    selector: ModelSelector,
}

impl TryOnEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config: EngineConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let fetcher = RemoteImageFetcher::new(
            config.proxies.clone(),
            config.fetch_timeout,
            transport.clone(),
        );
        let editor = GeminiImageEditor::new(
            config.api_base.clone(),
            config.model.clone(),
            config.request_timeout,
            transport,
        );
        Self {
            config,
            adapter: ImageInputAdapter::new(fetcher),
            editor,
            selector: ModelSelector::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapter(&self) -> &ImageInputAdapter {
        &self.adapter
    }

    pub fn editor(&self) -> &GeminiImageEditor {
        &self.editor
    }

    /// Switches the edit model. Unknown or non-editing models fall back to
    /// the default; the returned selection carries the reason.
    pub fn select_model(&mut self, requested: Option<&str>) -> Result<ModelSelection, String> {
        let selection = self.selector.select(requested, EDIT_CAPABILITY)?;
        self.editor.set_model(&selection.model.name);
        self.config.model = selection.model.name.clone();
        Ok(selection)
    }
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 40, 90]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tryon_contracts::credentials::MemoryCredentialStore;
    use tryon_contracts::events::EventWriter;
    use tryon_contracts::garments::{GarmentSlot, InputSlot};
    use tryon_contracts::images::ImageData;
    use tryon_contracts::models::DEFAULT_EDIT_MODEL;

    use super::*;
    use crate::gemini::ImageEditor;
    use crate::input::ImageSource;
    use crate::session::{GenerationOutcome, Session};
    use crate::test_support::png_bytes;
    use crate::transport::testing::{json_reply, reply, ScriptedTransport};
    use crate::transport::TransportError;

    #[test]
    fn session_ids_are_unique_uuids() {
        let first = new_session_id();
        let second = new_session_id();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn select_model_falls_back_for_unknown_names() {
        let mut engine = TryOnEngine::with_transport(
            EngineConfig::default(),
            Arc::new(ScriptedTransport::default()),
        );
        let selection = engine
            .select_model(Some("gemini-3-pro-image-preview"))
            .expect("known model");
        assert_eq!(selection.fallback_reason, None);
        assert_eq!(engine.editor().model_name(), "gemini-3-pro-image-preview");

        let fallback = engine.select_model(Some("nope")).expect("fallback");
        assert!(fallback.fallback_reason.is_some());
        assert_eq!(engine.editor().model_name(), DEFAULT_EDIT_MODEL);
        assert_eq!(engine.config().model, DEFAULT_EDIT_MODEL);
    }

    #[test]
    fn url_inputs_and_generation_share_one_transport() -> anyhow::Result<()> {
        let person = png_bytes(4, 6);
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Timeout("first proxy".into())),
            Ok(reply(200, Some("image/png"), &person)),
            Ok(json_reply(
                200,
                &json!({ "candidates": [{ "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "ZG9uZQ==" } }
                ] } }] }),
            )),
        ]));
        let engine = TryOnEngine::with_transport(EngineConfig::default(), transport.clone());
        let mut session = Session::new(
            Box::new(MemoryCredentialStore::default()),
            EventWriter::disabled(new_session_id()),
        );
        session.start()?;
        session.save_credential("AIza-key")?;

        let loaded = engine
            .adapter()
            .load(&ImageSource::parse("https://img.example/me.png"))?;
        assert_eq!(loaded.bytes(), person.as_slice());
        session.set_input(InputSlot::Person, loaded)?;
        session.set_input(
            InputSlot::Garment(GarmentSlot::Top),
            ImageData::new(b"top".to_vec(), "image/jpeg")?,
        )?;

        assert_eq!(session.generate(engine.editor()), GenerationOutcome::Output);
        assert_eq!(session.output().map(ImageData::bytes), Some(&b"done"[..]));

        let urls: Vec<String> = transport.requests().into_iter().map(|row| row.url).collect();
        assert_eq!(urls.len(), 3);
        assert!(urls[2].ends_with(":generateContent"));
        Ok(())
    }
}
