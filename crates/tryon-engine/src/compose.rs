use std::fmt;

use tryon_contracts::garments::{GarmentSet, GarmentSlot};
use tryon_contracts::images::ImageData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Image(ImageData),
    Text(String),
}

/// Ordered parts of one try-on request: the person, the garments in slot
/// order, then a single instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    parts: Vec<RequestPart>,
    garments: Vec<GarmentSlot>,
}

impl GenerationRequest {
    pub fn parts(&self) -> &[RequestPart] {
        &self.parts
    }

    pub fn garment_slots(&self) -> &[GarmentSlot] {
        &self.garments
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageData> {
        self.parts.iter().filter_map(|part| match part {
            RequestPart::Image(image) => Some(image),
            RequestPart::Text(_) => None,
        })
    }

    pub fn instruction(&self) -> Option<&str> {
        self.parts.iter().rev().find_map(|part| match part {
            RequestPart::Text(text) => Some(text.as_str()),
            RequestPart::Image(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeError {
    NoGarments,
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGarments => write!(f, "at least one garment image is required"),
        }
    }
}

impl std::error::Error for ComposeError {}

pub fn compose(person: &ImageData, garments: &GarmentSet) -> Result<GenerationRequest, ComposeError> {
    let present: Vec<(GarmentSlot, &ImageData)> = garments.present().collect();
    if present.is_empty() {
        return Err(ComposeError::NoGarments);
    }

    let mut parts = Vec::with_capacity(present.len() + 2);
    parts.push(RequestPart::Image(person.clone()));
    parts.extend(
        present
            .iter()
            .map(|(_, image)| RequestPart::Image((*image).clone())),
    );
    let slots: Vec<GarmentSlot> = present.iter().map(|(slot, _)| *slot).collect();
    parts.push(RequestPart::Text(instruction_for(&slots)));

    Ok(GenerationRequest {
        parts,
        garments: slots,
    })
}

pub fn instruction_for(slots: &[GarmentSlot]) -> String {
    let garments = slots
        .iter()
        .map(GarmentSlot::prompt_phrase)
        .collect::<Vec<_>>()
        .join(" and ");
    format!(
        "You are an expert fashion stylist performing a virtual try-on.\n\
         Edit the first image (the person) so that they wear the clothing shown in the other image(s): {garments}.\n\
         \n\
         CRITICAL RULES:\n\
         1. PRESERVE THE PERSON: keep the person's identity, face, expression, body shape, skin tone and hair exactly as they are. Do not generate a different person.\n\
         2. PRESERVE THE POSE: the pose and position of the person must not change.\n\
         3. PRESERVE THE BACKGROUND: keep the background of the first image intact. Do not alter or replace it.\n\
         4. REPLACE CLOTHING ONLY: realistically place the provided clothing on the person, replacing what they currently wear.\n\
         5. OUTPUT A SINGLE IMAGE: return exactly one photorealistic image that is an edited version of the first image. Do not return text.\n"
    )
}
