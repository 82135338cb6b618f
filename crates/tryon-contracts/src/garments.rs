use std::fmt;

use serde::{Deserialize, Serialize};

use crate::images::ImageData;

/// Clothing categories a user can supply an image for, in prompt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentSlot {
    Top,
    Trousers,
}

impl GarmentSlot {
    pub const ALL: [GarmentSlot; 2] = [GarmentSlot::Top, GarmentSlot::Trousers];

    pub fn as_str(&self) -> &'static str {
        match self {
            GarmentSlot::Top => "top",
            GarmentSlot::Trousers => "trousers",
        }
    }

    /// Phrase used when naming the garment in the instruction text.
    pub fn prompt_phrase(&self) -> &'static str {
        match self {
            GarmentSlot::Top => "a top",
            GarmentSlot::Trousers => "trousers",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "top" | "shirt" => Some(GarmentSlot::Top),
            "trousers" | "pants" => Some(GarmentSlot::Trousers),
            _ => None,
        }
    }
}

impl fmt::Display for GarmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every input slot of a try-on: the person photo plus the garment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSlot {
    Person,
    Garment(GarmentSlot),
}

impl InputSlot {
    pub const ALL: [InputSlot; 3] = [
        InputSlot::Person,
        InputSlot::Garment(GarmentSlot::Top),
        InputSlot::Garment(GarmentSlot::Trousers),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputSlot::Person => "person",
            InputSlot::Garment(slot) => slot.as_str(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().eq_ignore_ascii_case("person") {
            return Some(InputSlot::Person);
        }
        GarmentSlot::parse(raw).map(InputSlot::Garment)
    }
}

impl fmt::Display for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GarmentSet {
    pub top: Option<ImageData>,
    pub trousers: Option<ImageData>,
}

impl GarmentSet {
    pub fn get(&self, slot: GarmentSlot) -> Option<&ImageData> {
        match slot {
            GarmentSlot::Top => self.top.as_ref(),
            GarmentSlot::Trousers => self.trousers.as_ref(),
        }
    }

    pub fn set(&mut self, slot: GarmentSlot, image: Option<ImageData>) {
        match slot {
            GarmentSlot::Top => self.top = image,
            GarmentSlot::Trousers => self.trousers = image,
        }
    }

    /// Filled slots in canonical order (top before trousers).
    pub fn present(&self) -> impl Iterator<Item = (GarmentSlot, &ImageData)> {
        GarmentSlot::ALL
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|image| (slot, image)))
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none() && self.trousers.is_none()
    }
}
