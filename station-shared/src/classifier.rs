//! Mapping from recognised object labels to waste categories.

use serde::{Deserialize, Serialize};

/// Bin a detected object is sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WasteCategory {
    Biodegradable,
    Plastic,
    Recyclable,
}

impl WasteCategory {
    /// Human-readable name for logs and overlays.
    pub fn display_name(&self) -> &'static str {
        match self {
            WasteCategory::Biodegradable => "Biodegradable",
            WasteCategory::Plastic => "Plastic",
            WasteCategory::Recyclable => "Recyclable",
        }
    }

    /// Overlay color as RGB.
    pub fn rgb(&self) -> [u8; 3] {
        match self {
            WasteCategory::Biodegradable => [34, 197, 94],
            WasteCategory::Plastic => [239, 68, 68],
            WasteCategory::Recyclable => [59, 130, 246],
        }
    }
}

impl std::fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Labels the detection model is trained on, lowercased.
const LABEL_TABLE: &[(&str, WasteCategory)] = &[
    ("biodegradable", WasteCategory::Biodegradable),
    ("egg shell", WasteCategory::Biodegradable),
    ("eggshell", WasteCategory::Biodegradable),
    ("banana peel", WasteCategory::Biodegradable),
    ("orange peel", WasteCategory::Biodegradable),
    ("fruit peel", WasteCategory::Biodegradable),
    ("apple core", WasteCategory::Biodegradable),
    ("food waste", WasteCategory::Biodegradable),
    ("vegetable", WasteCategory::Biodegradable),
    ("leaves", WasteCategory::Biodegradable),
    ("tea bag", WasteCategory::Biodegradable),
    ("bread", WasteCategory::Biodegradable),
    ("plastic", WasteCategory::Plastic),
    ("plastic bottle", WasteCategory::Plastic),
    ("plastic bag", WasteCategory::Plastic),
    ("plastic cup", WasteCategory::Plastic),
    ("straw", WasteCategory::Plastic),
    ("wrapper", WasteCategory::Plastic),
    ("chips packet", WasteCategory::Plastic),
    ("cigarette", WasteCategory::Plastic),
    ("cigarette butt", WasteCategory::Plastic),
    ("styrofoam", WasteCategory::Plastic),
    ("recyclable", WasteCategory::Recyclable),
    ("paper", WasteCategory::Recyclable),
    ("newspaper", WasteCategory::Recyclable),
    ("cardboard", WasteCategory::Recyclable),
    ("paper cup", WasteCategory::Recyclable),
    ("can", WasteCategory::Recyclable),
    ("aluminium can", WasteCategory::Recyclable),
    ("tin", WasteCategory::Recyclable),
    ("metal", WasteCategory::Recyclable),
    ("glass bottle", WasteCategory::Recyclable),
    ("bottle cap", WasteCategory::Recyclable),
    ("lid", WasteCategory::Recyclable),
];

const PLASTIC_KEYWORDS: &[&str] = &["plastic", "packet", "cigarette"];
const RECYCLABLE_KEYWORDS: &[&str] = &["paper", "cup", "can", "lid"];

/// Classify a detection label.
///
/// Exact (case-insensitive) lookup in the label table first, then keyword
/// heuristics: plastic keywords win over recyclable keywords, and anything
/// unmatched is biodegradable.
pub fn classify(label: &str) -> WasteCategory {
    let normalized = label.trim().to_lowercase();

    if let Some((_, category)) = LABEL_TABLE.iter().find(|(name, _)| *name == normalized) {
        return *category;
    }

    if PLASTIC_KEYWORDS.iter().any(|k| normalized.contains(k)) {
        WasteCategory::Plastic
    } else if RECYCLABLE_KEYWORDS.iter().any(|k| normalized.contains(k)) {
        WasteCategory::Recyclable
    } else {
        WasteCategory::Biodegradable
    }
}
