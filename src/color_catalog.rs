use std::collections::HashSet;
use std::fmt;

use crate::constants::{COLOR_ID_MAX_BYTES, NEUTRAL_COLOR_ID};
use crate::types::{ColorIdentity, MeshVariant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    EmptyId,
    IdTooLong(String),
    DuplicateId(String),
    MissingNeutral,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::EmptyId => write!(f, "color id must not be empty"),
            CatalogError::IdTooLong(id) => {
                write!(f, "color id '{id}' exceeds {COLOR_ID_MAX_BYTES} bytes")
            }
            CatalogError::DuplicateId(id) => write!(f, "color id '{id}' is defined twice"),
            CatalogError::MissingNeutral => {
                write!(f, "palette has no neutral '{NEUTRAL_COLOR_ID}' entry")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

/// Read-only color lookup, loaded once at startup.
#[derive(Clone, Debug)]
pub struct ColorCatalog {
    entries: Vec<ColorIdentity>,
    neutral_index: usize,
}

impl ColorCatalog {
    pub fn new(entries: Vec<ColorIdentity>) -> Result<Self, CatalogError> {
        let mut seen: HashSet<String> = HashSet::new();
        for entry in &entries {
            if entry.id.is_empty() {
                return Err(CatalogError::EmptyId);
            }
            if entry.id.len() > COLOR_ID_MAX_BYTES {
                return Err(CatalogError::IdTooLong(entry.id.clone()));
            }
            if !seen.insert(entry.id.clone()) {
                return Err(CatalogError::DuplicateId(entry.id.clone()));
            }
        }
        let neutral_index = entries
            .iter()
            .position(|entry| entry.id == NEUTRAL_COLOR_ID)
            .ok_or(CatalogError::MissingNeutral)?;
        Ok(Self {
            entries,
            neutral_index,
        })
    }

    pub fn builtin() -> Self {
        let entries = default_palette();
        let neutral_index = entries.len() - 1;
        Self {
            entries,
            neutral_index,
        }
    }

    pub fn find(&self, color_id: &str) -> Option<&ColorIdentity> {
        self.entries.iter().find(|entry| entry.id == color_id)
    }

    pub fn neutral(&self) -> &ColorIdentity {
        &self.entries[self.neutral_index]
    }

    /// Colors that can be handed to players, in palette order.
    pub fn player_colors(&self) -> Vec<ColorIdentity> {
        self.entries
            .iter()
            .filter(|entry| entry.id != NEUTRAL_COLOR_ID)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn color(id: &str, rgba: [f32; 4], intensity: f32, mesh_variant: MeshVariant) -> ColorIdentity {
    ColorIdentity {
        id: id.to_string(),
        rgba,
        intensity,
        mesh_variant,
    }
}

pub fn default_palette() -> Vec<ColorIdentity> {
    vec![
        color("yellow", [1.0, 0.85, 0.1, 1.0], 2.0, MeshVariant::Orb),
        color("blue", [0.15, 0.4, 1.0, 1.0], 2.0, MeshVariant::Cube),
        color("red", [0.95, 0.15, 0.15, 1.0], 2.0, MeshVariant::Prism),
        color("green", [0.2, 0.85, 0.3, 1.0], 2.0, MeshVariant::Ring),
        color("purple", [0.6, 0.25, 0.9, 1.0], 2.0, MeshVariant::Cube),
        color("orange", [1.0, 0.55, 0.1, 1.0], 2.0, MeshVariant::Prism),
        color(NEUTRAL_COLOR_ID, [1.0, 1.0, 1.0, 1.0], 1.0, MeshVariant::Orb),
    ]
}
