use std::fmt;

use serde::{Deserialize, Serialize};

use crate::color_catalog::ColorCatalog;
use crate::constants::{COLOR_ID_MAX_BYTES, LEVEL_COUNT, PLACEMENT_COUNT, ROUTE_COUNT};
use crate::types::ColorIdentity;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutePlacement {
    #[serde(rename = "puzzleIndex")]
    pub puzzle_index: usize,
    #[serde(rename = "routeIndex")]
    pub route_index: usize,
    #[serde(rename = "levelIndex")]
    pub level_index: usize,
    pub color: ColorIdentity,
}

/// The 16 placements of one match in `route * LEVEL_COUNT + level` order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlacementTable {
    placements: Vec<RoutePlacement>,
}

/// One record of the binary placement broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub puzzle_index: i32,
    pub route_index: i32,
    pub level_index: i32,
    pub color_id: String,
}

#[derive(Debug)]
pub enum WireError {
    Codec(Box<bincode::ErrorKind>),
    ColorIdTooLong(String),
    IndexOutOfRange { field: &'static str, value: i32 },
    DuplicateSlot { route_index: i32, level_index: i32 },
    UnknownColor(String),
}

impl From<Box<bincode::ErrorKind>> for WireError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        WireError::Codec(e)
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Codec(e) => write!(f, "placement codec error: {e}"),
            WireError::ColorIdTooLong(id) => {
                write!(f, "color id '{id}' exceeds {COLOR_ID_MAX_BYTES} bytes")
            }
            WireError::IndexOutOfRange { field, value } => {
                write!(f, "{field} {value} is out of range")
            }
            WireError::DuplicateSlot {
                route_index,
                level_index,
            } => write!(
                f,
                "route {route_index} level {level_index} appears more than once"
            ),
            WireError::UnknownColor(id) => write!(f, "color id '{id}' is not in the catalog"),
        }
    }
}

impl std::error::Error for WireError {}

impl PlacementTable {
    /// Callers guarantee one placement per (route, level) slot.
    pub(crate) fn from_placements(mut placements: Vec<RoutePlacement>) -> Self {
        placements.sort_by_key(|placement| (placement.route_index, placement.level_index));
        Self { placements }
    }

    pub fn placements(&self) -> &[RoutePlacement] {
        &self.placements
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn get(&self, route_index: usize, level_index: usize) -> Option<&RoutePlacement> {
        self.placements.iter().find(|placement| {
            placement.route_index == route_index && placement.level_index == level_index
        })
    }

    pub fn for_route(&self, route_index: usize) -> impl Iterator<Item = &RoutePlacement> {
        self.placements
            .iter()
            .filter(move |placement| placement.route_index == route_index)
    }

    pub fn for_level(&self, level_index: usize) -> impl Iterator<Item = &RoutePlacement> {
        self.placements
            .iter()
            .filter(move |placement| placement.level_index == level_index)
    }

    pub fn to_records(&self) -> Vec<PlacementRecord> {
        self.placements
            .iter()
            .map(|placement| PlacementRecord {
                puzzle_index: placement.puzzle_index as i32,
                route_index: placement.route_index as i32,
                level_index: placement.level_index as i32,
                color_id: placement.color.id.clone(),
            })
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let records: [PlacementRecord; PLACEMENT_COUNT] = self
            .to_records()
            .try_into()
            .map_err(|records: Vec<PlacementRecord>| WireError::IndexOutOfRange {
                field: "placement count",
                value: records.len() as i32,
            })?;
        encode_records(&records)
    }

    /// Rebuilds a table from wire records, resolving colors through the catalog.
    pub fn from_records(
        records: &[PlacementRecord; PLACEMENT_COUNT],
        catalog: &ColorCatalog,
    ) -> Result<Self, WireError> {
        validate_records(records)?;
        let mut placements = Vec::with_capacity(PLACEMENT_COUNT);
        for record in records {
            let color = catalog
                .find(&record.color_id)
                .cloned()
                .ok_or_else(|| WireError::UnknownColor(record.color_id.clone()))?;
            placements.push(RoutePlacement {
                puzzle_index: record.puzzle_index as usize,
                route_index: record.route_index as usize,
                level_index: record.level_index as usize,
                color,
            });
        }
        Ok(Self::from_placements(placements))
    }

    pub fn decode(bytes: &[u8], catalog: &ColorCatalog) -> Result<Self, WireError> {
        let records = decode_records(bytes)?;
        Self::from_records(&records, catalog)
    }
}

pub fn encode_records(records: &[PlacementRecord; PLACEMENT_COUNT]) -> Result<Vec<u8>, WireError> {
    validate_records(records)?;
    Ok(bincode::serialize(records)?)
}

pub fn decode_records(bytes: &[u8]) -> Result<[PlacementRecord; PLACEMENT_COUNT], WireError> {
    let records: [PlacementRecord; PLACEMENT_COUNT] = bincode::deserialize(bytes)?;
    validate_records(&records)?;
    Ok(records)
}

fn validate_records(records: &[PlacementRecord; PLACEMENT_COUNT]) -> Result<(), WireError> {
    let mut seen = [[false; LEVEL_COUNT]; ROUTE_COUNT];
    for record in records {
        if record.color_id.len() > COLOR_ID_MAX_BYTES {
            return Err(WireError::ColorIdTooLong(record.color_id.clone()));
        }
        if record.puzzle_index < 0 {
            return Err(WireError::IndexOutOfRange {
                field: "puzzle index",
                value: record.puzzle_index,
            });
        }
        if !(0..ROUTE_COUNT as i32).contains(&record.route_index) {
            return Err(WireError::IndexOutOfRange {
                field: "route index",
                value: record.route_index,
            });
        }
        if !(0..LEVEL_COUNT as i32).contains(&record.level_index) {
            return Err(WireError::IndexOutOfRange {
                field: "level index",
                value: record.level_index,
            });
        }
        let slot = &mut seen[record.route_index as usize][record.level_index as usize];
        if *slot {
            return Err(WireError::DuplicateSlot {
                route_index: record.route_index,
                level_index: record.level_index,
            });
        }
        *slot = true;
    }
    Ok(())
}
