//! Bin capacity model.
//!
//! Bin state and fill percentage are derived from the measured distance and
//! the shared thresholds only. Smaller distance means a fuller bin.

use serde::{Deserialize, Serialize};

/// Distance boundaries in centimeters. Valid when `full < nearly_full < empty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub empty: f32,
    pub nearly_full: f32,
    pub full: f32,
}

impl Thresholds {
    pub fn is_valid(&self) -> bool {
        self.full < self.nearly_full && self.nearly_full < self.empty
    }

    /// State of a bin whose sensor reads `distance`.
    pub fn state_for(&self, distance: f32) -> BinState {
        if distance > self.empty {
            BinState::Empty
        } else if distance > self.nearly_full {
            BinState::Normal
        } else if distance > self.full {
            BinState::NearlyFull
        } else {
            BinState::Full
        }
    }

    /// Fill percentage (0-100), linear between the empty and full boundaries.
    pub fn fill_percentage(&self, distance: f32) -> u8 {
        let span = self.empty - self.full;
        if span <= 0.0 {
            return 0;
        }
        let fraction = (self.empty - distance) / span;
        (fraction * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            empty: 30.0,
            nearly_full: 15.0,
            full: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinState {
    Empty,
    Normal,
    NearlyFull,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinId {
    Bin1,
    Bin2,
}

impl std::fmt::Display for BinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinId::Bin1 => write!(f, "Bin 1"),
            BinId::Bin2 => write!(f, "Bin 2"),
        }
    }
}

/// One bin as reported on the wire. The controller's own `state` and
/// `fillPercentage` are accepted but not trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBinStatus {
    pub distance: f32,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub fill_percentage: Option<i32>,
    #[serde(default)]
    pub warning_sent: bool,
}

/// Response body of `GET /bins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinCapacityData {
    pub bin1: WireBinStatus,
    pub bin2: WireBinStatus,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

/// Derived status of a single bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinStatus {
    pub distance: f32,
    pub state: BinState,
    pub fill_percentage: u8,
    pub warning_sent: bool,
}

impl BinStatus {
    /// Derive a bin status from its wire form.
    ///
    /// A negative distance is a sensor fault and maps to an empty bin.
    pub fn derive(wire: &WireBinStatus, thresholds: &Thresholds) -> Self {
        if wire.distance < 0.0 {
            return Self {
                distance: wire.distance,
                state: BinState::Empty,
                fill_percentage: 0,
                warning_sent: wire.warning_sent,
            };
        }
        Self {
            distance: wire.distance,
            state: thresholds.state_for(wire.distance),
            fill_percentage: thresholds.fill_percentage(wire.distance),
            warning_sent: wire.warning_sent,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.distance < 0.0
    }
}
