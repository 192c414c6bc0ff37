//! Bin capacity snapshots and full-bin alerts.

use serde::Serialize;
use station_shared::{BinCapacityData, BinId, BinState, BinStatus, Thresholds};

/// Latest bin readings. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinSnapshot {
    pub bin1: BinStatus,
    pub bin2: BinStatus,
    pub thresholds: Thresholds,
    pub fetched_at_ms: i64,
}

impl BinSnapshot {
    pub fn get(&self, bin: BinId) -> &BinStatus {
        match bin {
            BinId::Bin1 => &self.bin1,
            BinId::Bin2 => &self.bin2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinUpdate {
    /// Bins that just became full and have not been warned about
    pub alerts: Vec<BinId>,
    /// Bins reporting a negative distance
    pub faults: Vec<BinId>,
    /// Controller thresholds were unusable and the defaults were applied
    pub fallback_thresholds: bool,
}

#[derive(Debug)]
pub struct BinPoller {
    default_thresholds: Thresholds,
    snapshot: Option<BinSnapshot>,
}

impl BinPoller {
    pub fn new(default_thresholds: Thresholds) -> Self {
        Self {
            default_thresholds,
            snapshot: None,
        }
    }

    pub fn snapshot(&self) -> Option<&BinSnapshot> {
        self.snapshot.as_ref()
    }

    /// Replace the snapshot with a fresh fetch and report transitions.
    ///
    /// An alert fires when a bin is full now, was not full in the previous
    /// snapshot, and the controller has not already flagged the warning.
    pub fn apply(&mut self, data: BinCapacityData) -> BinUpdate {
        let mut update = BinUpdate::default();
        let thresholds = match data.thresholds {
            Some(t) if t.is_valid() => t,
            Some(_) => {
                update.fallback_thresholds = true;
                self.default_thresholds
            }
            None => self.default_thresholds,
        };

        let next = BinSnapshot {
            bin1: BinStatus::derive(&data.bin1, &thresholds),
            bin2: BinStatus::derive(&data.bin2, &thresholds),
            thresholds,
            fetched_at_ms: chrono::Utc::now().timestamp_millis(),
        };

        for bin in [BinId::Bin1, BinId::Bin2] {
            let current = next.get(bin);
            if current.is_fault() {
                update.faults.push(bin);
                continue;
            }
            let was_full = self
                .snapshot
                .map(|prev| prev.get(bin).state == BinState::Full)
                .unwrap_or(false);
            let warned = self
                .snapshot
                .map(|prev| prev.get(bin).warning_sent)
                .unwrap_or(false);
            if current.state == BinState::Full && !was_full && !warned {
                update.alerts.push(bin);
            }
        }

        self.snapshot = Some(next);
        update
    }
}
