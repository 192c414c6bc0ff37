//! Detection loop bookkeeping: tick gating, the single in-flight call,
//! confidence filtering and statistics.

use serde::Serialize;
use station_shared::{classify, Detection, WasteCategory};

use crate::config::DetectionThresholds;
use crate::session::SessionPhase;
use crate::stream::Frame;

/// Why a detection tick did nothing. These are routine and only logged at
/// debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No attached source or no frame loaded yet
    NoFrame,
    /// Previous inference call has not resolved
    InFlight,
    /// Frame header could not be read
    NoDimensions,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoFrame => write!(f, "no frame loaded"),
            SkipReason::InFlight => write!(f, "detection in progress"),
            SkipReason::NoDimensions => write!(f, "frame has no dimensions"),
        }
    }
}

/// Accepted detection with its waste category.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub detection: Detection,
    pub category: WasteCategory,
}

/// Outcome of one inference response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Everything at or above the floor
    pub accepted: Vec<Classified>,
    /// Highest-confidence result at or above the actuation threshold
    pub trigger: Option<Classified>,
}

/// Accepted detections per waste category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub biodegradable: u64,
    pub plastic: u64,
    pub recyclable: u64,
}

impl CategoryCounts {
    pub fn increment(&mut self, category: WasteCategory) {
        match category {
            WasteCategory::Biodegradable => self.biodegradable += 1,
            WasteCategory::Plastic => self.plastic += 1,
            WasteCategory::Recyclable => self.recyclable += 1,
        }
    }

    pub fn get(&self, category: WasteCategory) -> u64 {
        match category {
            WasteCategory::Biodegradable => self.biodegradable,
            WasteCategory::Plastic => self.plastic,
            WasteCategory::Recyclable => self.recyclable,
        }
    }
}

/// Running counters shown to the operator. Never reset while the station
/// runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub by_category: CategoryCounts,
    pub total_detections: u64,
    pub inference_calls: u64,
    pub inference_failures: u64,
    pub ticks_skipped: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
}

/// Per-tick inference gating with a single in-flight slot.
#[derive(Debug)]
pub struct DetectionLoop {
    thresholds: DetectionThresholds,
    enabled: bool,
    in_flight: bool,
    stats: DetectionStats,
}

impl DetectionLoop {
    /// Starts enabled, with nothing in flight.
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self {
            thresholds,
            enabled: true,
            in_flight: false,
            stats: DetectionStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Operator switch. An in-flight call still completes.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// True while an inference call is outstanding.
    pub fn is_detecting(&self) -> bool {
        self.in_flight
    }

    pub fn stats(&self) -> &DetectionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut DetectionStats {
        &mut self.stats
    }

    /// Detection only runs while streaming outside a cooldown.
    pub fn should_run(&self, phase: SessionPhase) -> bool {
        self.enabled && phase == SessionPhase::Streaming
    }

    /// Claim the in-flight slot for a tick and hand back the frame to send.
    pub fn try_start(&mut self, frame: Option<&Frame>) -> Result<Frame, SkipReason> {
        let result = match frame {
            None => Err(SkipReason::NoFrame),
            Some(_) if self.in_flight => Err(SkipReason::InFlight),
            Some(frame) if !frame.has_dimensions() => Err(SkipReason::NoDimensions),
            Some(frame) => {
                self.in_flight = true;
                self.stats.inference_calls += 1;
                Ok(frame.clone())
            }
        };
        if result.is_err() {
            self.stats.ticks_skipped += 1;
        }
        result
    }

    /// Release the in-flight slot, on success or failure alike.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.stats.inference_failures += 1;
    }

    /// Filter and classify one inference response and update the counters.
    pub fn evaluate(&mut self, detections: Vec<Detection>) -> Evaluation {
        let accepted: Vec<Classified> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.thresholds.floor)
            .map(|detection| Classified {
                category: classify(&detection.class),
                detection,
            })
            .collect();

        for item in &accepted {
            self.stats.by_category.increment(item.category);
            self.stats.total_detections += 1;
        }

        let trigger = accepted
            .iter()
            .filter(|c| c.detection.confidence >= self.thresholds.actuation)
            .max_by(|a, b| a.detection.confidence.total_cmp(&b.detection.confidence))
            .cloned();

        Evaluation { accepted, trigger }
    }
}
