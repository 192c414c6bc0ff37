//! Shared types and clients for the sorting station.
//!
//! Holds the wire formats spoken by the on-premises controller and the
//! inference service, the waste classifier, bin capacity math, the operator
//! event log, and the HTTP clients used by the coordinator.

pub mod bins;
pub mod classifier;
pub mod controller_client;
pub mod event_log;
pub mod inference_client;
pub mod remote;

use serde::{Deserialize, Serialize};

pub use bins::{BinCapacityData, BinId, BinState, BinStatus, Thresholds, WireBinStatus};
pub use classifier::{classify, WasteCategory};
pub use controller_client::ControllerClient;
pub use event_log::{EventLog, LogEntry, LogLevel, Subsystem};
pub use inference_client::{InferenceClient, InferenceSettings};
pub use remote::{
    DeploymentMode, Payload, RemoteClient, RequestBody, RequestOptions, ResourceError,
};

/// Latest proximity sensor reading reported by the controller (`GET /sensor`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Distance in centimeters, or -1 when the echo was invalid
    pub distance: f32,
    /// Controller's view of whether an object sits in front of the sensor
    pub object_detected: bool,
    /// Whether the reading has been stable across the controller's own samples
    #[serde(default)]
    pub object_stable: bool,
    /// Trigger distance configured on the controller, in centimeters
    #[serde(default)]
    pub threshold: f32,
}

impl SensorReading {
    /// Returns false when the sensor reported the invalid-echo sentinel.
    pub fn is_valid(&self) -> bool {
        self.distance >= 0.0
    }
}

/// Commands accepted by `POST /control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Biodegradable,
    Plastic,
    Recyclable,
    Stop,
    ForceDetection,
    ResetDetection,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Biodegradable => "biodegradable",
            ControlCommand::Plastic => "plastic",
            ControlCommand::Recyclable => "recyclable",
            ControlCommand::Stop => "stop",
            ControlCommand::ForceDetection => "force_detection",
            ControlCommand::ResetDetection => "reset_detection",
        }
    }
}

impl From<WasteCategory> for ControlCommand {
    fn from(category: WasteCategory) -> Self {
        match category {
            WasteCategory::Biodegradable => ControlCommand::Biodegradable,
            WasteCategory::Plastic => ControlCommand::Plastic,
            WasteCategory::Recyclable => ControlCommand::Recyclable,
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body for `POST /control`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: ControlCommand,
}

/// One recognised object in a frame, boxed in source-frame pixel coordinates.
///
/// `x`/`y` are the top-left corner. The inference service reports box
/// centers; [`Prediction::into_detection`] does the conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A single prediction as returned by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
    /// Box center, x
    pub x: f32,
    /// Box center, y
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Prediction {
    /// Convert the center-anchored box into a top-left anchored detection.
    pub fn into_detection(self) -> Detection {
        Detection {
            x: self.x - self.width / 2.0,
            y: self.y - self.height / 2.0,
            class: self.class,
            confidence: self.confidence,
            width: self.width,
            height: self.height,
        }
    }
}

/// Response body of the inference service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_reading_wire_format() {
        let json = r#"{
            "distance": 8.0,
            "objectDetected": true,
            "objectStable": false,
            "threshold": 15.0
        }"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert!(reading.object_detected);
        assert!(reading.is_valid());
        assert_eq!(reading.threshold, 15.0);
    }

    #[test]
    fn test_invalid_sensor_distance() {
        let json = r#"{"distance": -1, "objectDetected": false}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert!(!reading.is_valid());
        assert!(!reading.object_stable);
    }

    #[test]
    fn test_control_request_serialization() {
        let body = ControlRequest {
            command: ControlCommand::ForceDetection,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"command":"force_detection"}"#
        );
        assert_eq!(
            ControlCommand::from(WasteCategory::Plastic).as_str(),
            "plastic"
        );
    }

    #[test]
    fn test_prediction_center_to_top_left() {
        let prediction = Prediction {
            class: "Plastic".to_string(),
            confidence: 0.85,
            x: 100.0,
            y: 80.0,
            width: 40.0,
            height: 20.0,
        };
        let detection = prediction.into_detection();
        assert_eq!(detection.x, 80.0);
        assert_eq!(detection.y, 70.0);
        assert_eq!(detection.width, 40.0);
        assert_eq!(detection.class, "Plastic");
    }
}
