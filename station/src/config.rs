//! Runtime configuration for the station coordinator.
//!
//! [`Timings`] holds every interval and delay the engine runs on. The CLI
//! arguments in [`StationArgs`] are shared by the `sort_station` binary and
//! anything else that wants to stand up a station from the command line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use station_shared::remote::DEFAULT_PROXY_BASE;
use station_shared::{DeploymentMode, InferenceSettings, Thresholds};

use crate::device_store::DeviceAddresses;

/// Intervals and delays used by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Proximity sensor poll period
    pub sensor_poll: Duration,
    /// Bin capacity poll period
    pub bin_poll: Duration,
    /// Detection sampling period
    pub detection_interval: Duration,
    /// Minimum gap between two sensor-triggered stream starts
    pub sensor_cooldown: Duration,
    /// Debounce before stopping the stream once the object is gone
    pub grace_period: Duration,
    /// Maximum stream session length
    pub stream_timeout: Duration,
    /// Delay before reattaching after a stream error
    pub reconnect_delay: Duration,
    /// Pause between clearing a source and attaching or releasing it
    pub source_settle: Duration,
    /// Quiet period after an actuation command
    pub detection_cooldown: Duration,
    /// Delay between a sort command and the stream stop
    pub post_trigger_stop: Duration,
    /// How long a detection stays on the overlay
    pub display_time: Duration,
    pub janitor_interval: Duration,
    pub cooldown_tick: Duration,
    pub watchdog_interval: Duration,
    /// Overlay repaint period (~30 fps)
    pub render_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            sensor_poll: Duration::from_millis(1000),
            bin_poll: Duration::from_millis(2000),
            detection_interval: Duration::from_millis(1000),
            sensor_cooldown: Duration::from_millis(60_000),
            grace_period: Duration::from_millis(5000),
            stream_timeout: Duration::from_millis(30_000),
            reconnect_delay: Duration::from_millis(3000),
            source_settle: Duration::from_millis(100),
            detection_cooldown: Duration::from_millis(10_000),
            post_trigger_stop: Duration::from_millis(2000),
            display_time: Duration::from_millis(3000),
            janitor_interval: Duration::from_millis(1000),
            cooldown_tick: Duration::from_millis(1000),
            watchdog_interval: Duration::from_millis(1000),
            render_interval: Duration::from_millis(33),
        }
    }
}

/// Confidence cut-offs applied to inference results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    /// Results below this are discarded entirely
    pub floor: f32,
    /// Results at or above this may trigger a sort command
    pub actuation: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            floor: 0.2,
            actuation: 0.6,
        }
    }
}

/// Everything the engine needs apart from its service handles.
#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub timings: Timings,
    pub thresholds: DetectionThresholds,
    /// Used until the controller reports a valid threshold set
    pub bin_thresholds: Thresholds,
    /// Entries kept per subsystem log
    pub log_capacity: usize,
    pub devices: DeviceAddresses,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            thresholds: DetectionThresholds::default(),
            bin_thresholds: Thresholds::default(),
            log_capacity: 50,
            devices: DeviceAddresses::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Production,
    Development,
}

impl From<ModeArg> for DeploymentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Production => DeploymentMode::Production,
            ModeArg::Development => DeploymentMode::Development,
        }
    }
}

/// Command-line arguments for running a station.
#[derive(Args, Debug, Clone)]
pub struct StationArgs {
    /// Address the operator API listens on
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// How controller endpoints are reached
    #[arg(long, value_enum, default_value_t = ModeArg::Production)]
    pub mode: ModeArg,

    /// Reverse proxy prefix forwarding to the controller
    #[arg(long, default_value = DEFAULT_PROXY_BASE)]
    pub proxy_base: String,

    /// Inference model endpoint URL
    #[arg(long, default_value = "")]
    pub inference_url: String,

    /// Inference API key
    #[arg(long, env = "INFERENCE_API_KEY")]
    pub api_key: Option<String>,

    /// Timeout budget for each remote call in milliseconds
    #[arg(long, default_value_t = 12_000)]
    pub request_timeout_ms: u64,

    /// Discard detections below this confidence
    #[arg(long, default_value_t = 0.2)]
    pub confidence_floor: f32,

    /// Minimum confidence for a detection to trigger sorting
    #[arg(long, default_value_t = 0.6)]
    pub actuation_threshold: f32,

    /// Box overlap threshold passed to the model, in percent
    #[arg(long, default_value_t = 30)]
    pub overlap: u32,

    /// Directory holding devices.json (defaults to ~/.sort_station)
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
}

impl StationArgs {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        let mut settings = InferenceSettings::new(&self.inference_url);
        settings.api_key = self.api_key.clone().filter(|k| !k.is_empty());
        settings.confidence = self.confidence_floor;
        settings.overlap = self.overlap as f32 / 100.0;
        settings
    }

    pub fn station_config(&self, devices: DeviceAddresses) -> StationConfig {
        StationConfig {
            thresholds: DetectionThresholds {
                floor: self.confidence_floor,
                actuation: self.actuation_threshold,
            },
            devices,
            ..StationConfig::default()
        }
    }
}
