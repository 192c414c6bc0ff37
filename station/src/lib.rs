//! Waste sorting station coordinator.
//!
//! Watches the controller's proximity sensor, opens the camera stream when an
//! object shows up, runs object detection on live frames and sends a single
//! sort command per object, gated by a cooldown. Bin fill levels are polled
//! alongside and raise a one-time alert when a bin fills up.
//!
//! # Layout
//! - [`engine`] - the coordinator task and its [`StationHandle`]
//! - [`session`], [`proximity`], [`stream`], [`detection`], [`actuation`],
//!   [`bin_poller`] - the state each part of the cycle keeps
//! - [`overlay`] - detection boxes drawn over the live frames
//! - [`mjpeg`] - camera stream reader and the annotated re-broadcast
//! - [`server`] - operator HTTP API
//! - [`config`], [`device_store`] - command line and persisted addresses

pub mod actuation;
pub mod bin_poller;
pub mod config;
pub mod detection;
pub mod device_store;
pub mod engine;
pub mod error;
pub mod logs;
pub mod mjpeg;
pub mod overlay;
pub mod proximity;
pub mod server;
pub mod services;
pub mod session;
pub mod stream;
pub mod timers;

pub use config::{StationArgs, StationConfig, Timings};
pub use device_store::{DeviceAddresses, DeviceStore};
pub use engine::{Station, StationHandle, StationSnapshot};
pub use error::StationError;
pub use services::{ControllerApi, Detector};
pub use session::SessionPhase;
pub use stream::{FrameSource, StopReason};
