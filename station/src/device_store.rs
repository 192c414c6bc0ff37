//! Persisted device addresses.
//!
//! The camera and controller addresses are the only durable state the
//! station keeps. They live in `devices.json` under ~/.sort_station/ by
//! default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEVICES_FILE: &str = "devices.json";

#[derive(Debug, thiserror::Error)]
pub enum DeviceStoreError {
    #[error("HOME not set")]
    NoHome,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid devices file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Network addresses of the camera and the sorting controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAddresses {
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub controller: Option<String>,
}

impl DeviceAddresses {
    /// Trim whitespace and turn blank entries into `None`.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            camera: clean(self.camera),
            controller: clean(self.controller),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceStore {
    root_path: PathBuf,
}

impl DeviceStore {
    /// Store rooted at ~/.sort_station
    pub fn new() -> Result<Self, DeviceStoreError> {
        let home = std::env::var("HOME").map_err(|_| DeviceStoreError::NoHome)?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".sort_station"),
        })
    }

    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn devices_path(&self) -> PathBuf {
        self.root_path.join(DEVICES_FILE)
    }

    /// Load the saved addresses. A missing file yields empty addresses.
    pub fn load(&self) -> Result<DeviceAddresses, DeviceStoreError> {
        let path = self.devices_path();
        if !path.exists() {
            return Ok(DeviceAddresses::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let devices: DeviceAddresses = serde_json::from_str(&contents)?;
        Ok(devices.normalized())
    }

    /// Save addresses, creating the directory if needed.
    pub fn save(&self, devices: &DeviceAddresses) -> Result<PathBuf, DeviceStoreError> {
        std::fs::create_dir_all(&self.root_path)?;
        let path = self.devices_path();
        let json = serde_json::to_string_pretty(devices)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
