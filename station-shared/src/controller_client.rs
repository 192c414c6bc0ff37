//! Client for the on-premises controller HTTP API.
//!
//! All controller interactions go through [`RemoteClient`], so they share
//! its timeout budget and proxy fallback policy.

use serde_json::Value;

use crate::remote::{Payload, RemoteClient, RequestOptions, ResourceError};
use crate::{BinCapacityData, ControlCommand, ControlRequest, SensorReading};

/// Client for the sorting controller (sensor, bins, actuators, provisioning).
#[derive(Debug, Clone)]
pub struct ControllerClient {
    remote: RemoteClient,
}

impl ControllerClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }

    /// Point the client at a new controller address.
    pub fn set_address(&self, address: Option<String>) {
        self.remote.set_device_address(address);
    }

    // === Sensing ===

    /// Get the latest proximity reading.
    pub async fn sensor(&self) -> Result<SensorReading, ResourceError> {
        self.remote
            .call("/sensor", &RequestOptions::get())
            .await?
            .json()
    }

    /// Get bin distances and thresholds.
    pub async fn bins(&self) -> Result<BinCapacityData, ResourceError> {
        self.remote
            .call("/bins", &RequestOptions::get())
            .await?
            .json()
    }

    /// Liveness probe.
    pub async fn status(&self) -> Result<Payload, ResourceError> {
        self.remote.call("/status", &RequestOptions::get()).await
    }

    // === Actuation ===

    /// Send one actuator command.
    pub async fn control(&self, command: ControlCommand) -> Result<Payload, ResourceError> {
        let options = RequestOptions::post_json(&ControlRequest { command })?;
        self.remote.call("/control", &options).await
    }

    // === Provisioning pass-through ===
    // The coordinator does not interpret these; payloads are echoed to the
    // operator as-is.

    pub async fn info(&self) -> Result<Payload, ResourceError> {
        self.remote.call("/info", &RequestOptions::get()).await
    }

    pub async fn scan(&self) -> Result<Payload, ResourceError> {
        self.remote.call("/scan", &RequestOptions::get()).await
    }

    pub async fn configure(&self, body: &Value) -> Result<Payload, ResourceError> {
        self.remote
            .call("/configure", &RequestOptions::post_json(body)?)
            .await
    }

    pub async fn verify(&self, body: &Value) -> Result<Payload, ResourceError> {
        self.remote
            .call("/verify", &RequestOptions::post_json(body)?)
            .await
    }

    pub async fn disconnect(&self) -> Result<Payload, ResourceError> {
        self.remote
            .call("/disconnect", &RequestOptions::post())
            .await
    }
}
