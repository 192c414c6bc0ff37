//! Service seams used by the engine.
//!
//! The engine only talks to the controller and the detection model through
//! these traits, so tests can drive it with in-process fakes.

use std::future::Future;

use bytes::Bytes;
use station_shared::{
    BinCapacityData, ControlCommand, ControllerClient, Detection, InferenceClient, Payload,
    ResourceError, SensorReading,
};

/// The sorting controller.
pub trait ControllerApi: Send + Sync + 'static {
    fn sensor(&self) -> impl Future<Output = Result<SensorReading, ResourceError>> + Send;

    fn bins(&self) -> impl Future<Output = Result<BinCapacityData, ResourceError>> + Send;

    fn control(
        &self,
        command: ControlCommand,
    ) -> impl Future<Output = Result<Payload, ResourceError>> + Send;

    /// Retarget at a new controller address.
    fn set_address(&self, address: Option<String>);
}

/// The object-detection model.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, jpeg: Bytes)
        -> impl Future<Output = Result<Vec<Detection>, ResourceError>> + Send;
}

impl ControllerApi for ControllerClient {
    fn sensor(&self) -> impl Future<Output = Result<SensorReading, ResourceError>> + Send {
        ControllerClient::sensor(self)
    }

    fn bins(&self) -> impl Future<Output = Result<BinCapacityData, ResourceError>> + Send {
        ControllerClient::bins(self)
    }

    fn control(
        &self,
        command: ControlCommand,
    ) -> impl Future<Output = Result<Payload, ResourceError>> + Send {
        ControllerClient::control(self, command)
    }

    fn set_address(&self, address: Option<String>) {
        ControllerClient::set_address(self, address)
    }
}

impl Detector for InferenceClient {
    fn detect(
        &self,
        jpeg: Bytes,
    ) -> impl Future<Output = Result<Vec<Detection>, ResourceError>> + Send {
        InferenceClient::detect(self, jpeg)
    }
}
