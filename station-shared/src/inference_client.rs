//! Client for the hosted object-detection model.

use bytes::Bytes;

use crate::remote::{RemoteClient, RequestBody, RequestOptions, ResourceError};
use crate::{Detection, InferenceResponse};

/// Where and how to call the detection model.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    /// Full model endpoint URL
    pub endpoint: String,
    /// Optional API key, sent as the `api_key` query parameter
    pub api_key: Option<String>,
    /// Minimum confidence the service itself should report, 0-1
    pub confidence: f32,
    /// Box overlap threshold for the service's NMS, 0-1
    pub overlap: f32,
}

impl InferenceSettings {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: None,
            confidence: 0.2,
            overlap: 0.3,
        }
    }
}

/// Uploads frames to the detection model and returns top-left anchored boxes.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    remote: RemoteClient,
    settings: InferenceSettings,
}

impl InferenceClient {
    pub fn new(remote: RemoteClient, settings: InferenceSettings) -> Self {
        Self { remote, settings }
    }

    fn request(&self, jpeg: Bytes) -> RequestOptions {
        // The service takes thresholds as whole percentages
        let mut options = RequestOptions::post()
            .with_query("confidence", (self.settings.confidence * 100.0).round() as u32)
            .with_query("overlap", (self.settings.overlap * 100.0).round() as u32);
        if let Some(key) = &self.settings.api_key {
            options = options.with_query("api_key", key);
        }
        options.body = RequestBody::Multipart {
            field: "file".to_string(),
            file_name: "frame.jpg".to_string(),
            mime: "image/jpeg".to_string(),
            data: jpeg,
        };
        options
    }

    /// Run detection on one JPEG frame.
    pub async fn detect(&self, jpeg: Bytes) -> Result<Vec<Detection>, ResourceError> {
        if self.settings.endpoint.is_empty() {
            return Err(ResourceError::NotConfigured(
                "inference endpoint".to_string(),
            ));
        }
        let response: InferenceResponse = self
            .remote
            .call_url(&self.settings.endpoint, &self.request(jpeg))
            .await?
            .json()?;

        Ok(response
            .predictions
            .into_iter()
            .map(|p| p.into_detection())
            .collect())
    }
}
