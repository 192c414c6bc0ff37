//! Uniform request wrapper for the controller and the inference service.
//!
//! Every call runs under a single timeout budget. Device endpoints are
//! reached through an ordered list of transport strategies that depends on
//! the deployment mode:
//!
//! - `Production`: the same-origin reverse proxy only.
//! - `Development`: the device address directly, then the proxy once if the
//!   direct attempt failed. When both fail the caller gets
//!   [`ResourceError::Fallback`] carrying both causes.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default budget for a single call, including any fallback attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// Default location of the reverse proxy that forwards to the controller.
pub const DEFAULT_PROXY_BASE: &str = "http://127.0.0.1:8080/api/esp32";

/// Error type for remote resource calls.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The call did not complete within its timeout budget
    #[error("Timeout")]
    Timeout,
    /// Server answered with a non-2xx status
    #[error("HTTP error (status {status}): {body}")]
    Http { status: u16, body: String },
    /// Unreachable host, DNS failure, refused connection, broken stream
    #[error("Network error: {0}")]
    Network(String),
    /// Malformed response body
    #[error("Decode error: {0}")]
    Decode(String),
    /// No usable address for the request
    #[error("Not configured: {0}")]
    NotConfigured(String),
    /// Both the direct attempt and the proxy fallback failed
    #[error("direct request failed ({direct}); proxy fallback failed ({proxy})")]
    Fallback {
        direct: Box<ResourceError>,
        proxy: Box<ResourceError>,
    },
}

impl ResourceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResourceError::Timeout)
    }

    /// HTTP status of the failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResourceError::Http { status, .. } => Some(*status),
            ResourceError::Fallback { proxy, .. } => proxy.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ResourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResourceError::Timeout
        } else if err.is_decode() {
            ResourceError::Decode(err.to_string())
        } else {
            ResourceError::Network(err.to_string())
        }
    }
}

/// How device endpoints are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Route everything through the same-origin proxy
    Production,
    /// Talk to the device address directly, proxy as fallback
    Development,
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(DeploymentMode::Production),
            "development" | "dev" => Ok(DeploymentMode::Development),
            other => Err(format!("unknown deployment mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// Single-file multipart upload
    Multipart {
        field: String,
        file_name: String,
        mime: String,
        data: Bytes,
    },
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: RequestBody::Empty,
            query: Vec::new(),
        }
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::get()
        }
    }

    pub fn post_json<T: Serialize>(body: &T) -> Result<Self, ResourceError> {
        let value = serde_json::to_value(body).map_err(|e| ResourceError::Decode(e.to_string()))?;
        Ok(Self {
            body: RequestBody::Json(value),
            ..Self::post()
        })
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Decoded response body. The response content type decides the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    /// Deserialize the payload into a typed value.
    ///
    /// Text payloads are parsed as JSON too, since some firmware answers
    /// JSON bodies with a plain-text content type.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ResourceError> {
        match self {
            Payload::Json(value) => {
                serde_json::from_value(value).map_err(|e| ResourceError::Decode(e.to_string()))
            }
            Payload::Text(text) => {
                serde_json::from_str(&text).map_err(|e| ResourceError::Decode(e.to_string()))
            }
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        match self {
            Payload::Json(value) => value,
            Payload::Text(text) => serde_json::Value::String(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Direct(String),
    Proxy(String),
}

/// Normalize a bare `host[:port]` device address into a base URL.
pub fn device_base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Request wrapper shared by the controller and inference clients.
///
/// Cloning is cheap; clones share the connection pool and device address.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    mode: DeploymentMode,
    proxy_base: String,
    device_address: Arc<RwLock<Option<String>>>,
    timeout: Duration,
}

impl RemoteClient {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `mode` - Routing policy for device endpoints
    /// * `proxy_base` - Proxy prefix, e.g. "http://localhost:8080/api/esp32"
    /// * `timeout` - Budget for each call
    pub fn new(mode: DeploymentMode, proxy_base: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            mode,
            proxy_base: proxy_base.trim_end_matches('/').to_string(),
            device_address: Arc::new(RwLock::new(None)),
            timeout,
        }
    }

    pub fn with_device_address(self, address: Option<String>) -> Self {
        self.set_device_address(address);
        self
    }

    /// Point device calls at a new address. Shared by all clones.
    pub fn set_device_address(&self, address: Option<String>) {
        let address = address.filter(|a| !a.trim().is_empty());
        match self.device_address.write() {
            Ok(mut guard) => *guard = address,
            Err(poisoned) => *poisoned.into_inner() = address,
        }
    }

    pub fn device_address(&self) -> Option<String> {
        match self.device_address.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The underlying HTTP client, for long-lived streams that do not fit
    /// the request/response contract.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn routes(&self, endpoint: &str) -> Vec<Route> {
        let proxy = Route::Proxy(format!("{}{}", self.proxy_base, endpoint));
        match (self.mode, self.device_address()) {
            (DeploymentMode::Development, Some(address)) => vec![
                Route::Direct(format!("{}{}", device_base_url(&address), endpoint)),
                proxy,
            ],
            _ => vec![proxy],
        }
    }

    /// Call a device endpoint such as `/sensor` using the mode's strategies.
    pub async fn call(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<Payload, ResourceError> {
        let deadline = Instant::now() + self.timeout;
        let mut direct_failure: Option<ResourceError> = None;

        for route in self.routes(endpoint) {
            match route {
                Route::Direct(url) => match self.attempt(&url, options, deadline).await {
                    Ok(payload) => return Ok(payload),
                    Err(err) => {
                        warn!("Direct request to {url} failed: {err}; trying proxy");
                        direct_failure = Some(err);
                    }
                },
                Route::Proxy(url) => {
                    return match self.attempt(&url, options, deadline).await {
                        Ok(payload) => Ok(payload),
                        Err(proxy) => Err(match direct_failure.take() {
                            Some(direct) => ResourceError::Fallback {
                                direct: Box::new(direct),
                                proxy: Box::new(proxy),
                            },
                            None => proxy,
                        }),
                    };
                }
            }
        }

        Err(direct_failure
            .unwrap_or_else(|| ResourceError::NotConfigured("no route to controller".into())))
    }

    /// Call an absolute URL directly (used for the inference service).
    pub async fn call_url(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Payload, ResourceError> {
        let deadline = Instant::now() + self.timeout;
        self.attempt(url, options, deadline).await
    }

    async fn attempt(
        &self,
        url: &str,
        options: &RequestOptions,
        deadline: Instant,
    ) -> Result<Payload, ResourceError> {
        debug!("{} {url}", options.method);
        let mut request = self.http.request(options.method.clone(), url);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Multipart {
                field,
                file_name,
                mime,
                data,
            } => {
                let part = reqwest::multipart::Part::bytes(data.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|e| ResourceError::Decode(e.to_string()))?;
                request.multipart(reqwest::multipart::Form::new().part(field.clone(), part))
            }
        };

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let is_json = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|ct| ct.contains("json"))
                .unwrap_or(false);
            let body = response.text().await?;

            if !status.is_success() {
                return Err(ResourceError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            if is_json {
                serde_json::from_str(&body)
                    .map(Payload::Json)
                    .map_err(|e| ResourceError::Decode(e.to_string()))
            } else {
                Ok(Payload::Text(body))
            }
        };

        tokio::time::timeout_at(deadline, exchange)
            .await
            .map_err(|_| ResourceError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_client() -> RemoteClient {
        RemoteClient::new(DeploymentMode::Development, DEFAULT_PROXY_BASE, DEFAULT_TIMEOUT)
    }

    #[test]
    fn test_production_routes_through_proxy_only() {
        let client = RemoteClient::new(
            DeploymentMode::Production,
            "http://localhost:8080/api/esp32/",
            DEFAULT_TIMEOUT,
        )
        .with_device_address(Some("192.168.1.50".to_string()));

        assert_eq!(
            client.routes("/sensor"),
            vec![Route::Proxy(
                "http://localhost:8080/api/esp32/sensor".to_string()
            )]
        );
    }

    #[test]
    fn test_development_routes_direct_then_proxy() {
        let client = dev_client().with_device_address(Some("192.168.1.50".to_string()));

        assert_eq!(
            client.routes("/bins"),
            vec![
                Route::Direct("http://192.168.1.50/bins".to_string()),
                Route::Proxy("http://127.0.0.1:8080/api/esp32/bins".to_string()),
            ]
        );
    }

    #[test]
    fn test_development_without_address_uses_proxy() {
        let client = dev_client().with_device_address(Some("  ".to_string()));
        assert_eq!(client.device_address(), None);
        assert_eq!(client.routes("/status").len(), 1);
    }

    #[test]
    fn test_device_address_shared_between_clones() {
        let client = dev_client();
        let clone = client.clone();
        client.set_device_address(Some("10.0.0.7:81".to_string()));
        assert_eq!(clone.device_address().as_deref(), Some("10.0.0.7:81"));
    }

    #[test]
    fn test_device_base_url() {
        assert_eq!(device_base_url("192.168.4.1"), "http://192.168.4.1");
        assert_eq!(device_base_url("http://cam.local:81/"), "http://cam.local:81");
    }

    #[test]
    fn test_deployment_mode_parse() {
        assert_eq!("dev".parse::<DeploymentMode>(), Ok(DeploymentMode::Development));
        assert_eq!(
            "Production".parse::<DeploymentMode>(),
            Ok(DeploymentMode::Production)
        );
        assert!("staging".parse::<DeploymentMode>().is_err());
    }

    #[test]
    fn test_text_payload_parses_as_json() {
        let payload = Payload::Text(r#"{"predictions": []}"#.to_string());
        let parsed: crate::InferenceResponse = payload.json().unwrap();
        assert!(parsed.predictions.is_empty());

        let bad = Payload::Text("not json".to_string());
        let err = bad.json::<crate::InferenceResponse>().unwrap_err();
        assert!(matches!(err, ResourceError::Decode(_)));
    }
}
