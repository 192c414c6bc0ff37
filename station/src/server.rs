//! Operator HTTP API.
//!
//! Read side comes from the engine's published snapshot. Write side sends
//! commands through the [`StationHandle`]. The `/device/*` routes pass
//! straight through to the controller's setup endpoints.

use std::future::Future;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use station_shared::{ControlCommand, ControllerClient, Payload, ResourceError};
use tracing::{info, warn};

use crate::device_store::{DeviceAddresses, DeviceStore};
use crate::engine::StationHandle;
use crate::error::StationError;

#[derive(Clone)]
pub struct AppState {
    pub handle: StationHandle,
    pub store: DeviceStore,
    /// Used only for the setup pass-through routes
    pub controller: ControllerClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/logs", get(logs_handler))
        .route("/overlay.png", get(overlay_handler))
        .route("/annotated.mjpeg", get(annotated_handler))
        .route("/monitoring", post(monitoring_handler))
        .route("/detection", post(detection_handler))
        .route("/stream", post(stream_handler))
        .route("/control", post(control_handler))
        .route("/devices", get(get_devices_handler).post(set_devices_handler))
        .route("/device/status", get(device_status_handler))
        .route("/device/info", get(device_info_handler))
        .route("/device/scan", get(device_scan_handler))
        .route("/device/configure", post(device_configure_handler))
        .route("/device/verify", post(device_verify_handler))
        .route("/device/disconnect", post(device_disconnect_handler))
        .with_state(state)
}

pub struct ApiError(StationError);

impl From<StationError> for ApiError {
    fn from(e: StationError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StationError::NoCameraConfigured
            | StationError::AlreadyStreaming
            | StationError::PreconditionFailed(_) => StatusCode::CONFLICT,
            StationError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            StationError::Remote(_) => StatusCode::BAD_GATEWAY,
            StationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct Toggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Start,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub action: StreamAction,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequestBody {
    pub command: ControlCommand,
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.handle.snapshot())
}

async fn logs_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.handle.snapshot().logs)
}

async fn overlay_handler(State(state): State<AppState>) -> ApiResult<Response> {
    let png = state.handle.overlay_png().await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn annotated_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.handle.annotated().subscribe()
}

async fn monitoring_handler(
    State(state): State<AppState>,
    Json(body): Json<Toggle>,
) -> ApiResult<Json<Value>> {
    state.handle.set_monitoring(body.enabled).await?;
    Ok(Json(json!({ "monitoring": body.enabled })))
}

async fn detection_handler(
    State(state): State<AppState>,
    Json(body): Json<Toggle>,
) -> ApiResult<Json<Value>> {
    state.handle.set_detection(body.enabled).await?;
    Ok(Json(json!({ "detection": body.enabled })))
}

async fn stream_handler(
    State(state): State<AppState>,
    Json(body): Json<StreamRequest>,
) -> ApiResult<Json<Value>> {
    match body.action {
        StreamAction::Start => match state.handle.start_stream().await {
            Ok(()) => Ok(Json(json!({ "stream": "starting" }))),
            Err(e) if e.is_benign() => Ok(Json(json!({
                "stream": "active",
                "message": e.to_string(),
            }))),
            Err(e) => Err(e.into()),
        },
        StreamAction::Stop => {
            state.handle.stop_stream().await?;
            Ok(Json(json!({ "stream": "stopping" })))
        }
    }
}

async fn control_handler(
    State(state): State<AppState>,
    Json(body): Json<ControlRequestBody>,
) -> ApiResult<Json<Value>> {
    let payload = state.handle.control(body.command).await?;
    Ok(Json(payload.into_value()))
}

async fn get_devices_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.handle.snapshot().devices)
}

async fn set_devices_handler(
    State(state): State<AppState>,
    Json(devices): Json<DeviceAddresses>,
) -> ApiResult<Json<DeviceAddresses>> {
    let devices = devices.normalized();
    let path = state.store.save(&devices).map_err(StationError::from)?;
    info!("Saved device addresses to {}", path.display());
    state.handle.set_devices(devices.clone()).await?;
    Ok(Json(devices))
}

async fn passthrough(
    name: &str,
    call: impl Future<Output = Result<Payload, ResourceError>>,
) -> ApiResult<Json<Value>> {
    match call.await {
        Ok(payload) => Ok(Json(payload.into_value())),
        Err(e) => {
            warn!("Controller {name} request failed: {e}");
            Err(StationError::Remote(e).into())
        }
    }
}

async fn device_status_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    passthrough("status", state.controller.status()).await
}

async fn device_info_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    passthrough("info", state.controller.info()).await
}

async fn device_scan_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    passthrough("scan", state.controller.scan()).await
}

async fn device_configure_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    passthrough("configure", state.controller.configure(&body)).await
}

async fn device_verify_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    passthrough("verify", state.controller.verify(&body)).await
}

async fn device_disconnect_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    passthrough("disconnect", state.controller.disconnect()).await
}
