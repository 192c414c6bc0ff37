use station_shared::ResourceError;

use crate::device_store::DeviceStoreError;

/// Errors surfaced by the station engine and its handle.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error("No camera address configured")]
    NoCameraConfigured,
    /// Benign: a stream session is already running
    #[error("Stream already active")]
    AlreadyStreaming,
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Station engine has stopped")]
    EngineStopped,
    #[error(transparent)]
    Remote(#[from] ResourceError),
    #[error(transparent)]
    Storage(#[from] DeviceStoreError),
}

impl StationError {
    /// State conflicts that callers may treat as a no-op.
    pub fn is_benign(&self) -> bool {
        matches!(self, StationError::AlreadyStreaming)
    }
}
