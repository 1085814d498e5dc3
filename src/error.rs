use thiserror::Error;

use crate::scheduler::{DeviceId, JobId, Phase};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job {0} has no active phase")]
    NoActivePhase(JobId),

    /// Stale expectation or illegal transition. Always carries the live state
    /// so the caller can re-fetch and retry.
    #[error("Conflict on job {job_id} (live status {live}, device {live_device:?}): {message}")]
    Conflict {
        job_id: JobId,
        live: Phase,
        live_device: Option<DeviceId>,
        message: String,
    },

    #[error("Job {job_id} is already claimed by cutter {holder}")]
    AssignmentConflict { job_id: JobId, holder: DeviceId },

    #[error("Device {device} is busy cutting job {job_id}")]
    DeviceBusy { device: DeviceId, job_id: JobId },

    #[error("Device {device} is incompatible: {reason}")]
    IncompatibleDevice { device: DeviceId, reason: String },

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// Whether the retry loop may run the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, BoardError::TransientStore(_))
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
