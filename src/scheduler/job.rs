use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::phase::{Phase, PhaseRecord};
use crate::scheduler::DeviceId;

pub type JobId = u64;

/// How a mattress is laid: on an automatic spreader or by hand at the
/// manual station. Fixed once the job is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadingMethod {
    Automatic,
    Manual,
}

impl std::fmt::Display for SpreadingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpreadingMethod::Automatic => write!(f, "AUTOMATIC"),
            SpreadingMethod::Manual => write!(f, "MANUAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Mattress or marker reference shown on the board.
    pub reference: String,
    pub spreading_method: SpreadingMethod,
}

impl Job {
    pub fn new(id: JobId, reference: impl Into<String>, spreading_method: SpreadingMethod) -> Self {
        Self {
            id,
            reference: reference.into(),
            spreading_method,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.spreading_method == SpreadingMethod::Manual
    }
}

/// One entry of the append-only transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub device: Option<DeviceId>,
    pub operator: Option<String>,
    pub at: DateTime<Utc>,
}

/// The job aggregate. `current` is the single active phase, so "exactly one
/// active phase per approved job" holds by construction; `None` means the
/// job was registered but never approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub current: Option<PhaseRecord>,
    pub history: Vec<PhaseTransition>,
    /// Display-only overlay set by the width-change workflow.
    pub pending_approval: bool,
    pub registered_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            current: None,
            history: Vec::new(),
            pending_approval: false,
            registered_at: Utc::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn is_approved(&self) -> bool {
        self.current.is_some()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.current.as_ref().map(|r| r.phase)
    }

    pub fn device(&self) -> Option<&DeviceId> {
        self.current.as_ref().and_then(|r| r.device.as_ref())
    }

    /// Status shown to operators: the width-change overlay wins over the
    /// real phase without replacing it.
    pub fn display_status(&self) -> String {
        if self.pending_approval {
            return "PENDING APPROVAL".to_string();
        }
        match self.phase() {
            Some(phase) => phase.to_string(),
            None => "REGISTERED".to_string(),
        }
    }
}
