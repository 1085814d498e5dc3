//! Phase registry: the fixed linear pipeline every approved job moves through.
//!
//! The active phase lives in a single field of the job aggregate
//! ([`JobRecord::current`](crate::scheduler::JobRecord)); each activation also
//! appends to the job's transition history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::scheduler::job::PhaseTransition;
use crate::scheduler::{DeviceId, JobId};
use crate::store::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    NotSet,
    ToLoad,
    OnSpread,
    ToCut,
    OnCut,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::NotSet,
        Phase::ToLoad,
        Phase::OnSpread,
        Phase::ToCut,
        Phase::OnCut,
        Phase::Completed,
    ];

    /// Ordinal position in the pipeline, NOT_SET = 0.
    pub fn rank(self) -> u8 {
        match self {
            Phase::NotSet => 0,
            Phase::ToLoad => 1,
            Phase::OnSpread => 2,
            Phase::ToCut => 3,
            Phase::OnCut => 4,
            Phase::Completed => 5,
        }
    }

    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::NotSet => Some(Phase::ToLoad),
            Phase::ToLoad => Some(Phase::OnSpread),
            Phase::OnSpread => Some(Phase::ToCut),
            Phase::ToCut => Some(Phase::OnCut),
            Phase::OnCut => Some(Phase::Completed),
            Phase::Completed => None,
        }
    }

    /// Phases whose jobs hold a kanban entry.
    pub fn is_kanban_relevant(self) -> bool {
        matches!(self, Phase::ToLoad | Phase::OnSpread | Phase::ToCut)
    }

    /// Phases in which a job may still be moved between board lanes.
    pub fn is_movable(self) -> bool {
        matches!(self, Phase::NotSet | Phase::ToLoad)
    }

    /// Display label in the `"<rank> - <NAME>"` form operators are used to.
    pub fn label(self) -> String {
        format!("{} - {}", self.rank(), self)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::NotSet => "NOT_SET",
            Phase::ToLoad => "TO_LOAD",
            Phase::OnSpread => "ON_SPREAD",
            Phase::ToCut => "TO_CUT",
            Phase::OnCut => "ON_CUT",
            Phase::Completed => "COMPLETED",
        };
        write!(f, "{}", name)
    }
}

/// The active phase of a job together with who and what is driving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub device: Option<DeviceId>,
    pub operator: Option<String>,
    pub activated_at: DateTime<Utc>,
}

impl PhaseRecord {
    pub fn new(phase: Phase, device: Option<DeviceId>, operator: Option<String>) -> Self {
        Self {
            phase,
            device,
            operator,
            activated_at: Utc::now(),
        }
    }
}

/// Create the phase set of a freshly approved job with NOT_SET active.
/// Returns `false` when the job already has one.
pub fn open(txn: &mut Transaction, job_id: JobId) -> Result<bool> {
    let record = txn.job_mut(job_id)?;
    if record.current.is_some() {
        return Ok(false);
    }
    record.current = Some(PhaseRecord::new(Phase::NotSet, None, None));
    Ok(true)
}

/// Deactivate the current phase and activate `phase`. The device is kept
/// from the previous record unless a new one is given.
pub fn activate(
    txn: &mut Transaction,
    job_id: JobId,
    phase: Phase,
    operator: Option<&str>,
    device: Option<DeviceId>,
) -> Result<PhaseRecord> {
    let record = txn.job_mut(job_id)?;
    let (from, prior_device) = match record.current.as_ref() {
        Some(current) => (current.phase, current.device.clone()),
        None => {
            return Err(BoardError::NotFound(format!(
                "phase {} for job {}",
                phase, job_id
            )))
        }
    };

    let activated = PhaseRecord::new(
        phase,
        device.or(prior_device),
        operator.map(str::to_string),
    );
    record.history.push(PhaseTransition {
        from,
        to: phase,
        device: activated.device.clone(),
        operator: activated.operator.clone(),
        at: activated.activated_at,
    });
    record.current = Some(activated.clone());

    tracing::info!(job_id, from = %from, to = %phase, device = ?activated.device, "Phase activated");
    Ok(activated)
}

pub fn current(txn: &mut Transaction, job_id: JobId) -> Result<PhaseRecord> {
    txn.job(job_id)?
        .current
        .clone()
        .ok_or(BoardError::NoActivePhase(job_id))
}

/// Point the active phase at another device without a phase change.
pub fn assign_device(
    txn: &mut Transaction,
    job_id: JobId,
    device: DeviceId,
    operator: Option<&str>,
) -> Result<()> {
    let record = txn.job_mut(job_id)?;
    let current = record
        .current
        .as_mut()
        .ok_or(BoardError::NoActivePhase(job_id))?;
    current.device = Some(device);
    if let Some(operator) = operator {
        current.operator = Some(operator.to_string());
    }
    Ok(())
}

/// Optimistic-concurrency guard for clients acting on a stale view.
pub fn check_expected(job_id: JobId, live: &PhaseRecord, expected: Option<Phase>) -> Result<()> {
    match expected {
        Some(expected) if expected != live.phase => Err(conflict(
            job_id,
            live,
            format!("expected {} but job is {}", expected, live.phase),
        )),
        _ => Ok(()),
    }
}

pub fn conflict(job_id: JobId, live: &PhaseRecord, message: impl Into<String>) -> BoardError {
    BoardError::Conflict {
        job_id,
        live: live.phase,
        live_device: live.device.clone(),
        message: message.into(),
    }
}
