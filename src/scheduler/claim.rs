//! Cutter claim arbiter: guards the TO_CUT -> ON_CUT transition so a job is
//! driven by at most one cutter and a cutter drives at most one job.
//!
//! Callers open the transaction with [`lock_keys`] so the job's phase row
//! and the cutter are both locked before any check runs; the
//! check-then-act sequence in [`claim`] therefore sees no interleaving from
//! a competing cutter.

use crate::error::{BoardError, Result};
use crate::scheduler::phase::{self, Phase, PhaseRecord};
use crate::scheduler::{lanes, DeviceRegistry, JobId};
use crate::store::{RowKey, Transaction};

pub fn lock_keys(job_id: JobId, cutter: &str) -> Vec<RowKey> {
    vec![RowKey::Job(job_id), RowKey::Device(cutter.to_string())]
}

pub fn claim(
    txn: &mut Transaction,
    devices: &DeviceRegistry,
    job_id: JobId,
    cutter: &str,
    operator: Option<&str>,
    expected: Option<Phase>,
) -> Result<PhaseRecord> {
    devices.validate_cutter(cutter)?;
    let live = phase::current(txn, job_id)?;
    phase::check_expected(job_id, &live, expected)?;

    let other_cutter = live
        .device
        .as_ref()
        .filter(|d| devices.is_cutter(d) && d.as_str() != cutter)
        .cloned();

    match (live.phase, other_cutter) {
        (Phase::ToCut | Phase::OnCut, Some(holder)) => {
            tracing::warn!(job_id, cutter, holder = %holder, "Cutter lost the claim race");
            return Err(BoardError::AssignmentConflict { job_id, holder });
        }
        (Phase::ToCut, None) => {}
        (Phase::OnCut, None) => {
            return Err(phase::conflict(
                job_id,
                &live,
                format!("job is already on cut at {}", cutter),
            ))
        }
        (other, _) => {
            return Err(phase::conflict(
                job_id,
                &live,
                format!("only TO_CUT jobs can be claimed, job is {}", other),
            ))
        }
    }

    let busy_with = txn
        .jobs()
        .find(|r| {
            r.id() != job_id
                && r.phase() == Some(Phase::OnCut)
                && r.device().map(String::as_str) == Some(cutter)
        })
        .map(|r| r.id());
    if let Some(busy_job) = busy_with {
        tracing::warn!(job_id, cutter, busy_job, "Cutter already busy");
        return Err(BoardError::DeviceBusy {
            device: cutter.to_string(),
            job_id: busy_job,
        });
    }

    let record = phase::activate(
        txn,
        job_id,
        Phase::OnCut,
        operator,
        Some(cutter.to_string()),
    )?;
    lanes::remove(txn, job_id)?;
    tracing::info!(job_id, cutter, "Job claimed by cutter");
    Ok(record)
}
