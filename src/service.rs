//! Board operations exposed to request handlers.
//!
//! Each operation is one short transaction (begin with row locks, validate,
//! act, commit) wrapped in the retry loop, so a failed call leaves no partial
//! state behind and transient store conflicts never reach the caller unless
//! retries run out.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::BoardConfig;
use crate::error::{BoardError, Result};
use crate::scheduler::board::{self, BoardView};
use crate::scheduler::phase::{self, Phase, PhaseRecord};
use crate::scheduler::{
    claim, lanes, reconcile, rollover, DeviceId, DeviceKind, DeviceRegistry, Job, JobId,
    JobRecord, KanbanEntry, LaneDay, LaneKey, PhaseTransition, RolloverOutcome, SweepOutcome,
};
use crate::store::{with_retry, RowKey, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub job_id: JobId,
    pub target_device: DeviceId,
    pub lane_day: LaneDay,
    #[serde(default)]
    pub lane_shift: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub new_phase: Phase,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub device: Option<DeviceId>,
    #[serde(default)]
    pub expected_current_phase: Option<Phase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub activated_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidthChangeOutcome {
    AutoApproved,
    PendingApproval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job: Job,
    pub current: Option<PhaseRecord>,
    pub status: String,
    pub entry: Option<KanbanEntry>,
    pub history: Vec<PhaseTransition>,
}

pub struct BoardService<S: Store> {
    store: Arc<S>,
    devices: DeviceRegistry,
    config: BoardConfig,
}

impl<S: Store> BoardService<S> {
    pub fn new(store: Arc<S>, config: BoardConfig) -> Result<Self> {
        config.validate()?;
        let devices = DeviceRegistry::new(&config.devices)?;
        Ok(Self {
            store,
            devices,
            config,
        })
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Record a job handed over by order/marker management. It stays off
    /// the board and without a phase until approved.
    pub async fn register_job(&self, job: Job) -> Result<()> {
        with_retry(&self.config.retry, "register_job", || self.try_register(&job)).await
    }

    async fn try_register(&self, job: &Job) -> Result<()> {
        let mut txn = self.store.begin(vec![RowKey::Job(job.id)]).await?;
        if txn.job(job.id).is_ok() {
            return Err(BoardError::Validation(format!(
                "job {} is already registered",
                job.id
            )));
        }
        txn.insert_job(JobRecord::new(job.clone()));
        self.store.commit(txn).await?;
        tracing::info!(job_id = job.id, method = %job.spreading_method, "Job registered");
        Ok(())
    }

    /// Move every listed job from NOT_SET to TO_LOAD and onto the board.
    /// Unknown ids fail the whole call before anything is written; each job
    /// is then approved in its own transaction, and jobs that were already
    /// approved are skipped.
    pub async fn approve(&self, job_ids: &[JobId], operator: Option<&str>) -> Result<ApprovalOutcome> {
        let state = self.store.snapshot().await;
        if let Some(missing) = job_ids.iter().find(|id| !state.jobs.contains_key(id)) {
            return Err(BoardError::NotFound(format!("job {}", missing)));
        }

        let mut activated_count = 0;
        for &job_id in job_ids {
            let activated = with_retry(&self.config.retry, "approve", || {
                self.approve_one(job_id, operator)
            })
            .await?;
            if activated {
                activated_count += 1;
            }
        }
        tracing::info!(requested = job_ids.len(), activated_count, "Approval batch finished");
        Ok(ApprovalOutcome { activated_count })
    }

    async fn approve_one(&self, job_id: JobId, operator: Option<&str>) -> Result<bool> {
        let mut txn = self.store.begin(vec![RowKey::Job(job_id)]).await?;
        if !phase::open(&mut txn, job_id)? {
            tracing::debug!(job_id, "Job already approved, skipped");
            return Ok(false);
        }

        let job = txn.job(job_id)?.job.clone();
        if job.is_manual() {
            // Manual jobs skip device selection and go straight to the station.
            let station = self.devices.manual_station().clone();
            phase::activate(&mut txn, job_id, Phase::ToLoad, operator, Some(station.clone()))?;
            lanes::append(&mut txn, job_id, LaneKey::manual(LaneDay::Today), Some(station))?;
        } else {
            phase::activate(&mut txn, job_id, Phase::ToLoad, operator, None)?;
            let lane = LaneKey::shift(LaneDay::Today, self.config.default_shift.clone());
            lanes::append(&mut txn, job_id, lane, None)?;
        }

        self.store.commit(txn).await?;
        Ok(true)
    }

    /// Drag-and-drop on the board. Moving to the unassigned pseudo-device
    /// takes the job off the board and back to NOT_SET; moving a NOT_SET
    /// job to a real station puts it back to TO_LOAD. Returns the job's
    /// entry afterwards, if it has one.
    pub async fn move_job(&self, request: &MoveRequest) -> Result<Option<KanbanEntry>> {
        with_retry(&self.config.retry, "move_job", || self.try_move(request)).await
    }

    async fn try_move(&self, request: &MoveRequest) -> Result<Option<KanbanEntry>> {
        let job_id = request.job_id;
        if request.position == Some(0) {
            return Err(BoardError::Validation(
                "lane positions start at 1".to_string(),
            ));
        }
        let kind = self.devices.kind(&request.target_device)?;
        let operator = request.operator.as_deref();

        let mut txn = self.store.begin(vec![RowKey::Job(job_id)]).await?;
        let job = txn.job(job_id)?.job.clone();
        let live = phase::current(&mut txn, job_id)?;
        self.devices.validate(&job, &request.target_device)?;
        if !live.phase.is_movable() {
            return Err(phase::conflict(
                job_id,
                &live,
                "only NOT_SET or TO_LOAD jobs can be moved on the board",
            ));
        }

        if kind == DeviceKind::Unassigned {
            let removed = lanes::remove(&mut txn, job_id)?;
            if live.phase == Phase::NotSet && removed.is_none() {
                return Ok(None);
            }
            phase::activate(
                &mut txn,
                job_id,
                Phase::NotSet,
                operator,
                Some(request.target_device.clone()),
            )?;
            self.store.commit(txn).await?;
            tracing::info!(job_id, "Job taken off the board");
            return Ok(None);
        }

        let lane = self.lane_for(kind, request.lane_day, request.lane_shift.as_deref())?;
        let device = Some(request.target_device.clone());
        let position = match txn.entry(job_id) {
            Some(_) => lanes::move_entry(&mut txn, job_id, lane.clone(), request.position, device.clone())?,
            None => match request.position {
                Some(position) => {
                    lanes::insert_at(&mut txn, job_id, lane.clone(), position, device.clone())?
                }
                None => lanes::append(&mut txn, job_id, lane.clone(), device.clone())?,
            },
        };

        if live.phase == Phase::NotSet {
            phase::activate(&mut txn, job_id, Phase::ToLoad, operator, device)?;
        } else {
            phase::assign_device(&mut txn, job_id, request.target_device.clone(), operator)?;
        }

        let entry = txn.state().entries.get(&job_id).cloned();
        self.store.commit(txn).await?;
        tracing::info!(job_id, device = %request.target_device, lane = %lane, position, "Job moved");
        Ok(entry)
    }

    fn lane_for(&self, kind: DeviceKind, day: LaneDay, shift: Option<&str>) -> Result<LaneKey> {
        if kind == DeviceKind::ManualStation {
            if shift.is_some() {
                tracing::debug!(?shift, "Shift ignored for the manual-station lane");
            }
            return Ok(LaneKey::manual(day));
        }
        let shift = shift.ok_or_else(|| {
            BoardError::Validation("automatic spreader lanes need a shift".to_string())
        })?;
        if !self.config.shifts.iter().any(|s| s == shift) {
            return Err(BoardError::Validation(format!("unknown shift {}", shift)));
        }
        Ok(LaneKey::shift(day, shift))
    }

    /// Advance a job one step along the pipeline. ON_CUT goes through the
    /// cutter claim arbiter; a stale `expected_current_phase` is a conflict
    /// carrying the live status.
    pub async fn update_status(&self, update: &StatusUpdate) -> Result<PhaseRecord> {
        with_retry(&self.config.retry, "update_status", || {
            self.try_update_status(update)
        })
        .await
    }

    async fn try_update_status(&self, update: &StatusUpdate) -> Result<PhaseRecord> {
        let job_id = update.job_id;
        let operator = update.operator.as_deref();

        if update.new_phase == Phase::OnCut {
            let cutter = update.device.as_deref().ok_or_else(|| {
                BoardError::Validation("ON_CUT needs the claiming cutter".to_string())
            })?;
            let mut txn = self.store.begin(claim::lock_keys(job_id, cutter)).await?;
            let record = claim::claim(
                &mut txn,
                &self.devices,
                job_id,
                cutter,
                operator,
                update.expected_current_phase,
            )?;
            self.store.commit(txn).await?;
            return Ok(record);
        }

        let mut txn = self.store.begin(vec![RowKey::Job(job_id)]).await?;
        let job = txn.job(job_id)?.job.clone();
        let live = phase::current(&mut txn, job_id)?;
        phase::check_expected(job_id, &live, update.expected_current_phase)?;

        // TO_LOAD is only reached through approval or a board move.
        if live.phase.next() != Some(update.new_phase) || update.new_phase == Phase::ToLoad {
            return Err(phase::conflict(
                job_id,
                &live,
                format!("cannot go from {} to {}", live.phase, update.new_phase),
            ));
        }
        if let Some(device) = update.device.as_deref() {
            match update.new_phase {
                Phase::OnSpread => self.devices.validate_spreader(&job, device)?,
                Phase::ToCut => self.devices.validate_cutter(device)?,
                _ => {
                    self.devices.kind(device)?;
                }
            }
        }

        let record = phase::activate(
            &mut txn,
            job_id,
            update.new_phase,
            operator,
            update.device.clone(),
        )?;
        if !update.new_phase.is_kanban_relevant() {
            lanes::remove(&mut txn, job_id)?;
        } else if update.new_phase == Phase::OnSpread && update.device.is_some() {
            if let Some(entry) = txn.entry(job_id) {
                txn.put_entry(KanbanEntry {
                    device: update.device.clone(),
                    ..entry
                });
            }
        }

        self.store.commit(txn).await?;
        Ok(record)
    }

    pub async fn day_rollover_check(&self, today: NaiveDate) -> Result<RolloverOutcome> {
        with_retry(&self.config.retry, "day_rollover", || async {
            let mut txn = self.store.begin(rollover::lock_keys()).await?;
            let outcome = rollover::check_and_transition(&mut txn, today)?;
            self.store.commit(txn).await?;
            Ok(outcome)
        })
        .await
    }

    pub async fn cleanup(&self) -> Result<SweepOutcome> {
        with_retry(&self.config.retry, "cleanup", || async {
            let mut txn = self.store.begin(Vec::new()).await?;
            let outcome = reconcile::sweep(&mut txn, &self.devices)?;
            self.store.commit(txn).await?;
            Ok(outcome)
        })
        .await
    }

    pub async fn get_board(&self, day: Option<LaneDay>) -> BoardView {
        let state = self.store.snapshot().await;
        board::project(&state, day)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusView> {
        let state = self.store.snapshot().await;
        let record = state
            .jobs
            .get(&job_id)
            .ok_or_else(|| BoardError::NotFound(format!("job {}", job_id)))?;
        Ok(JobStatusView {
            job: record.job.clone(),
            current: record.current.clone(),
            status: record.display_status(),
            entry: state.entries.get(&job_id).cloned(),
            history: record.history.clone(),
        })
    }

    /// Width-change request from the approval workflow. A request without
    /// an operator is taken to come from a subcontractor and is approved on
    /// the spot; otherwise the job shows PENDING APPROVAL until resolved.
    /// The job's real phase is never touched.
    pub async fn request_width_change(
        &self,
        job_id: JobId,
        requested_by: Option<&str>,
    ) -> Result<WidthChangeOutcome> {
        with_retry(&self.config.retry, "request_width_change", || async {
            let mut txn = self.store.begin(vec![RowKey::Job(job_id)]).await?;
            txn.job(job_id)?;
            let Some(operator) = requested_by else {
                tracing::info!(job_id, "Width change from subcontractor auto-approved");
                return Ok(WidthChangeOutcome::AutoApproved);
            };
            txn.job_mut(job_id)?.pending_approval = true;
            self.store.commit(txn).await?;
            tracing::info!(job_id, operator, "Width change awaiting approval");
            Ok(WidthChangeOutcome::PendingApproval)
        })
        .await
    }

    pub async fn resolve_width_change(&self, job_id: JobId) -> Result<()> {
        with_retry(&self.config.retry, "resolve_width_change", || async {
            let mut txn = self.store.begin(vec![RowKey::Job(job_id)]).await?;
            txn.job_mut(job_id)?.pending_approval = false;
            self.store.commit(txn).await
        })
        .await
    }
}
