use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::error::{BoardError, Result};
use crate::scheduler::Job;

pub type DeviceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    AutomaticSpreader,
    ManualStation,
    Cutter,
    /// Pseudo-device meaning "off the board".
    Unassigned,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::AutomaticSpreader => write!(f, "automatic spreader"),
            DeviceKind::ManualStation => write!(f, "manual station"),
            DeviceKind::Cutter => write!(f, "cutter"),
            DeviceKind::Unassigned => write!(f, "unassigned"),
        }
    }
}

/// Known stations and the job types each of them accepts.
///
/// All checks are pure lookups, so callers run them before touching any
/// state and a rejection never leaves a partial write behind.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    kinds: HashMap<DeviceId, DeviceKind>,
    manual_station: DeviceId,
    unassigned: DeviceId,
}

impl DeviceRegistry {
    pub fn new(devices: &[DeviceConfig]) -> Result<Self> {
        let mut kinds = HashMap::new();
        for device in devices {
            if kinds.insert(device.id.clone(), device.kind).is_some() {
                return Err(BoardError::Validation(format!(
                    "device {} is configured twice",
                    device.id
                )));
            }
        }

        let manual_station = Self::single_of(devices, DeviceKind::ManualStation)?;
        let unassigned = Self::single_of(devices, DeviceKind::Unassigned)?;

        Ok(Self {
            kinds,
            manual_station,
            unassigned,
        })
    }

    fn single_of(devices: &[DeviceConfig], kind: DeviceKind) -> Result<DeviceId> {
        let mut matching = devices.iter().filter(|d| d.kind == kind);
        match (matching.next(), matching.next()) {
            (Some(device), None) => Ok(device.id.clone()),
            _ => Err(BoardError::Validation(format!(
                "exactly one {} device must be configured",
                kind
            ))),
        }
    }

    pub fn kind(&self, device: &str) -> Result<DeviceKind> {
        self.kinds
            .get(device)
            .copied()
            .ok_or_else(|| BoardError::NotFound(format!("device {}", device)))
    }

    pub fn manual_station(&self) -> &DeviceId {
        &self.manual_station
    }

    pub fn unassigned(&self) -> &DeviceId {
        &self.unassigned
    }

    pub fn is_unassigned(&self, device: &str) -> bool {
        device == self.unassigned
    }

    pub fn is_cutter(&self, device: &str) -> bool {
        matches!(self.kinds.get(device), Some(DeviceKind::Cutter))
    }

    /// Board move check: the manual station takes only MANUAL jobs,
    /// automatic spreaders reject them, and anything may go back to the
    /// unassigned pseudo-device.
    pub fn validate(&self, job: &Job, target: &str) -> Result<()> {
        match self.kind(target)? {
            DeviceKind::Unassigned => Ok(()),
            DeviceKind::ManualStation if job.is_manual() => Ok(()),
            DeviceKind::ManualStation => Err(incompatible(
                target,
                format!("job {} is not spread manually", job.id),
            )),
            DeviceKind::AutomaticSpreader if job.is_manual() => Err(incompatible(
                target,
                format!("job {} must be spread at the manual station", job.id),
            )),
            DeviceKind::AutomaticSpreader => Ok(()),
            DeviceKind::Cutter => Err(incompatible(
                target,
                "cutters take jobs through status updates, not board moves",
            )),
        }
    }

    /// Like [`validate`](Self::validate) but for a station that will actually
    /// spread the job, which excludes the pseudo-device.
    pub fn validate_spreader(&self, job: &Job, target: &str) -> Result<()> {
        if self.is_unassigned(target) {
            return Err(incompatible(target, "not a spreading station"));
        }
        self.validate(job, target)
    }

    pub fn validate_cutter(&self, target: &str) -> Result<()> {
        match self.kind(target)? {
            DeviceKind::Cutter => Ok(()),
            other => Err(incompatible(target, format!("a {} cannot cut", other))),
        }
    }
}

fn incompatible(device: &str, reason: impl Into<String>) -> BoardError {
    BoardError::IncompatibleDevice {
        device: device.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoardConfig;
    use crate::scheduler::SpreadingMethod;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(&BoardConfig::default().devices).unwrap()
    }

    fn auto_job() -> Job {
        Job::new(1, "A", SpreadingMethod::Automatic)
    }

    fn manual_job() -> Job {
        Job::new(2, "M", SpreadingMethod::Manual)
    }

    #[test]
    fn manual_station_accepts_only_manual_jobs() {
        let reg = registry();
        assert!(reg.validate(&manual_job(), "MS").is_ok());
        assert!(matches!(
            reg.validate(&auto_job(), "MS"),
            Err(BoardError::IncompatibleDevice { .. })
        ));
    }

    #[test]
    fn automatic_spreaders_reject_manual_jobs() {
        let reg = registry();
        assert!(reg.validate(&auto_job(), "SP1").is_ok());
        assert!(matches!(
            reg.validate(&manual_job(), "SP2"),
            Err(BoardError::IncompatibleDevice { .. })
        ));
    }

    #[test]
    fn unassigned_accepts_everything_on_the_board_only() {
        let reg = registry();
        assert!(reg.validate(&auto_job(), "SP0").is_ok());
        assert!(reg.validate(&manual_job(), "SP0").is_ok());
        assert!(reg.validate_spreader(&auto_job(), "SP0").is_err());
    }

    #[test]
    fn cutters_are_not_board_targets() {
        let reg = registry();
        assert!(reg.validate(&auto_job(), "CT1").is_err());
        assert!(reg.validate_cutter("CT1").is_ok());
        assert!(reg.validate_cutter("SP1").is_err());
    }

    #[test]
    fn unknown_device_is_not_found() {
        let reg = registry();
        assert!(matches!(
            reg.validate(&auto_job(), "SP9"),
            Err(BoardError::NotFound(_))
        ));
    }

    #[test]
    fn registry_requires_single_manual_and_unassigned() {
        let devices = vec![
            DeviceConfig::new("SP0", DeviceKind::Unassigned),
            DeviceConfig::new("MS", DeviceKind::ManualStation),
            DeviceConfig::new("MS2", DeviceKind::ManualStation),
        ];
        assert!(DeviceRegistry::new(&devices).is_err());

        let devices = vec![DeviceConfig::new("MS", DeviceKind::ManualStation)];
        assert!(DeviceRegistry::new(&devices).is_err());

        let devices = vec![
            DeviceConfig::new("SP0", DeviceKind::Unassigned),
            DeviceConfig::new("MS", DeviceKind::ManualStation),
            DeviceConfig::new("MS", DeviceKind::Cutter),
        ];
        assert!(DeviceRegistry::new(&devices).is_err());
    }
}
