use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::scheduler::{DeviceId, DeviceKind, DeviceRegistry};

/// A physical station (or the unassigned pseudo-device) known to the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub kind: DeviceKind,
}

impl DeviceConfig {
    pub fn new(id: impl Into<DeviceId>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Bounded exponential backoff for transient store failures
/// (deadlocks, serialization conflicts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-indexed), without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay_ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub listen_addr: SocketAddr,
    pub devices: Vec<DeviceConfig>,
    /// Shift ids that automatic-spreader lanes may use.
    pub shifts: Vec<String>,
    /// Lane shift for automatic jobs placed on the board at approval.
    pub default_shift: String,
    pub retry: RetryPolicy,
    /// When set, the server checks for a day rollover on this interval.
    pub maintenance_interval_secs: Option<u64>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            devices: vec![
                DeviceConfig::new("SP0", DeviceKind::Unassigned),
                DeviceConfig::new("SP1", DeviceKind::AutomaticSpreader),
                DeviceConfig::new("SP2", DeviceKind::AutomaticSpreader),
                DeviceConfig::new("SP3", DeviceKind::AutomaticSpreader),
                DeviceConfig::new("MS", DeviceKind::ManualStation),
                DeviceConfig::new("CT1", DeviceKind::Cutter),
                DeviceConfig::new("CT2", DeviceKind::Cutter),
            ],
            shifts: vec!["1".to_string(), "2".to_string()],
            default_shift: "1".to_string(),
            retry: RetryPolicy::default(),
            maintenance_interval_secs: None,
        }
    }
}

impl BoardConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_device(mut self, id: impl Into<DeviceId>, kind: DeviceKind) -> Self {
        self.devices.push(DeviceConfig::new(id, kind));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_maintenance_interval(mut self, secs: u64) -> Self {
        self.maintenance_interval_secs = Some(secs);
        self
    }

    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BoardError::Validation(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: BoardConfig = serde_json::from_str(&raw).map_err(|e| {
            BoardError::Validation(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        DeviceRegistry::new(&self.devices)?;

        if self.shifts.is_empty() {
            return Err(BoardError::Validation(
                "at least one shift must be configured".to_string(),
            ));
        }
        for (i, shift) in self.shifts.iter().enumerate() {
            if self.shifts[..i].contains(shift) {
                return Err(BoardError::Validation(format!(
                    "shift {} is configured twice",
                    shift
                )));
            }
        }
        if !self.shifts.contains(&self.default_shift) {
            return Err(BoardError::Validation(format!(
                "default shift {} is not a configured shift",
                self.default_shift
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(BoardError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn board_config_default() {
        let cfg = BoardConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.devices.len(), 7);
        assert_eq!(cfg.default_shift, "1");
        assert!(cfg.maintenance_interval_secs.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff_ms, 10);
        assert_eq!(policy.max_backoff_ms, 500);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(10));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(20));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(80));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn board_config_builders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = BoardConfig::new(addr)
            .with_device("SP4", DeviceKind::AutomaticSpreader)
            .with_maintenance_interval(60);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.devices.last().unwrap().id, "SP4");
        assert_eq!(cfg.maintenance_interval_secs, Some(60));
    }

    #[test]
    fn default_shift_must_be_configured() {
        let cfg = BoardConfig {
            default_shift: "3".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(BoardError::Validation(_))));
    }

    #[test]
    fn duplicate_shifts_are_rejected() {
        let cfg = BoardConfig {
            shifts: vec!["1".to_string(), "1".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let cfg = BoardConfig::default().with_retry(RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"shifts": ["A", "B"], "default_shift": "B", "retry": {{"max_attempts": 3}}}}"#
        )
        .unwrap();

        let cfg = BoardConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.shifts, vec!["A", "B"]);
        assert_eq!(cfg.default_shift, "B");
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_backoff_ms, 10);
        assert_eq!(cfg.devices.len(), 7);
    }

    #[test]
    fn malformed_file_is_a_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            BoardConfig::from_file(file.path()),
            Err(BoardError::Validation(_))
        ));
    }
}
