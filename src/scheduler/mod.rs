pub mod board;
pub mod claim;
pub mod device;
pub mod job;
pub mod lanes;
pub mod phase;
pub mod reconcile;
pub mod rollover;

pub use board::{BoardCard, BoardView, LaneView};
pub use device::{DeviceId, DeviceKind, DeviceRegistry};
pub use job::{Job, JobId, JobRecord, PhaseTransition, SpreadingMethod};
pub use lanes::{KanbanEntry, LaneDay, LaneKey};
pub use phase::{Phase, PhaseRecord};
pub use reconcile::SweepOutcome;
pub use rollover::RolloverOutcome;
