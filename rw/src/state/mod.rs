//! Carried run state and its durable checkpoints
//!
//! `IterationState` is exclusively owned by the active execution segment. At a restart
//! boundary it is committed through `CheckpointStore` and the next segment is seeded from
//! the committed bytes alone.

mod checkpoint;
mod iteration;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use iteration::{CANCELLED_REASON, HistoryEntry, IterationState, Terminal};
