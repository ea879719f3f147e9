//! Loop execution module
//!
//! The controller runs iterations of the Ralph Wiggum loop: decide a mode, expand or
//! synthesise tasks, execute them in order, evaluate the combined output, merge it into
//! the carried state, and restart with a fresh segment at each boundary.

mod config;
mod controller;
mod outcome;

pub use config::{DEFAULT_MAX_ITERATIONS, DEFAULT_TASK_QUEUE, LoopSettings, RunConfig};
pub use controller::{LoopController, Step};
pub use outcome::{IterationResult, RunReport, TerminalOutcome};
