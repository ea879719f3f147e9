//! Stable exit codes for `rw` commands.

/// The run completed, or a read-only command succeeded.
pub const OK: i32 = 0;
/// Any error not covered below, such as an unreadable checkpoint.
pub const ERROR: i32 = 1;
/// The iteration budget ran out before completion was detected.
pub const EXHAUSTED: i32 = 2;
/// A collaborator failed after its retry budget was spent.
pub const FAILED: i32 = 3;
/// Invalid configuration or missing credential; no iteration ran.
pub const CONFIG: i32 = 4;
/// Cancelled at an iteration boundary (128 + SIGINT).
pub const CANCELLED: i32 = 130;
