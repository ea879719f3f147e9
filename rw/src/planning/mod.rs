//! Planning module - expansion of an iteration into ordered sub-tasks
//!
//! ```text
//! prompt + progress summary + lessons → TaskExpander → [task, task, ...]
//! ```
//!
//! The expander is only consulted when the mode decider picks multi mode. An empty or
//! unparseable plan is not an error; the controller turns it into a single no-op task.

mod expander;

pub use expander::{LlmTaskExpander, PLAN_TOOL, StaticExpander, TaskExpander};
