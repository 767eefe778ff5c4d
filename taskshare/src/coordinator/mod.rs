//! Sharing one in-flight task between many callers.
//!
//! This module provides:
//! - SharedTask, the progress/result pair of one unit of real work
//! - ChildView, a caller's own handle onto a shared task
//! - TaskCoordinator, the keyed registry that hands out child views and
//!   arbitrates their cancellation
//! - CoordinatorConfig and CoordinatorStats for setup and diagnostics

mod config;
mod registry;
mod stats;
mod task;

#[cfg(test)]
mod integration_tests;

pub use config::{CoordinatorConfig, DEFAULT_COORDINATOR_NAME};
pub use registry::TaskCoordinator;
pub use stats::{CoordinatorStats, TaskInfo};
pub use task::{ChildView, SharedTask};
