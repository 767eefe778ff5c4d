//! Progress reporting with cancellation.
//!
//! This module provides:
//! - CancellableProgress, a unit-count progress with a single cancellation handler
//! - Observation, a subscription to fraction changes
//! - ProgressMirror, which copies a progress's fraction without linking to it

mod cancellable;
mod mirror;

pub use cancellable::{CancellableProgress, CancellationHandler, Observation};
pub use mirror::{ProgressMirror, MIRROR_TOTAL_UNIT_COUNT};
