//! # Taskshare
//!
//! Lets many callers share one long-running, cancellable, progress-reporting
//! task (a download, a decode) without running it twice, and without one
//! caller's cancellation breaking another caller's request.
//!
//! Taskshare provides:
//!
//! - **Shared tasks**: one unit of real work, its progress paired with its result
//! - **Child views**: each caller gets its own mirrored progress and its own result
//! - **Last-child-cancels**: cancelling a view only detaches that caller, unless
//!   it is the last one, in which case the real work is cancelled
//! - **Keyed registry**: in-flight tasks are found by key and removed once resolved
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskshare::prelude::*;
//!
//! let downloads: TaskCoordinator<String, Vec<u8>> = TaskCoordinator::new();
//!
//! let view = downloads.get_or_register(url.clone(), || {
//!     SharedTask::spawn(100, move |progress| download(url, progress))
//! });
//!
//! // Cancelling only detaches this caller while others still wait.
//! let bytes = view.await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod coordinator;
pub mod errors;
pub mod progress;
pub mod promise;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coordinator::{
        ChildView, CoordinatorConfig, CoordinatorStats, SharedTask, TaskCoordinator,
    };
    pub use crate::errors::{CoordinatorError, Outcome, TaskError};
    pub use crate::progress::{CancellableProgress, Observation, ProgressMirror};
    pub use crate::promise::{AsyncResult, Resolver};
}
