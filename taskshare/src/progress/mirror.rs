//! Progress that copies another progress's fraction without being linked to it.

use super::{CancellableProgress, Observation};
use tracing::trace;

/// Default total unit count of a mirror.
///
/// Only sets the granularity of the mirrored fraction.
pub const MIRROR_TOTAL_UNIT_COUNT: i64 = 1024;

/// A progress that follows the fraction completed of a source progress.
///
/// The mirror is neither a parent nor a child of its source, so cancelling
/// one never cancels the other. Its own cancellation handler is free for the
/// owner to wire up. Dropping the mirror stops the observation.
pub struct ProgressMirror {
    progress: CancellableProgress,
    _observation: Observation,
}

impl ProgressMirror {
    /// Creates a mirror of `source` with the default granularity.
    #[must_use]
    pub fn new(source: &CancellableProgress) -> Self {
        Self::with_total_unit_count(source, MIRROR_TOTAL_UNIT_COUNT)
    }

    /// Creates a mirror of `source` whose own total is `total_unit_count`.
    #[must_use]
    pub fn with_total_unit_count(source: &CancellableProgress, total_unit_count: i64) -> Self {
        let progress = CancellableProgress::new(total_unit_count);
        update_from_fraction(&progress, source.fraction_completed());

        let target = progress.clone();
        let observation = source.observe_fraction(move |fraction| {
            trace!(fraction, "Mirroring progress update");
            update_from_fraction(&target, fraction);
        });

        Self {
            progress,
            _observation: observation,
        }
    }

    /// Returns the mirror's own progress.
    #[must_use]
    pub fn progress(&self) -> &CancellableProgress {
        &self.progress
    }

    /// Returns the mirrored fraction completed.
    #[must_use]
    pub fn fraction_completed(&self) -> f64 {
        self.progress.fraction_completed()
    }

    /// Cancels the mirror's own progress.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    /// Returns whether the mirror's own progress was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.progress.is_cancelled()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn update_from_fraction(progress: &CancellableProgress, fraction: f64) {
    let fraction = if fraction.is_finite() { fraction } else { 0.0 };
    let total = progress.total_unit_count();
    progress.set_completed_unit_count((total as f64 * fraction).round() as i64);
}

impl std::fmt::Debug for ProgressMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressMirror")
            .field("progress", &self.progress)
            .finish()
    }
}
