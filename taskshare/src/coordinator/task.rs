//! Shared tasks and the per-caller views handed out for them.

use crate::errors::{Outcome, TaskError};
use crate::progress::{CancellableProgress, ProgressMirror};
use crate::promise::{AsyncResult, Resolver};
use futures::future::{abortable, FutureExt};
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use tracing::warn;

/// One unit of real work: its progress paired with its result.
///
/// Cancelling `progress` is expected to make the work reject `result` with
/// [`TaskError::Cancelled`]. The coordinator relies on this to tear down a
/// task once its last caller has cancelled.
#[derive(Debug)]
pub struct SharedTask<T> {
    /// Progress of the real work.
    pub progress: CancellableProgress,
    /// Result of the real work.
    pub result: AsyncResult<T>,
}

impl<T> SharedTask<T> {
    /// Pairs an existing progress and result.
    #[must_use]
    pub fn new(progress: CancellableProgress, result: AsyncResult<T>) -> Self {
        Self { progress, result }
    }
}

impl<T: Send + Sync + 'static> SharedTask<T> {
    /// Creates a task settled by hand through the returned resolver.
    ///
    /// Cancelling the task's progress rejects its result with
    /// [`TaskError::Cancelled`].
    #[must_use]
    pub fn pending(total_unit_count: i64) -> (Self, Resolver<T>) {
        let progress = CancellableProgress::new(total_unit_count);
        let (result, resolver) = AsyncResult::pending();

        let on_cancel = resolver.clone();
        progress.set_cancellation_handler(move || {
            on_cancel.reject(TaskError::Cancelled);
        });

        (Self { progress, result }, resolver)
    }

    /// Runs `work` on the tokio runtime and returns the task tracking it.
    ///
    /// `work` receives the task's progress to report on. Its output settles
    /// the task's result. Cancelling the progress aborts the work and rejects
    /// the result with [`TaskError::Cancelled`]. A panic in the work rejects
    /// the result with a failure.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(total_unit_count: i64, work: F) -> Self
    where
        F: FnOnce(CancellableProgress) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let progress = CancellableProgress::new(total_unit_count);
        let (result, resolver) = AsyncResult::pending();
        let (work, abort_handle) = abortable(work(progress.clone()));

        let work_resolver = resolver.clone();
        tokio::spawn(async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(outcome)) => {
                    work_resolver.resolve(outcome);
                }
                // The cancellation handler has already rejected the result.
                Ok(Err(_aborted)) => {}
                Err(panic) => {
                    warn!("Shared task panicked: {:?}", panic);
                    work_resolver.reject(TaskError::failed(anyhow::anyhow!(
                        "shared task panicked"
                    )));
                }
            }
        });

        progress.set_cancellation_handler(move || {
            abort_handle.abort();
            resolver.reject(TaskError::Cancelled);
        });

        Self { progress, result }
    }
}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> Self {
        Self {
            progress: self.progress.clone(),
            result: self.result.clone(),
        }
    }
}

/// One caller's handle onto a shared task.
///
/// The progress mirrors the shared task's progress. Cancelling it detaches
/// this caller only, unless no other caller is left, in which case the
/// shared work is cancelled. The result settles with the shared outcome, or
/// with [`TaskError::Cancelled`] if this view was cancelled first.
#[derive(Debug)]
pub struct ChildView<T> {
    progress: ProgressMirror,
    result: AsyncResult<T>,
}

impl<T> ChildView<T> {
    pub(crate) fn new(progress: ProgressMirror, result: AsyncResult<T>) -> Self {
        Self { progress, result }
    }

    /// Returns this view's mirrored progress.
    #[must_use]
    pub fn progress(&self) -> &ProgressMirror {
        &self.progress
    }

    /// Returns this view's result.
    #[must_use]
    pub fn result(&self) -> &AsyncResult<T> {
        &self.result
    }

    /// Cancels this view.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    /// Consumes the view, keeping only its result.
    #[must_use]
    pub fn into_result(self) -> AsyncResult<T> {
        self.result
    }

    /// Splits the view into its progress and result.
    #[must_use]
    pub fn into_parts(self) -> (ProgressMirror, AsyncResult<T>) {
        (self.progress, self.result)
    }
}

impl<T: Clone> IntoFuture for ChildView<T> {
    type Output = Outcome<T>;
    type IntoFuture = AsyncResult<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pending_task_rejects_on_cancel() {
        let (task, resolver) = SharedTask::<u32>::pending(10);
        assert!(task.result.is_pending());

        task.progress.cancel();

        assert!(!resolver.is_pending());
        assert!(task.result.peek().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_clone_shares_handles() {
        let (task, _resolver) = SharedTask::<u32>::pending(1);
        let clone = task.clone();
        assert!(task.progress.ptr_eq(&clone.progress));
        assert!(task.result.ptr_eq(&clone.result));
    }

    #[tokio::test]
    async fn test_spawned_task_fulfills() {
        let task = SharedTask::spawn(2, |progress| async move {
            progress.set_completed_unit_count(1);
            progress.set_completed_unit_count(2);
            Ok("decoded".to_string())
        });

        assert_eq!(task.result.clone().await.unwrap(), "decoded");
        assert!((task.progress.fraction_completed() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_spawned_task_cancel_aborts_work() {
        let task = SharedTask::<u32>::spawn(1, |_progress| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });

        task.progress.cancel();

        let err = task.result.clone().await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_spawned_task_panic_rejects() {
        let task = SharedTask::<u32>::spawn(1, |_progress| async move {
            let missing: Option<u32> = None;
            Ok(missing.expect("Intentional panic"))
        });

        let err = task.result.clone().await.unwrap_err();
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_child_view_into_future() {
        let (task, resolver) = SharedTask::<u32>::pending(1);
        let view = ChildView::new(ProgressMirror::new(&task.progress), task.result.clone());

        resolver.fulfill(5);
        assert_eq!(view.await.unwrap(), 5);
    }
}
