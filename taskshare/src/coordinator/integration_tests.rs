//! End-to-end scenarios for callers sharing tasks through a coordinator.

#[cfg(test)]
mod tests {
    use crate::coordinator::{ChildView, SharedTask, TaskCoordinator};
    use crate::errors::{Outcome, TaskError};
    use crate::progress::CancellableProgress;
    use crate::promise::Resolver;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
    enum TestError {
        #[error("failed")]
        Failed,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn manager() -> TaskCoordinator<String, String> {
        init_tracing();
        TaskCoordinator::new()
    }

    fn task_tuple() -> (SharedTask<String>, Resolver<String>) {
        SharedTask::pending(10)
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    fn settled(view: &ChildView<String>) -> Outcome<String> {
        view.result().peek().expect("child view should have settled")
    }

    #[test]
    fn test_lookup_returns_none_for_new_key() {
        let manager = manager();
        assert!(manager.lookup(&key("a")).is_none());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_none_after_fulfilled() {
        let manager = manager();
        let (task, resolver) = task_tuple();
        resolver.fulfill("success".to_string());

        let view = manager.register(key("a"), task);
        assert_eq!(view.await.unwrap(), "success");
        assert!(manager.lookup(&key("a")).is_none());
    }

    #[tokio::test]
    async fn test_lookup_none_after_rejected() {
        let manager = manager();
        let (task, resolver) = task_tuple();
        resolver.reject(TaskError::failed(TestError::Failed));

        let err = manager.register(key("a"), task).await.unwrap_err();
        assert_eq!(
            err.cause().and_then(|e| e.downcast_ref::<TestError>()),
            Some(&TestError::Failed)
        );
        assert!(manager.lookup(&key("a")).is_none());
    }

    #[test]
    fn test_lookup_returns_new_view_while_pending() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task.clone());
        let second = manager.lookup(&key("a")).unwrap();

        assert!(!second.result().ptr_eq(&task.result));
        assert!(!second.progress().progress().ptr_eq(&task.progress));
        assert!(!second.result().ptr_eq(first.result()));
        assert!(!second.progress().progress().ptr_eq(first.progress().progress()));

        resolver.fulfill("success".to_string());
    }

    #[tokio::test]
    async fn test_shared_results() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task);
        let second = manager.lookup(&key("a")).unwrap();

        resolver.fulfill("success".to_string());

        let results = join_all([first.into_result(), second.into_result()]).await;
        assert_eq!(results[0].as_ref().unwrap(), "success");
        assert_eq!(results[1].as_ref().unwrap(), "success");
    }

    #[tokio::test]
    async fn test_shared_errors() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task);
        let second = manager.lookup(&key("a")).unwrap();

        resolver.reject(TaskError::failed(TestError::Failed));

        let results = join_all([first.into_result(), second.into_result()]).await;
        let first_err = results[0].as_ref().unwrap_err();
        let second_err = results[1].as_ref().unwrap_err();
        assert!(first_err.same_as(second_err));
        assert_eq!(
            second_err.cause().and_then(|e| e.downcast_ref::<TestError>()),
            Some(&TestError::Failed)
        );
    }

    #[test]
    fn test_cancel_first_not_second() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task.clone());
        let second = manager.lookup(&key("a")).unwrap();

        first.cancel();
        assert!(settled(&first).unwrap_err().is_cancelled());

        resolver.fulfill("success".to_string());
        assert_eq!(settled(&second).unwrap(), "success");
        assert!(!task.progress.is_cancelled());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_cancel_second_not_first() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task);
        let second = manager.lookup(&key("a")).unwrap();

        second.cancel();
        assert!(settled(&second).unwrap_err().is_cancelled());

        resolver.fulfill("success".to_string());
        assert_eq!(settled(&first).unwrap(), "success");
    }

    #[test]
    fn test_cancel_both_cancels_task() {
        for reverse in [false, true] {
            let manager = manager();
            let (task, _resolver) = task_tuple();

            let first = manager.register(key("a"), task.clone());
            let second = manager.lookup(&key("a")).unwrap();

            if reverse {
                second.cancel();
                first.cancel();
            } else {
                first.cancel();
                second.cancel();
            }

            assert!(task.result.peek().unwrap().unwrap_err().is_cancelled());
            assert!(settled(&first).unwrap_err().is_cancelled());
            assert!(settled(&second).unwrap_err().is_cancelled());
            assert!(manager.is_empty());
        }
    }

    #[test]
    fn test_cancel_parent_after_a_child_has_resolved() {
        let manager = manager();
        let tuples: Vec<_> = (0..3).map(|_| task_tuple()).collect();

        let parent = CancellableProgress::new(3);
        let views: Vec<_> = tuples
            .iter()
            .enumerate()
            .map(|(i, (task, _))| {
                let view = manager.register(format!("id-{i}"), task.clone());
                parent.add_child(view.progress().progress().clone(), 1);
                view
            })
            .collect();

        tuples[0].1.fulfill("First Result".to_string());
        parent.cancel();

        assert_eq!(settled(&views[0]).unwrap(), "First Result");
        for view in &views[1..] {
            assert!(settled(view).unwrap_err().is_cancelled());
        }
        assert!(!tuples[0].0.progress.is_cancelled());
        assert!(tuples[1].0.progress.is_cancelled());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_child_progress_values() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task.clone());
        let second = manager.lookup(&key("a")).unwrap();

        task.progress.set_completed_unit_count(5);
        let expected = task.progress.fraction_completed();
        assert!((first.progress().fraction_completed() - expected).abs() < 1e-3);
        assert!((second.progress().fraction_completed() - expected).abs() < 1e-3);

        resolver.fulfill("success".to_string());
    }

    #[test]
    fn test_scenario_shared_progress_then_success() {
        let manager = manager();
        let (task, resolver) = task_tuple();

        let first = manager.register(key("a"), task.clone());
        let second = manager.lookup(&key("a")).unwrap();

        task.progress.set_completed_unit_count(5);
        assert!((first.progress().fraction_completed() - 0.5).abs() < 1e-9);
        assert!((second.progress().fraction_completed() - 0.5).abs() < 1e-9);

        resolver.fulfill("success".to_string());
        assert_eq!(settled(&first).unwrap(), "success");
        assert_eq!(settled(&second).unwrap(), "success");
        assert!(manager.lookup(&key("a")).is_none());
    }

    #[test]
    fn test_scenario_cancel_each_child() {
        let manager = manager();
        let (task, _resolver) = task_tuple();

        let first = manager.register(key("b"), task.clone());
        let second = manager.lookup(&key("b")).unwrap();

        first.cancel();
        assert!(settled(&first).unwrap_err().is_cancelled());
        assert!(task.result.is_pending());

        second.cancel();
        assert!(task.result.peek().unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_spawned_work() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));

        let views: Vec<_> = (0..5)
            .map(|_| {
                let runs = runs.clone();
                manager.get_or_register(key("chapter-1"), move || {
                    SharedTask::spawn(2, move |progress| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        progress.set_completed_unit_count(2);
                        Ok("decoded".to_string())
                    })
                })
            })
            .collect();

        assert_eq!(manager.child_count(&key("chapter-1")), Some(5));

        let results = join_all(views.into_iter().map(ChildView::into_result)).await;
        for result in results {
            assert_eq!(result.unwrap(), "decoded");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_work_cancelled_by_last_caller() {
        let manager = manager();
        let finished = Arc::new(AtomicUsize::new(0));

        let finished_clone = finished.clone();
        let task = SharedTask::spawn(1, move |_progress| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            finished_clone.fetch_add(1, Ordering::SeqCst);
            Ok("never".to_string())
        });
        let first = manager.register(key("a"), task.clone());
        let second = manager.lookup(&key("a")).unwrap();

        second.cancel();
        first.cancel();

        assert!(task.result.clone().await.unwrap_err().is_cancelled());
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_concurrent_lookups_and_cancels() {
        let manager = manager();

        for _ in 0..20 {
            let (task, resolver) = task_tuple();
            let first = manager.register(key("a"), task.clone());

            let workers: Vec<_> = (0..8)
                .map(|i| {
                    let manager = manager.clone();
                    std::thread::spawn(move || {
                        let mut views = Vec::new();
                        for _ in 0..25 {
                            if let Some(view) = manager.lookup(&key("a")) {
                                if i % 2 == 0 {
                                    view.cancel();
                                }
                                views.push(view);
                            }
                        }
                        views
                    })
                })
                .collect();

            std::thread::yield_now();
            resolver.fulfill("v".to_string());

            for worker in workers {
                for view in worker.join().unwrap() {
                    match settled(&view) {
                        Ok(value) => assert_eq!(value, "v"),
                        Err(err) => assert!(err.is_cancelled()),
                    }
                }
            }

            assert_eq!(settled(&first).unwrap(), "v");
            assert!(!task.progress.is_cancelled());
            assert!(manager.is_empty());
        }
    }
}
