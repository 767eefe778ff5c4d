//! Keyed registry of shared tasks with last-child-cancels arbitration.

use super::{ChildView, CoordinatorConfig, CoordinatorStats, SharedTask, TaskInfo};
use crate::errors::{CoordinatorError, Outcome, TaskError};
use crate::progress::{CancellableProgress, ProgressMirror};
use crate::promise::{AsyncResult, Resolver};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

type ChildId = u64;

#[derive(Default)]
struct EntryState {
    /// Child views that still count towards the task.
    attached: HashSet<ChildId>,
    next_child_id: ChildId,
}

/// A registered task and the child views attached to it.
struct RegistryEntry<T> {
    task_id: Uuid,
    key: String,
    coordinator: Arc<str>,
    registered_at: DateTime<Utc>,
    task: SharedTask<T>,
    state: Mutex<EntryState>,
}

impl<T> RegistryEntry<T> {
    fn new(key: &impl Debug, coordinator: Arc<str>, task: SharedTask<T>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            key: format!("{key:?}"),
            coordinator,
            registered_at: Utc::now(),
            task,
            state: Mutex::new(EntryState::default()),
        }
    }

    /// Counts one more child view.
    fn attach(&self) -> ChildId {
        let mut state = self.state.lock();
        let child_id = state.next_child_id;
        state.next_child_id += 1;
        state.attached.insert(child_id);
        child_id
    }

    fn child_count(&self) -> u32 {
        u32::try_from(self.state.lock().attached.len()).unwrap_or(u32::MAX)
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            task_id: self.task_id,
            key: self.key.clone(),
            child_count: self.child_count(),
            registered_at: self.registered_at,
            fraction_completed: self.task.progress.fraction_completed(),
        }
    }
}

struct Registry<K, T> {
    config: CoordinatorConfig,
    name: Arc<str>,
    entries: Mutex<HashMap<K, Arc<RegistryEntry<T>>>>,
}

/// Shares in-flight tasks between callers asking for the same key.
///
/// The first caller for a key builds a [`SharedTask`] and registers it; later
/// callers look it up. Either way each caller receives its own
/// [`ChildView`]. Cancelling a child view only detaches that caller while
/// other callers remain; cancelling the last one cancels the shared task.
/// A task leaves the registry once it has resolved and every child view has
/// received the outcome.
///
/// Locks are always taken registry first, then entry. Neither is held while
/// progress is cancelled or a result is settled, so continuations may call
/// back into the coordinator.
///
/// Cloning the coordinator shares its registry.
pub struct TaskCoordinator<K, T> {
    registry: Arc<Registry<K, T>>,
}

impl<K, T> TaskCoordinator<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_valid_config(CoordinatorConfig::default())
    }

    /// Creates a coordinator with the given configuration.
    pub fn with_config(config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: CoordinatorConfig) -> Self {
        Self {
            registry: Arc::new(Registry {
                name: Arc::from(config.name.as_str()),
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.registry.config
    }

    /// Joins the task in flight for `key`, if there is one.
    ///
    /// Returns `None` without side effects when no task is registered.
    pub fn lookup(&self, key: &K) -> Option<ChildView<T>> {
        let (entry, child_id) = {
            let entries = self.registry.entries.lock();
            let entry = Arc::clone(entries.get(key)?);
            let child_id = entry.attach();
            (entry, child_id)
        };

        debug!(
            coordinator = %entry.coordinator,
            task_id = %entry.task_id,
            key = %entry.key,
            child_id,
            "Joined shared task"
        );
        Some(self.make_child_view(key.clone(), &entry, child_id))
    }

    /// Registers `task` under `key` and returns the first child view onto it.
    ///
    /// # Panics
    ///
    /// Panics if a task is already registered for `key`. Call
    /// [`lookup`](Self::lookup) first, or use
    /// [`get_or_register`](Self::get_or_register).
    #[track_caller]
    pub fn register(&self, key: K, task: SharedTask<T>) -> ChildView<T> {
        match self.try_register(key, task) {
            Ok(view) => view,
            Err(e) => panic!("{e}"),
        }
    }

    /// Registers `task` under `key`, failing if the key is taken.
    pub fn try_register(
        &self,
        key: K,
        task: SharedTask<T>,
    ) -> Result<ChildView<T>, CoordinatorError> {
        let (entry, child_id) = {
            let mut entries = self.registry.entries.lock();
            if entries.contains_key(&key) {
                return Err(CoordinatorError::already_registered(&key));
            }
            let entry = Arc::new(RegistryEntry::new(&key, Arc::clone(&self.registry.name), task));
            let child_id = entry.attach();
            entries.insert(key.clone(), Arc::clone(&entry));
            (entry, child_id)
        };

        debug!(
            coordinator = %entry.coordinator,
            task_id = %entry.task_id,
            key = %entry.key,
            "Registered shared task"
        );
        Ok(self.make_child_view(key, &entry, child_id))
    }

    /// Joins the task in flight for `key`, or registers the one `make` builds.
    ///
    /// The lookup and the registration happen under one lock, so two callers
    /// racing on the same key never both build a task. `make` runs under
    /// that lock and must not call back into this coordinator.
    pub fn get_or_register<F>(&self, key: K, make: F) -> ChildView<T>
    where
        F: FnOnce() -> SharedTask<T>,
    {
        let (entry, child_id, created) = {
            let mut entries = self.registry.entries.lock();
            let (entry, created) = match entries.get(&key) {
                Some(entry) => (Arc::clone(entry), false),
                None => {
                    let entry =
                        Arc::new(RegistryEntry::new(&key, Arc::clone(&self.registry.name), make()));
                    entries.insert(key.clone(), Arc::clone(&entry));
                    (entry, true)
                }
            };
            let child_id = entry.attach();
            (entry, child_id, created)
        };

        debug!(
            coordinator = %entry.coordinator,
            task_id = %entry.task_id,
            key = %entry.key,
            child_id,
            created,
            "Attached to shared task"
        );
        self.make_child_view(key, &entry, child_id)
    }

    /// Returns true if a task is in flight for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.registry.entries.lock().contains_key(key)
    }

    /// Returns the number of child views attached to the task for `key`.
    #[must_use]
    pub fn child_count(&self, key: &K) -> Option<u32> {
        self.registry
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.child_count())
    }

    /// Returns the number of tasks in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.entries.lock().len()
    }

    /// Returns true if no task is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.entries.lock().is_empty()
    }

    /// Takes a snapshot of the registry.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        let tasks = self
            .registry
            .entries
            .lock()
            .values()
            .map(|entry| entry.info())
            .collect();
        CoordinatorStats {
            name: self.registry.config.name.clone(),
            tasks,
        }
    }

    /// Builds the view for an already attached child and wires it to the
    /// entry's task.
    fn make_child_view(
        &self,
        key: K,
        entry: &Arc<RegistryEntry<T>>,
        child_id: ChildId,
    ) -> ChildView<T> {
        let mirror = ProgressMirror::with_total_unit_count(
            &entry.task.progress,
            self.registry.config.mirror_total_unit_count,
        );
        let (result, resolver) = AsyncResult::pending();

        // Both closures end up owned by the entry's own task, so they only
        // hold weak links back to it.
        let cancel_entry = Arc::downgrade(entry);
        let cancel_resolver = resolver.clone();
        mirror.progress().set_cancellation_handler(move || {
            cancel_child(&cancel_entry, child_id, &cancel_resolver);
        });

        // Runs at once if the task has already resolved.
        let registry = Arc::downgrade(&self.registry);
        let completed_entry = Arc::downgrade(entry);
        let child_progress = mirror.progress().clone();
        entry.task.result.on_resolved(move |outcome| {
            complete_child(
                &registry,
                &key,
                &completed_entry,
                child_id,
                &child_progress,
                &resolver,
                outcome,
            );
        });

        ChildView::new(mirror, result)
    }
}

/// Hands the task's outcome to one child view and drops the entry once no
/// child is left.
fn complete_child<K, T>(
    registry: &Weak<Registry<K, T>>,
    key: &K,
    entry: &Weak<RegistryEntry<T>>,
    child_id: ChildId,
    child_progress: &CancellableProgress,
    resolver: &Resolver<T>,
    outcome: &Outcome<T>,
) where
    K: Eq + Hash,
    T: Clone,
{
    let Some(entry) = entry.upgrade() else {
        // The coordinator is gone and took the entry with it.
        child_progress.clear_cancellation_handler();
        resolver.resolve(outcome.clone());
        return;
    };

    let registry = registry.upgrade();
    {
        let mut entries = registry.as_ref().map(|r| r.entries.lock());
        let (was_attached, remaining) = {
            let mut state = entry.state.lock();
            let was_attached = state.attached.remove(&child_id);
            // A late cancellation must not reach a child that has its result.
            child_progress.clear_cancellation_handler();
            (was_attached, state.attached.len())
        };

        if was_attached && remaining == 0 {
            if let Some(entries) = entries.as_mut() {
                if entries
                    .get(key)
                    .is_some_and(|current| Arc::ptr_eq(current, &entry))
                {
                    entries.remove(key);
                    debug!(
                        coordinator = %entry.coordinator,
                        task_id = %entry.task_id,
                        key = %entry.key,
                        "Removed resolved shared task"
                    );
                }
            }
        }
    }

    // No-op if this child already rejected through its own cancellation.
    resolver.resolve(outcome.clone());
}

/// Detaches a cancelled child, or cancels the task if it was the last one.
fn cancel_child<T>(entry: &Weak<RegistryEntry<T>>, child_id: ChildId, resolver: &Resolver<T>) {
    let Some(entry) = entry.upgrade() else {
        // Nothing left to arbitrate once the coordinator has dropped the entry.
        resolver.reject(TaskError::Cancelled);
        return;
    };

    // The completion path owns teardown once the task has resolved.
    if entry.task.result.is_resolved() {
        return;
    }

    let last_child = {
        let mut state = entry.state.lock();
        // Checked again under the lock the completion path detaches under.
        if entry.task.result.is_resolved() || !state.attached.contains(&child_id) {
            return;
        }
        if state.attached.len() == 1 {
            true
        } else {
            state.attached.remove(&child_id);
            false
        }
    };

    if last_child {
        debug!(
            coordinator = %entry.coordinator,
            task_id = %entry.task_id,
            key = %entry.key,
            child_id,
            "Last child cancelled, cancelling shared task"
        );
        entry.task.progress.cancel();
    } else {
        debug!(
            coordinator = %entry.coordinator,
            task_id = %entry.task_id,
            key = %entry.key,
            child_id,
            "Child cancelled, shared task continues"
        );
    }
    resolver.reject(TaskError::Cancelled);
}

impl<K, T> Default for TaskCoordinator<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Clone for TaskCoordinator<K, T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K, T> std::fmt::Debug for TaskCoordinator<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCoordinator")
            .field("name", &self.registry.name)
            .field("tasks", &self.registry.entries.lock().len())
            .finish()
    }
}
