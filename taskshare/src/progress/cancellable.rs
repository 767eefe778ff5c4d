//! Progress handle with unit counts, a cancellation slot and change observers.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// The callback run when a progress is cancelled.
pub type CancellationHandler = Box<dyn FnOnce() + Send>;

/// A callback receiving the new fraction completed.
type FractionObserver = Arc<dyn Fn(f64) + Send + Sync>;

struct ChildLink {
    progress: CancellableProgress,
    pending_unit_count: i64,
    _observation: Observation,
}

struct Units {
    completed: i64,
    total: i64,
    /// Last fraction sent to observers.
    reported_fraction: f64,
    children: Vec<ChildLink>,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: Vec<(u64, FractionObserver)>,
}

struct Inner {
    units: Mutex<Units>,
    cancelled: AtomicBool,
    cancellation_handler: Mutex<Option<CancellationHandler>>,
    observers: Mutex<Observers>,
    /// Held while a fraction is computed and delivered, so observers see
    /// changes in order. Reentrant for observers that update this progress.
    notify: ReentrantMutex<()>,
}

/// A mutable progress handle that can be cancelled.
///
/// Tracks a completed and a total unit count, exposes the derived fraction
/// completed, and holds a single cancellation handler. Cancellation is
/// idempotent: the handler runs at most once, on the first call to
/// [`cancel`](Self::cancel).
///
/// A progress may adopt structural children with
/// [`add_child`](Self::add_child). A child contributes its fraction to the
/// parent and is cancelled along with it.
#[derive(Clone)]
pub struct CancellableProgress {
    inner: Arc<Inner>,
}

/// A subscription to fraction changes.
///
/// Dropping it unsubscribes. It never keeps the observed progress alive.
#[must_use = "dropping an Observation unsubscribes immediately"]
pub struct Observation {
    source: Weak<Inner>,
    id: u64,
}

impl CancellableProgress {
    /// Creates a progress with the given total unit count.
    #[must_use]
    pub fn new(total_unit_count: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                units: Mutex::new(Units {
                    completed: 0,
                    total: total_unit_count,
                    reported_fraction: 0.0,
                    children: Vec::new(),
                }),
                cancelled: AtomicBool::new(false),
                cancellation_handler: Mutex::new(None),
                observers: Mutex::new(Observers::default()),
                notify: ReentrantMutex::new(()),
            }),
        }
    }

    /// Returns the completed unit count.
    #[must_use]
    pub fn completed_unit_count(&self) -> i64 {
        self.inner.units.lock().completed
    }

    /// Sets the completed unit count.
    pub fn set_completed_unit_count(&self, completed: i64) {
        self.inner.units.lock().completed = completed;
        self.notify_fraction_changed();
    }

    /// Returns the total unit count.
    #[must_use]
    pub fn total_unit_count(&self) -> i64 {
        self.inner.units.lock().total
    }

    /// Sets the total unit count.
    pub fn set_total_unit_count(&self, total: i64) {
        self.inner.units.lock().total = total;
        self.notify_fraction_changed();
    }

    /// Returns the fraction of work completed, including work delegated to
    /// children.
    ///
    /// A progress with no positive total reports `0.0`.
    #[must_use]
    pub fn fraction_completed(&self) -> f64 {
        let units = self.inner.units.lock();
        if units.total <= 0 {
            return 0.0;
        }

        let mut completed = units.completed as f64;
        for link in &units.children {
            completed += link.progress.fraction_completed().min(1.0) * link.pending_unit_count as f64;
        }
        completed / units.total as f64
    }

    /// Installs the cancellation handler, replacing any previous one.
    ///
    /// If the progress is already cancelled, the handler runs immediately.
    pub fn set_cancellation_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.inner.cancellation_handler.lock() = Some(Box::new(handler));
        if self.is_cancelled() {
            self.run_cancellation_handler();
        }
    }

    /// Removes the cancellation handler without running it.
    pub fn clear_cancellation_handler(&self) {
        self.inner.cancellation_handler.lock().take();
    }

    /// Returns true if a cancellation handler is installed.
    #[must_use]
    pub fn has_cancellation_handler(&self) -> bool {
        self.inner.cancellation_handler.lock().is_some()
    }

    /// Requests cancellation.
    ///
    /// Only the first call has an effect: it runs the cancellation handler,
    /// then cancels every structural child.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.run_cancellation_handler();

        let children: Vec<CancellableProgress> = self
            .inner
            .units
            .lock()
            .children
            .iter()
            .map(|link| link.progress.clone())
            .collect();
        for child in children {
            child.cancel();
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Subscribes to fraction changes.
    ///
    /// The observer runs on whichever thread changed the progress, with no
    /// progress locks held.
    pub fn observe_fraction<F>(&self, observer: F) -> Observation
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let mut observers = self.inner.observers.lock();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.entries.push((id, Arc::new(observer)));

        Observation {
            source: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Adopts `child` as a structural child worth `pending_unit_count` units.
    ///
    /// If this progress is already cancelled, the child is cancelled at once.
    pub fn add_child(&self, child: CancellableProgress, pending_unit_count: i64) {
        let parent = Arc::downgrade(&self.inner);
        let observation = child.observe_fraction(move |_| {
            if let Some(inner) = parent.upgrade() {
                CancellableProgress { inner }.notify_fraction_changed();
            }
        });

        self.inner.units.lock().children.push(ChildLink {
            progress: child.clone(),
            pending_unit_count,
            _observation: observation,
        });

        if self.is_cancelled() {
            child.cancel();
        }
        self.notify_fraction_changed();
    }

    /// Returns true if both handles refer to the same progress.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn run_cancellation_handler(&self) {
        let handler = self.inner.cancellation_handler.lock().take();
        if let Some(handler) = handler {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(handler)) {
                warn!("Cancellation handler panicked: {:?}", e);
            }
        }
    }

    fn notify_fraction_changed(&self) {
        let _notifying = self.inner.notify.lock();
        let fraction = self.fraction_completed();
        {
            let mut units = self.inner.units.lock();
            if (units.reported_fraction - fraction).abs() <= f64::EPSILON {
                return;
            }
            units.reported_fraction = fraction;
        }

        let observers: Vec<FractionObserver> = self
            .inner
            .observers
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer(fraction);
            })) {
                warn!("Progress observer panicked: {:?}", e);
            }
        }
    }
}

impl Default for CancellableProgress {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for CancellableProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (completed, total, children) = {
            let units = self.inner.units.lock();
            (units.completed, units.total, units.children.len())
        };
        f.debug_struct("CancellableProgress")
            .field("completed", &completed)
            .field("total", &total)
            .field("children", &children)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Observation {
    /// Returns true while the observed progress is still alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.source.strong_count() > 0
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(inner) = self.source.upgrade() {
            inner
                .observers
                .lock()
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
