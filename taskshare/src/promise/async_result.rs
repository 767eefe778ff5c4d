//! Single-assignment result with continuations.

use crate::errors::{Outcome, TaskError};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::warn;

/// A continuation run once the result settles.
type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum State<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        wakers: Vec<Waker>,
    },
    Resolved(Arc<Outcome<T>>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// A result that is produced once and observed many times.
///
/// Handles are cheap to clone; every clone observes the same outcome. A
/// pending result is settled through its [`Resolver`]. Continuations
/// registered while pending run on the thread that settles the result, after
/// the internal lock is released; continuations registered afterwards run
/// immediately on the caller's thread.
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

/// The producing side of an [`AsyncResult`].
///
/// Only the first call to [`resolve`](Self::resolve) (or its shorthands) has
/// any effect; later calls return `false`.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> AsyncResult<T> {
    /// Creates a pending result and the resolver that settles it.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending {
                continuations: Vec::new(),
                wakers: Vec::new(),
            }),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Resolver { shared },
        )
    }

    /// Creates a result that is already fulfilled.
    #[must_use]
    pub fn fulfilled(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Creates a result that is already rejected.
    #[must_use]
    pub fn rejected(error: TaskError) -> Self {
        Self::settled(Err(error))
    }

    fn settled(outcome: Outcome<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Resolved(Arc::new(outcome))),
            }),
        }
    }

    /// Returns true while no outcome has been recorded.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Pending { .. })
    }

    /// Returns true once an outcome has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }

    /// Returns true if the result fulfilled with a value.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Resolved(outcome) if outcome.is_ok())
    }

    /// Returns true if the result rejected with an error.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Resolved(outcome) if outcome.is_err())
    }

    /// Returns true if both handles refer to the same result.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Registers a continuation for whichever outcome the result settles with.
    pub fn on_resolved<F>(&self, continuation: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { continuations, .. } => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                State::Resolved(outcome) => Arc::clone(outcome),
            }
        };
        run_continuation(Box::new(continuation), &outcome);
    }

    /// Registers a continuation that only runs if the result fulfills.
    pub fn on_fulfilled<F>(&self, continuation: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_resolved(move |outcome| {
            if let Ok(value) = outcome {
                continuation(value);
            }
        });
    }

    /// Registers a continuation that only runs if the result rejects.
    pub fn on_rejected<F>(&self, continuation: F)
    where
        F: FnOnce(&TaskError) + Send + 'static,
    {
        self.on_resolved(move |outcome| {
            if let Err(error) = outcome {
                continuation(error);
            }
        });
    }
}

impl<T: Clone> AsyncResult<T> {
    /// Returns a copy of the outcome, if there is one yet.
    #[must_use]
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &*self.shared.state.lock() {
            State::Pending { .. } => None,
            State::Resolved(outcome) => Some((**outcome).clone()),
        }
    }
}

impl<T> Resolver<T> {
    /// Settles the result with `outcome`.
    ///
    /// Returns false if the result had already been settled, in which case
    /// nothing happens.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        let outcome = Arc::new(outcome);
        let (continuations, wakers) = {
            let mut state = self.shared.state.lock();
            let State::Pending {
                continuations,
                wakers,
            } = &mut *state
            else {
                return false;
            };
            let continuations = std::mem::take(continuations);
            let wakers = std::mem::take(wakers);
            *state = State::Resolved(Arc::clone(&outcome));
            (continuations, wakers)
        };

        for continuation in continuations {
            run_continuation(continuation, &outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Fulfills the result with `value`.
    pub fn fulfill(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Rejects the result with `error`.
    pub fn reject(&self, error: TaskError) -> bool {
        self.resolve(Err(error))
    }

    /// Returns true while the result has not been settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Pending { .. })
    }
}

fn run_continuation<T>(continuation: Continuation<T>, outcome: &Outcome<T>) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        continuation(outcome);
    })) {
        warn!("Result continuation panicked: {:?}", e);
    }
}

impl<T: Clone> Future for AsyncResult<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Resolved(outcome) => Poll::Ready((**outcome).clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn describe<T>(state: &State<T>) -> &'static str {
    match state {
        State::Pending { .. } => "pending",
        State::Resolved(outcome) if outcome.is_ok() => "fulfilled",
        State::Resolved(_) => "rejected",
    }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("state", &describe(&self.shared.state.lock()))
            .finish()
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &describe(&self.shared.state.lock()))
            .finish()
    }
}
