//! One-shot change notifications.
//!
//! A [`ChangeTrigger`] is owned by whatever holds mutable state (a configuration
//! source, for instance). Consumers observe it through [`ChangeToken`]s. A trigger
//! fires at most once; the owner replaces it with a fresh trigger after firing, and
//! [`on_change`] follows these replacements.

use std::mem::take;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Callback = Box<dyn FnOnce() + Send>;

struct TokenState {
    changed: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

/// Owning side of a change signal.
pub struct ChangeTrigger {
    state: Arc<TokenState>,
}

impl ChangeTrigger {
    /// Creates a trigger that has not fired.
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                changed: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns a token observing this trigger.
    pub fn token(&self) -> ChangeToken {
        ChangeToken {
            state: Some(self.state.clone()),
        }
    }

    /// Marks the tokens of this trigger as changed and runs their callbacks.
    ///
    /// Firing an already fired trigger does nothing.
    pub fn fire(&self) {
        if self.state.changed.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = take(
            &mut *self
                .state
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for ChangeTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Observing side of a change signal.
#[derive(Clone)]
pub struct ChangeToken {
    state: Option<Arc<TokenState>>,
}

impl ChangeToken {
    /// A token that never changes.
    pub fn never() -> Self {
        Self { state: None }
    }

    /// Whether the trigger behind this token has fired.
    pub fn has_changed(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.changed.load(Ordering::Acquire))
    }

    /// Runs `callback` once the token changes, or right away if it already has.
    pub fn register<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(state) = &self.state else {
            return;
        };
        let mut callbacks = state
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.changed.load(Ordering::Acquire) {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.push(Box::new(callback));
    }
}

impl std::fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeToken")
            .field("has_changed", &self.has_changed())
            .finish()
    }
}

struct Subscription<P, C> {
    producer: P,
    consumer: C,
}

impl<P, C> Subscription<P, C>
where
    P: Fn() -> ChangeToken + Send + Sync + 'static,
    C: Fn() -> bool + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>) {
        let token = (self.producer)();
        token.register(move || {
            if (self.consumer)() {
                self.subscribe();
            }
        });
    }
}

/// Calls `consumer` each time the token returned by `producer` changes.
///
/// After every change `producer` is asked for a new token, so it must return a token
/// that has not fired yet. The subscription ends once `consumer` returns `false`.
///
/// # Examples
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use knob::{ChangeTrigger, on_change};
///
/// let trigger = Arc::new(Mutex::new(ChangeTrigger::new()));
/// let calls = Arc::new(AtomicUsize::new(0));
///
/// let producer = trigger.clone();
/// let counter = calls.clone();
/// on_change(
///     move || producer.lock().unwrap().token(),
///     move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///         true
///     },
/// );
///
/// for _ in 0..2 {
///     let fired = std::mem::take(&mut *trigger.lock().unwrap());
///     fired.fire();
/// }
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// ```
pub fn on_change<P, C>(producer: P, consumer: C)
where
    P: Fn() -> ChangeToken + Send + Sync + 'static,
    C: Fn() -> bool + Send + Sync + 'static,
{
    Arc::new(Subscription { producer, consumer }).subscribe();
}
