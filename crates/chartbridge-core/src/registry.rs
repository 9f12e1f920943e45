#![forbid(unsafe_code)]

//! Handler registry: maps a widget id or symbolic event name to a callback.
//!
//! One registry exists per controller and is shared by reference (cheap
//! `Clone`) with every chart, subchart and widget so that events fired from
//! nested panes resolve against the same table.
//!
//! Registration is last-writer-wins. Widgets that want their entry removed
//! when they go away hold a [`Registration`] guard; a guard only removes the
//! entry it created, never a newer handler registered under the same key.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Arguments delivered to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Key the handler was resolved under.
    pub key: String,
    /// Chart that emitted the event, if the message carried one.
    pub chart_id: Option<String>,
    /// Positional args. Empty for value-carrying handlers.
    pub args: Vec<String>,
}

impl Invocation {
    /// Positional argument `idx`, if present.
    #[must_use]
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }
}

/// Handler callback.
pub type Callback = Arc<dyn Fn(Invocation) + Send + Sync>;

/// How the dispatch loop runs a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Run on the dispatch thread before the next message is taken.
    #[default]
    Inline,
    /// Run on a background thread so a slow handler cannot stall delivery.
    Task,
}

/// Shared, mutable value of a widget or drawing.
#[derive(Clone, Default)]
pub struct ValueCell(Arc<Mutex<String>>);

impl ValueCell {
    /// Create a cell holding `initial`.
    pub fn new(initial: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(initial.into())))
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> String {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the value.
    pub fn set(&self, value: impl Into<String>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = value.into();
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueCell").field(&self.get()).finish()
    }
}

/// A registered callback plus its delivery metadata.
#[derive(Clone)]
pub struct Handler {
    callback: Callback,
    delivery: Delivery,
    value: Option<ValueCell>,
    token: u64,
}

impl Handler {
    /// Handler run inline on the dispatch thread.
    pub fn new(f: impl Fn(Invocation) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(f),
            delivery: Delivery::Inline,
            value: None,
            token: 0,
        }
    }

    /// Handler scheduled as a background task.
    pub fn task(f: impl Fn(Invocation) + Send + Sync + 'static) -> Self {
        Self {
            delivery: Delivery::Task,
            ..Self::new(f)
        }
    }

    /// Bind the handler to a widget value: the dispatch loop stores the
    /// event's first argument in `cell` and invokes the callback with no args.
    #[must_use]
    pub fn bound_to(mut self, cell: ValueCell) -> Self {
        self.value = Some(cell);
        self
    }

    /// Delivery mode.
    #[inline]
    #[must_use]
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Bound value cell, for value-carrying widgets.
    #[inline]
    #[must_use]
    pub fn value_cell(&self) -> Option<&ValueCell> {
        self.value.as_ref()
    }

    /// Call the callback on the current thread.
    pub fn invoke(&self, invocation: Invocation) {
        (self.callback)(invocation);
    }

    /// Whether two handles refer to the same callback.
    #[must_use]
    pub fn same_callback(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("delivery", &self.delivery)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

struct RegistryInner {
    handlers: Mutex<HashMap<String, Handler>>,
    next_token: AtomicU64,
}

/// Process-wide map from key to [`Handler`].
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                handlers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Handler>> {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Register `handler` under `key`, returning the handler it replaced.
    pub fn register(&self, key: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.insert(key.into(), handler).1
    }

    /// Register and return a guard that unregisters on drop.
    pub fn register_scoped(&self, key: impl Into<String>, handler: Handler) -> Registration {
        let key = key.into();
        let (token, _) = self.insert(key.clone(), handler);
        Registration {
            registry: Arc::downgrade(&self.inner),
            key,
            token,
            armed: true,
        }
    }

    fn insert(&self, key: String, mut handler: Handler) -> (u64, Option<Handler>) {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        handler.token = token;
        let previous = self.lock().insert(key.clone(), handler);
        if previous.is_some() {
            tracing::debug!(key = %key, "handler replaced");
        } else {
            tracing::trace!(key = %key, "handler registered");
        }
        (token, previous)
    }

    /// Look up the handler for `key`.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<Handler> {
        self.lock().get(key).cloned()
    }

    /// Remove the handler for `key`.
    pub fn unregister(&self, key: &str) -> Option<Handler> {
        let removed = self.lock().remove(key);
        if removed.is_some() {
            tracing::trace!(key, "handler unregistered");
        }
        removed
    }

    /// Whether `key` has a handler.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of registered keys (unordered).
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Whether both handles share the same table.
    #[must_use]
    pub fn same_registry(&self, other: &HandlerRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Guard tying a registry entry to the lifetime of its owner.
pub struct Registration {
    registry: Weak<RegistryInner>,
    key: String,
    token: u64,
    armed: bool,
}

impl Registration {
    /// Key this guard registered.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Keep the entry registered after the guard is dropped.
    pub fn forget(mut self) {
        self.armed = false;
    }

    /// Remove the entry now. Returns `true` if this guard's handler was
    /// still the registered one.
    pub fn release(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.armed = false;
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let mut handlers = inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.get(&self.key).is_some_and(|h| h.token == self.token) {
            handlers.remove(&self.key);
            tracing::trace!(key = %self.key, "scoped handler released");
            true
        } else {
            false
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("armed", &self.armed)
            .finish()
    }
}
