#![forbid(unsafe_code)]

//! The controller-side handle on one render surface.
//!
//! # Role in chartbridge
//! A [`Window`] owns everything the controller needs to talk to a surface:
//! the deferred [`ScriptQueue`], the [`BatchAccumulator`], the shared
//! [`HandlerRegistry`] and [`IdGenerator`], the [`ReturnSlots`] for
//! synchronous evaluation, and the [`ScriptSink`] scripts leave through.
//! Charts, subcharts and widgets hold a clone of the window; clones share
//! all of that state.

use std::sync::{Arc, Mutex};

use chartbridge_core::{
    BridgeConfig, BridgeError, Command, Handler, HandlerRegistry, IdGenerator, Result,
    ScriptError,
};

use crate::batch::BatchAccumulator;
use crate::chart::{ChartHandle, ChartLayout};
use crate::returns::ReturnSlots;
use crate::script_queue::ScriptQueue;
use crate::sink::ScriptSink;

struct WindowShared {
    queue: ScriptQueue,
    batch: BatchAccumulator,
    registry: HandlerRegistry,
    ids: Arc<IdGenerator>,
    returns: ReturnSlots,
    sink: Box<dyn ScriptSink>,
    config: BridgeConfig,
    faults: Mutex<Vec<ScriptError>>,
}

/// Controller handle on a render surface. Cheap to clone.
#[derive(Clone)]
pub struct Window {
    shared: Arc<WindowShared>,
}

/// Builder for [`Window`].
pub struct WindowBuilder {
    sink: Box<dyn ScriptSink>,
    config: BridgeConfig,
    registry: Option<HandlerRegistry>,
    ids: Option<Arc<IdGenerator>>,
    returns: Option<ReturnSlots>,
    seed: Option<u64>,
}

impl WindowBuilder {
    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing registry (e.g. with a second window).
    #[must_use]
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an existing id generator.
    #[must_use]
    pub fn ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Use return slots the transport also writes into.
    #[must_use]
    pub fn returns(mut self, returns: ReturnSlots) -> Self {
        self.returns = Some(returns);
        self
    }

    /// Deterministic id generation.
    #[must_use]
    pub fn id_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn build(self) -> Window {
        let config = self.config;
        let ids = self.ids.unwrap_or_else(|| {
            let generator = match self.seed {
                Some(seed) => IdGenerator::with_seed(seed),
                None => IdGenerator::new(),
            };
            Arc::new(
                generator
                    .with_len(config.id_len)
                    .with_max_attempts(config.id_max_attempts),
            )
        });
        Window {
            shared: Arc::new(WindowShared {
                queue: ScriptQueue::new(config.flush_mode),
                batch: BatchAccumulator::new(),
                registry: self.registry.unwrap_or_default(),
                ids,
                returns: self.returns.unwrap_or_default(),
                sink: self.sink,
                config,
                faults: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Window {
    /// Window with default configuration.
    pub fn new(sink: impl ScriptSink + 'static) -> Self {
        Self::builder(sink).build()
    }

    pub fn builder(sink: impl ScriptSink + 'static) -> WindowBuilder {
        WindowBuilder {
            sink: Box::new(sink),
            config: BridgeConfig::default(),
            registry: None,
            ids: None,
            returns: None,
            seed: None,
        }
    }

    // ── Scripts ─────────────────────────────────────────────────────────

    /// Run `script` on the surface, deferring it until load if necessary.
    ///
    /// Once loaded, a fault reported synchronously by the sink is returned
    /// here. Faults reported later by a remote host are recorded instead
    /// (see [`take_script_faults`](Self::take_script_faults)).
    pub fn run_script(&self, script: impl Into<String>) -> Result<()> {
        self.submit(script.into(), false)
    }

    /// Like [`run_script`](Self::run_script), but before load the script is
    /// queued behind every ordinary script.
    pub fn run_script_last(&self, script: impl Into<String>) -> Result<()> {
        self.submit(script.into(), true)
    }

    fn submit(&self, script: String, run_last: bool) -> Result<()> {
        // Before load a final script must stay behind later ordinary
        // scripts, so it skips the batch and goes to the final list.
        if run_last && !self.shared.queue.is_loaded() {
            return self
                .shared
                .queue
                .submit(script, true, self.shared.sink.as_ref());
        }
        let Some(script) = self.shared.batch.capture(script) else {
            return Ok(());
        };
        self.shared
            .queue
            .submit(script, run_last, self.shared.sink.as_ref())
    }

    /// Mark the surface loaded and flush the deferred scripts.
    ///
    /// Idempotent: returns `Ok(false)` on every call after the first.
    pub fn on_load(&self) -> Result<bool> {
        let flushed = self.shared.queue.flush(self.shared.sink.as_ref())?;
        if flushed {
            tracing::info!("render surface loaded");
        }
        Ok(flushed)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.shared.queue.is_loaded()
    }

    /// Buffered (ordinary, final) script counts.
    #[must_use]
    pub fn buffered(&self) -> (usize, usize) {
        self.shared.queue.buffered()
    }

    // ── Batching ────────────────────────────────────────────────────────

    /// Run `f` with every script it issues collected into one script.
    pub fn batch<R>(&self, f: impl FnOnce(&Window) -> R) -> Result<R> {
        let guard = self.begin_batch()?;
        let out = f(self);
        guard.finish()?;
        Ok(out)
    }

    /// Open a batch closed by [`BatchGuard::finish`] or on drop.
    pub fn begin_batch(&self) -> Result<BatchGuard<'_>> {
        self.shared.batch.begin()?;
        Ok(BatchGuard {
            window: self,
            finished: false,
        })
    }

    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.shared.batch.is_active()
    }

    fn close_batch(&self) -> Result<()> {
        match self.shared.batch.finish() {
            Some(joined) => self.submit(joined, false),
            None => Ok(()),
        }
    }

    // ── Synchronous evaluation ──────────────────────────────────────────

    /// Evaluate `script` on the loaded surface and wait for its result.
    pub fn evaluate(&self, script: impl Into<String>) -> Result<String> {
        if !self.is_loaded() {
            return Err(BridgeError::NotLoaded);
        }
        self.probe(script)
    }

    /// Evaluate without the loaded check. Used for readiness probes that run
    /// between the host's load signal and the flush.
    pub fn probe(&self, script: impl Into<String>) -> Result<String> {
        let script = script.into();
        let request = self.shared.ids.next_request_id();
        let pending = self.shared.returns.open(request)?;
        tracing::debug!(request_id = %request, len = script.len(), "evaluate request");
        self.shared.sink.submit(&Command::Evaluate {
            request: Some(request),
            script,
        })?;
        pending.wait(self.shared.config.return_timeout)
    }

    // ── Handlers and ids ────────────────────────────────────────────────

    /// Fresh object id.
    pub fn generate_id(&self) -> Result<String> {
        self.shared.ids.generate()
    }

    pub fn register_handler(&self, key: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.shared.registry.register(key, handler)
    }

    #[must_use]
    pub fn resolve_handler(&self, key: &str) -> Option<Handler> {
        self.shared.registry.resolve(key)
    }

    pub fn unregister_handler(&self, key: &str) -> Option<Handler> {
        self.shared.registry.unregister(key)
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    #[must_use]
    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.shared.ids
    }

    #[must_use]
    pub fn returns(&self) -> &ReturnSlots {
        &self.shared.returns
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    // ── Charts ──────────────────────────────────────────────────────────

    /// Create a chart pane on this surface.
    pub fn create_chart(&self, layout: ChartLayout) -> Result<ChartHandle> {
        ChartHandle::create(self.clone(), layout)
    }

    // ── Faults ──────────────────────────────────────────────────────────

    /// Record a fault reported asynchronously by the surface.
    pub fn record_script_fault(&self, fault: ScriptError) {
        tracing::error!(error = %fault, "render surface reported a script fault");
        self.shared
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fault);
    }

    /// Drain recorded asynchronous faults.
    pub fn take_script_faults(&self) -> Vec<ScriptError> {
        std::mem::take(&mut *self.shared.faults.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Whether both handles refer to the same surface.
    #[must_use]
    pub fn same_window(&self, other: &Window) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("loaded", &self.is_loaded())
            .field("batching", &self.is_batching())
            .field("handlers", &self.shared.registry.len())
            .finish_non_exhaustive()
    }
}

/// Open batch on a [`Window`]. Submits the joined script when finished or
/// dropped.
#[must_use = "dropping the guard closes the batch immediately"]
pub struct BatchGuard<'a> {
    window: &'a Window,
    finished: bool,
}

impl BatchGuard<'_> {
    /// Close the batch and submit the joined script.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.window.close_batch()
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(err) = self.window.close_batch()
        {
            tracing::error!(error = %err, "batched script rejected on drop");
        }
    }
}
