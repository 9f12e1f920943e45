#![forbid(unsafe_code)]

//! Deferred script queue.
//!
//! Scripts issued before the render surface has loaded are buffered in two
//! lists: ordinary scripts and "final" scripts that must run after all
//! ordinary ones (subchart sync statements, for example). The first
//! [`ScriptQueue::flush`] drains both lists, ordinary first, and flips the
//! queue to pass-through mode. Every later script goes straight to the sink.
//!
//! The state lock is held while the flush is handed to the sink, so a
//! concurrent submit can never overtake the buffered scripts.

use std::sync::{Mutex, MutexGuard};

use chartbridge_core::{FlushMode, Result};

use crate::sink::ScriptSink;

#[derive(Debug, Default)]
struct QueueState {
    loaded: bool,
    pending: Vec<String>,
    finals: Vec<String>,
}

/// Buffer for scripts issued before load.
#[derive(Debug)]
pub struct ScriptQueue {
    state: Mutex<QueueState>,
    mode: FlushMode,
}

impl ScriptQueue {
    #[must_use]
    pub fn new(mode: FlushMode) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            mode,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Buffer `script`, or forward it immediately once loaded.
    ///
    /// The sink is called with the queue lock held; it must not call back
    /// into the same queue.
    pub fn submit(&self, script: String, run_last: bool, sink: &dyn ScriptSink) -> Result<()> {
        let mut state = self.lock();
        if state.loaded {
            return sink.inject(&script);
        }
        if run_last {
            state.finals.push(script);
        } else {
            state.pending.push(script);
        }
        tracing::trace!(
            pending = state.pending.len(),
            finals = state.finals.len(),
            run_last,
            "script deferred until load"
        );
        Ok(())
    }

    /// Drain both buffers into the sink and switch to pass-through.
    ///
    /// Returns `Ok(false)` if the queue had already been flushed. The queue
    /// counts as loaded even if the sink rejects part of the flush; the
    /// first rejection is returned.
    pub fn flush(&self, sink: &dyn ScriptSink) -> Result<bool> {
        let mut state = self.lock();
        if state.loaded {
            return Ok(false);
        }
        state.loaded = true;

        let mut scripts = std::mem::take(&mut state.pending);
        scripts.append(&mut state.finals);
        tracing::debug!(count = scripts.len(), mode = ?self.mode, "flushing deferred scripts");
        if scripts.is_empty() {
            return Ok(true);
        }

        match self.mode {
            FlushMode::Concatenated => sink.inject(&scripts.join("\n"))?,
            FlushMode::PerStatement => {
                let mut first_error = None;
                for (idx, script) in scripts.iter().enumerate() {
                    if let Err(err) = sink.inject(script) {
                        tracing::warn!(statement = idx, error = %err, "deferred statement rejected");
                        first_error.get_or_insert(err);
                    }
                }
                if let Some(err) = first_error {
                    return Err(err);
                }
            }
        }
        Ok(true)
    }

    /// Whether the queue has been flushed.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    /// Buffered (ordinary, final) script counts.
    #[must_use]
    pub fn buffered(&self) -> (usize, usize) {
        let state = self.lock();
        (state.pending.len(), state.finals.len())
    }

    /// Flush strategy.
    #[must_use]
    pub fn mode(&self) -> FlushMode {
        self.mode
    }
}

impl Default for ScriptQueue {
    fn default() -> Self {
        Self::new(FlushMode::default())
    }
}
