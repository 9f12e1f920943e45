#![forbid(unsafe_code)]

//! Batch accumulator.
//!
//! While a batch is open every submitted script is captured instead of being
//! sent. Closing the batch joins the captured scripts with `\n` so the caller
//! can submit them as a single script.

use std::sync::Mutex;

use chartbridge_core::{BridgeError, Result};

/// Collects scripts between [`begin`](Self::begin) and [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    open: Mutex<Option<Vec<String>>>,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch. Fails if one is already open.
    pub fn begin(&self) -> Result<()> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if open.is_some() {
            tracing::warn!("batch requested while another batch is active");
            return Err(BridgeError::BatchAlreadyActive);
        }
        *open = Some(Vec::new());
        Ok(())
    }

    /// Capture `script` if a batch is open; otherwise hand it back.
    pub fn capture(&self, script: String) -> Option<String> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        match open.as_mut() {
            Some(scripts) => {
                scripts.push(script);
                None
            }
            None => Some(script),
        }
    }

    /// Close the batch and return the joined script, or `None` when nothing
    /// was captured (or no batch was open).
    pub fn finish(&self) -> Option<String> {
        let scripts = self
            .open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        tracing::trace!(count = scripts.len(), "batch closed");
        (!scripts.is_empty()).then(|| scripts.join("\n"))
    }

    /// Whether a batch is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
