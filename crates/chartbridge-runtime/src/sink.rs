#![forbid(unsafe_code)]

//! The injection seam: where scripts leave the controller.
//!
//! A [`ScriptSink`] hands a script string to the render surface. In-process
//! hosts evaluate it directly; cross-process transports enqueue it for the
//! host loop. Any `Fn(&str) -> Result<()>` closure is a sink.

use std::sync::{Arc, Mutex};

use chartbridge_core::{Command, Result, ScriptError};

/// Destination for scripts and evaluate requests.
pub trait ScriptSink: Send + Sync {
    /// Inject one script (or one already-encoded command line).
    fn inject(&self, script: &str) -> Result<()>;

    /// Send a command. The default encodes it and calls [`inject`](Self::inject).
    fn submit(&self, command: &Command) -> Result<()> {
        self.inject(&command.to_wire())
    }
}

impl<F> ScriptSink for F
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    fn inject(&self, script: &str) -> Result<()> {
        self(script)
    }
}

/// Sink that records everything it receives.
///
/// Scripts containing a configured marker are rejected with a
/// [`ScriptError`], which is how tests simulate a faulting surface.
#[derive(Clone, Default)]
pub struct RecordingSink {
    scripts: Arc<Mutex<Vec<String>>>,
    fail_marker: Arc<Mutex<Option<String>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any script containing `marker`.
    pub fn fail_on(&self, marker: impl Into<String>) {
        *self.fail_marker.lock().unwrap_or_else(|e| e.into_inner()) = Some(marker.into());
    }

    /// Everything received so far, in order.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain the record.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.scripts.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Number of sink calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ScriptSink for RecordingSink {
    fn inject(&self, script: &str) -> Result<()> {
        let marker = self
            .fail_marker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(marker) = marker
            && script.contains(&marker)
        {
            let line = script
                .lines()
                .position(|l| l.contains(&marker))
                .and_then(|idx| u32::try_from(idx + 1).ok());
            return Err(ScriptError::at(script, format!("{marker} is not defined"), line, None).into());
        }
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(script.to_string());
        Ok(())
    }
}

impl std::fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSink")
            .field("calls", &self.calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartbridge_core::BridgeError;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let sink = move |s: &str| -> Result<()> {
            record.lock().unwrap().push(s.to_string());
            Ok(())
        };
        sink.inject("a()").unwrap();
        sink.submit(&Command::Script("b()".into())).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a()", "b()"]);
    }

    #[test]
    fn recording_sink_fails_on_marker() {
        let sink = RecordingSink::new();
        sink.fail_on("undefinedFn");
        sink.inject("ok()").unwrap();
        let err = sink.inject("ok()\nundefinedFn()").unwrap_err();
        match err {
            BridgeError::Script(e) => assert_eq!(e.line, Some(2)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sink.scripts(), vec!["ok()"]);
    }
}
