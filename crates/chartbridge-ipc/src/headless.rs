#![forbid(unsafe_code)]

//! Headless render surface.
//!
//! Runs no JavaScript. It records every script it is given, answers the
//! readiness probe with `true`, and treats top-level
//! `window.callbackFunction("...")` calls as page emissions, so an
//! end-to-end round trip works without a browser engine. Scripts containing
//! a registered fail marker fault with an engine-style message carrying the
//! line number.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chartbridge_core::{DEFAULT_READY_PROBE, Result, ScriptError};

use crate::host::{Emitter, RenderSurface};

const CALLBACK_CALL: &str = "window.callbackFunction(";

#[derive(Debug, Default)]
struct HeadlessState {
    scripts: Vec<(Option<String>, String)>,
    windows: Vec<String>,
    fail_markers: Vec<String>,
    responses: HashMap<String, String>,
    emitter: Option<Emitter>,
    backlog: Vec<String>,
    started: bool,
    visible: bool,
    closed: bool,
}

/// Shared view of a [`HeadlessSurface`], usable after the surface has moved
/// into a host thread.
#[derive(Clone, Debug, Default)]
pub struct HeadlessHandle {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessHandle {
    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scripts evaluated so far, primary window only.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.lock()
            .scripts
            .iter()
            .filter(|(target, _)| target.is_none())
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Scripts evaluated in window `label`.
    #[must_use]
    pub fn scripts_for(&self, label: &str) -> Vec<String> {
        self.lock()
            .scripts
            .iter()
            .filter(|(target, _)| target.as_deref() == Some(label))
            .map(|(_, s)| s.clone())
            .collect()
    }

    #[must_use]
    pub fn windows(&self) -> Vec<String> {
        self.lock().windows.clone()
    }

    /// Fault any script containing `marker`.
    pub fn fail_on(&self, marker: impl Into<String>) {
        self.lock().fail_markers.push(marker.into());
    }

    /// Answer evaluate requests for exactly `script` with `value`.
    pub fn respond(&self, script: impl Into<String>, value: impl Into<String>) {
        self.lock().responses.insert(script.into(), value.into());
    }

    /// Push a message as if the page had called `window.callbackFunction`.
    /// Held until the surface is attached.
    pub fn emit(&self, raw: impl Into<String>) {
        let raw = raw.into();
        let emitter = {
            let mut state = self.lock();
            match state.emitter.clone() {
                Some(e) => e,
                None => {
                    state.backlog.push(raw);
                    return;
                }
            }
        };
        emitter.emit(raw);
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// [`RenderSurface`] without a browser engine.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    handle: HeadlessHandle,
}

impl HeadlessSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle(&self) -> HeadlessHandle {
        self.handle.clone()
    }
}

impl RenderSurface for HeadlessSurface {
    fn attach(&mut self, emitter: Emitter) {
        let backlog = {
            let mut state = self.handle.lock();
            state.emitter = Some(emitter.clone());
            std::mem::take(&mut state.backlog)
        };
        for raw in backlog {
            emitter.emit(raw);
        }
    }

    fn start(&mut self) -> Result<()> {
        self.handle.lock().started = true;
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        self.handle.lock().visible = true;
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        self.handle.lock().visible = false;
        Ok(())
    }

    fn create_window(&mut self, label: &str) -> Result<()> {
        self.handle.lock().windows.push(label.to_string());
        Ok(())
    }

    fn evaluate(&mut self, target: Option<&str>, script: &str) -> std::result::Result<String, ScriptError> {
        let (emitter, value) = {
            let mut state = self.handle.lock();
            state
                .scripts
                .push((target.map(str::to_string), script.to_string()));
            if let Some(marker) = state.fail_markers.iter().find(|m| script.contains(m.as_str())) {
                return Err(engine_fault(script, marker));
            }
            let value = match state.responses.get(script) {
                Some(v) => v.clone(),
                None if script.trim() == DEFAULT_READY_PROBE => "true".to_string(),
                None => "null".to_string(),
            };
            (state.emitter.clone(), value)
        };
        if let Some(emitter) = emitter {
            for raw in callback_payloads(script) {
                emitter.emit(raw);
            }
        }
        Ok(value)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.handle.lock();
        state.closed = true;
        state.visible = false;
        state.emitter = None;
        Ok(())
    }
}

fn engine_fault(script: &str, marker: &str) -> ScriptError {
    let line = script
        .lines()
        .position(|l| l.contains(marker))
        .map_or(1, |idx| idx + 1);
    ScriptError::from_engine(
        script,
        format!("ReferenceError: {marker} is not defined at <anonymous>:{line}:1"),
    )
}

/// String literals passed to top-level `window.callbackFunction(...)` calls
/// in `script`. Calls nested inside a block (an event listener body, say)
/// only run when the page fires them, so they are skipped.
fn callback_payloads(script: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth: i64 = 0;
    for line in script.lines() {
        if depth == 0 {
            let mut rest = line;
            while let Some(idx) = rest.find(CALLBACK_CALL) {
                rest = &rest[idx + CALLBACK_CALL.len()..];
                let mut values = serde_json::Deserializer::from_str(rest).into_iter::<String>();
                match values.next() {
                    Some(Ok(payload)) => out.push(payload),
                    _ => tracing::trace!("callbackFunction argument is not a string literal"),
                }
            }
        }
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn payloads_are_json_string_literals() {
        let script = r#"a(); window.callbackFunction("x_~_c1_~_1;;;2"); window.callbackFunction(notAString); window.callbackFunction("q\"uote")"#;
        assert_eq!(callback_payloads(script), vec!["x_~_c1_~_1;;;2", "q\"uote"]);
    }

    #[test]
    fn nested_calls_are_not_emitted() {
        let script = "c.commandFunctions.unshift((event) => {\n    window.callbackFunction(\"hk_~_s\")\n})\nwindow.callbackFunction(\"now_~_1\")";
        assert_eq!(callback_payloads(script), vec!["now_~_1"]);
    }

    #[test]
    fn ready_probe_and_canned_responses() {
        let mut surface = HeadlessSurface::new();
        let handle = surface.handle();
        handle.respond("chart.timeScale().getVisibleRange()", "{}");
        assert_eq!(surface.evaluate(None, DEFAULT_READY_PROBE).unwrap(), "true");
        assert_eq!(
            surface
                .evaluate(None, "chart.timeScale().getVisibleRange()")
                .unwrap(),
            "{}"
        );
        assert_eq!(surface.evaluate(Some("w2"), "x()").unwrap(), "null");
        assert_eq!(handle.scripts().len(), 2);
        assert_eq!(handle.scripts_for("w2"), vec!["x()"]);
    }

    #[test]
    fn fault_reports_marker_line() {
        let mut surface = HeadlessSurface::new();
        surface.handle().fail_on("boom");
        let err = surface.evaluate(None, "ok()\nboom()\n").unwrap_err();
        assert_eq!(err.line, Some(2));
        assert_eq!(err.excerpt(), Some("boom()"));
    }

    #[test]
    fn backlog_flushes_on_attach() {
        let mut surface = HeadlessSurface::new();
        let handle = surface.handle();
        handle.emit("early_~_1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        surface.attach(Emitter::new(move |raw| sink.lock().unwrap().push(raw)));
        handle.emit("late_~_2");
        assert_eq!(*seen.lock().unwrap(), vec!["early_~_1", "late_~_2"]);
    }
}
