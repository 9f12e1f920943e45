#![forbid(unsafe_code)]

//! Renderer host loop.
//!
//! The host owns a [`RenderSurface`] and drains the controller's command
//! stream in order. Lifecycle verbs drive the surface; scripts are evaluated
//! and discarded; evaluate requests are answered through
//! [`HostLink::reply`] (or [`HostLink::fault`] with the request id).
//!
//! Surface lifecycle: `NotStarted -> Starting -> Running -> Exiting`.
//! `loaded` is reported exactly once, after the surface finishes starting.
//! `exited` is reported exactly once, when the loop ends for any reason,
//! including a panicking surface.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chartbridge_core::{BridgeError, Command, Lifecycle, Reply, Result, ScriptError};

use crate::channel::{Envelope, HostLink};

/// Where the page pushes messages for the controller.
#[derive(Clone)]
pub struct Emitter(Arc<dyn Fn(String) + Send + Sync>);

impl Emitter {
    pub fn new(f: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Forward one raw wire message.
    pub fn emit(&self, raw: impl Into<String>) {
        (self.0)(raw.into());
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

/// A page that can run scripts: a webview, or the headless stand-in.
pub trait RenderSurface: Send {
    /// Hand the surface its outbound emitter. Called once, before `start`.
    fn attach(&mut self, emitter: Emitter);

    /// Load the page. Returns once loading has finished.
    fn start(&mut self) -> Result<()>;

    fn show(&mut self) -> Result<()>;

    fn hide(&mut self) -> Result<()>;

    /// Open an additional window named `label`.
    fn create_window(&mut self, label: &str) -> Result<()>;

    /// Evaluate `script` in window `target` (`None`: primary window) and
    /// return its stringified result.
    fn evaluate(&mut self, target: Option<&str>, script: &str) -> std::result::Result<String, ScriptError>;

    /// Tear the page down.
    fn close(&mut self) -> Result<()>;
}

/// Surface lifecycle as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    NotStarted,
    Starting,
    Running,
    Exiting,
}

/// Drains commands into a surface.
pub struct HostLoop<S, L> {
    surface: S,
    link: Arc<L>,
    state: HostState,
    visible: bool,
    scripts: u64,
    faults: u64,
}

impl<S, L> HostLoop<S, L>
where
    S: RenderSurface,
    L: HostLink + 'static,
{
    pub fn new(surface: S, link: Arc<L>) -> Self {
        Self {
            surface,
            link,
            state: HostState::NotStarted,
            visible: false,
            scripts: 0,
            faults: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> HostState {
        self.state
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Process commands until `exit` or until the stream ends.
    ///
    /// `exited` is reported on every path out, including errors.
    pub fn run<I>(&mut self, commands: I) -> Result<HostState>
    where
        I: IntoIterator<Item = Envelope>,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.drain(commands))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "render surface panicked");
                // The surface is in an unknown state; skip close.
                self.state = HostState::Exiting;
                Err(BridgeError::InvalidState(format!("host loop panicked: {message}")))
            }
        };
        if self.state != HostState::Exiting {
            self.state = HostState::Exiting;
            if let Err(err) = self.surface.close() {
                tracing::warn!(error = %err, "surface close failed");
            }
        }
        tracing::info!(
            scripts = self.scripts,
            faults = self.faults,
            ok = outcome.is_ok(),
            "host loop finished"
        );
        self.link.exited();
        outcome.map(|()| self.state)
    }

    fn drain<I>(&mut self, commands: I) -> Result<()>
    where
        I: IntoIterator<Item = Envelope>,
    {
        for Envelope { target, command } in commands {
            let target = target.as_deref();
            match command {
                Command::Lifecycle(Lifecycle::Exit) => {
                    tracing::debug!("exit requested");
                    self.state = HostState::Exiting;
                    self.surface.close()?;
                    return Ok(());
                }
                Command::Lifecycle(verb) => self.lifecycle(verb, target)?,
                Command::Script(script) => self.script(target, &script),
                Command::Evaluate { request, script } => {
                    match self.surface.evaluate(target, &script) {
                        Ok(value) => self.link.reply(Reply { request, value }),
                        Err(error) => {
                            self.faults += 1;
                            tracing::debug!(request_id = ?request, error = %error, "evaluate faulted");
                            self.link.fault(request, error);
                        }
                    }
                }
            }
        }
        tracing::debug!("command stream ended");
        Ok(())
    }

    fn lifecycle(&mut self, verb: Lifecycle, target: Option<&str>) -> Result<()> {
        match (verb, self.state) {
            (Lifecycle::Start, HostState::NotStarted) => {
                self.state = HostState::Starting;
                let link = Arc::clone(&self.link);
                self.surface.attach(Emitter::new(move |raw| link.emit(raw)));
                self.surface.start()?;
                self.surface.show()?;
                self.visible = true;
                self.state = HostState::Running;
                tracing::info!("surface loaded");
                self.link.loaded();
            }
            // A second `start` re-shows a hidden window.
            (Lifecycle::Start | Lifecycle::Show, HostState::Running) => {
                self.surface.show()?;
                self.visible = true;
            }
            (Lifecycle::Hide, HostState::Running) => {
                self.surface.hide()?;
                self.visible = false;
            }
            (Lifecycle::CreateWindow, HostState::Running) => {
                let label = target.ok_or_else(|| {
                    BridgeError::InvalidState("create_window needs a target label".into())
                })?;
                self.surface.create_window(label)?;
                tracing::debug!(label, "window created");
            }
            (verb, state) => {
                tracing::warn!(verb = %verb, ?state, "lifecycle command ignored");
            }
        }
        Ok(())
    }

    fn script(&mut self, target: Option<&str>, script: &str) {
        if self.state != HostState::Running {
            tracing::warn!(state = ?self.state, "script arrived before the surface loaded");
        }
        self.scripts += 1;
        if let Err(error) = self.surface.evaluate(target, script) {
            self.faults += 1;
            tracing::debug!(error = %error, "script faulted");
            self.link.fault(None, error);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl<S, L> fmt::Debug for HostLoop<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLoop")
            .field("state", &self.state)
            .field("visible", &self.visible)
            .field("scripts", &self.scripts)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessSurface;
    use chartbridge_core::RequestId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct LinkLog {
        log: Mutex<Vec<String>>,
    }

    impl LinkLog {
        fn push(&self, s: String) {
            self.log.lock().unwrap().push(s);
        }
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl HostLink for LinkLog {
        fn emit(&self, raw: String) {
            self.push(format!("emit {raw}"));
        }
        fn reply(&self, reply: Reply) {
            self.push(format!("reply {:?} {}", reply.request, reply.value));
        }
        fn fault(&self, request: Option<RequestId>, error: ScriptError) {
            self.push(format!("fault {request:?} {}", error.message));
        }
        fn loaded(&self) {
            self.push("loaded".into());
        }
        fn exited(&self) {
            self.push("exited".into());
        }
    }

    fn env(command: &str) -> Envelope {
        Envelope::new(None, Command::from_wire(command))
    }

    /// Surface whose `crash()` script panics.
    struct Crashing(HeadlessSurface);

    impl RenderSurface for Crashing {
        fn attach(&mut self, emitter: Emitter) {
            self.0.attach(emitter);
        }
        fn start(&mut self) -> Result<()> {
            self.0.start()
        }
        fn show(&mut self) -> Result<()> {
            self.0.show()
        }
        fn hide(&mut self) -> Result<()> {
            self.0.hide()
        }
        fn create_window(&mut self, label: &str) -> Result<()> {
            self.0.create_window(label)
        }
        fn evaluate(
            &mut self,
            target: Option<&str>,
            script: &str,
        ) -> std::result::Result<String, ScriptError> {
            if script == "crash()" {
                panic!("surface crashed");
            }
            self.0.evaluate(target, script)
        }
        fn close(&mut self) -> Result<()> {
            self.0.close()
        }
    }

    #[test]
    fn lifecycle_and_evaluate_in_order() {
        let log = Arc::new(LinkLog::default());
        let surface = HeadlessSurface::new();
        let mut host = HostLoop::new(surface, Arc::clone(&log));
        let state = host
            .run([
                env("start"),
                env("_~_~RETURN~_~_7_~_document.readyState == \"complete\""),
                env("hide"),
                env("exit"),
                env("never_reached()"),
            ])
            .unwrap();
        assert_eq!(state, HostState::Exiting);
        assert!(!host.is_visible());
        assert_eq!(
            log.log(),
            vec!["loaded", "reply Some(RequestId(7)) true", "exited"]
        );
    }

    #[test]
    fn faults_carry_the_request_id() {
        let log = Arc::new(LinkLog::default());
        let surface = HeadlessSurface::new();
        surface.handle().fail_on("explode");
        let mut host = HostLoop::new(surface, Arc::clone(&log));
        host.run([
            env("start"),
            env("explode()"),
            env("_~_~RETURN~_~_3_~_explode()"),
        ])
        .unwrap();
        let log = log.log();
        assert!(log[1].starts_with("fault None"));
        assert!(log[2].starts_with("fault Some(RequestId(3))"));
        assert_eq!(log.last().map(String::as_str), Some("exited"));
    }

    #[test]
    fn stream_end_reports_exit_once() {
        let log = Arc::new(LinkLog::default());
        let mut host = HostLoop::new(HeadlessSurface::new(), Arc::clone(&log));
        host.run(Vec::<Envelope>::new()).unwrap();
        assert_eq!(log.log(), vec!["exited"]);
    }

    #[test]
    fn create_window_requires_label() {
        let log = Arc::new(LinkLog::default());
        let surface = HeadlessSurface::new();
        let handle = surface.handle();
        let mut host = HostLoop::new(surface, Arc::clone(&log));
        host.run([
            env("start"),
            Envelope::new(
                Some("second".into()),
                Command::Lifecycle(Lifecycle::CreateWindow),
            ),
        ])
        .unwrap();
        assert_eq!(handle.windows(), vec!["second".to_string()]);

        let mut host = HostLoop::new(HeadlessSurface::new(), Arc::new(LinkLog::default()));
        assert!(matches!(
            host.run([env("start"), env("create_window")]),
            Err(BridgeError::InvalidState(_))
        ));
    }

    #[test]
    fn emitter_reaches_link() {
        let log = Arc::new(LinkLog::default());
        let surface = HeadlessSurface::new();
        let mut host = HostLoop::new(surface, Arc::clone(&log));
        host.run([env("start"), env("window.callbackFunction(\"evt_~_a\")")])
            .unwrap();
        assert_eq!(log.log(), vec!["loaded", "emit evt_~_a", "exited"]);
    }

    #[test]
    fn verb_named_script_is_evaluated_not_obeyed() {
        let log = Arc::new(LinkLog::default());
        let surface = HeadlessSurface::new();
        let page = surface.handle();
        let mut host = HostLoop::new(surface, Arc::clone(&log));
        host.run([
            env("start"),
            Envelope::new(None, Command::Script("hide".into())),
            Envelope::new(None, Command::Script("after()".into())),
        ])
        .unwrap();
        assert!(host.is_visible());
        assert_eq!(page.scripts(), vec!["hide", "after()"]);
    }

    #[test]
    fn panicking_surface_still_reports_exit() {
        let log = Arc::new(LinkLog::default());
        let mut host = HostLoop::new(Crashing(HeadlessSurface::new()), Arc::clone(&log));
        let outcome = host.run([env("start"), env("crash()"), env("never_reached()")]);
        assert!(matches!(outcome, Err(BridgeError::InvalidState(_))));
        assert_eq!(host.state(), HostState::Exiting);
        assert_eq!(log.log(), vec!["loaded", "exited"]);
    }
}
