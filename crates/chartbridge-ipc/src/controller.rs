#![forbid(unsafe_code)]

//! Controller: owns the window, the transport and the host lifecycle.
//!
//! `start` sends the start verb, waits for the host's load signal, polls the
//! readiness probe until the page answers `true`, and only then flushes the
//! deferred script queue. Every wait is bounded by [`BridgeConfig`].

use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chartbridge_core::{BridgeConfig, BridgeError, Lifecycle, Result};
use chartbridge_runtime::{
    ChartHandle, ChartLayout, DispatchReport, Dispatcher, HostEvent, StopHandle, Window,
};

use crate::channel::{CommandSender, ControllerEnd, HostSignals, local_pair};
use crate::host::{HostLoop, HostState, RenderSurface};
use crate::process::{HostCommand, HostProcess, spawn_host};

/// Pause between readiness probes.
const READY_RETRY: Duration = Duration::from_millis(50);

/// Where the host runs.
enum HostRuntime {
    Thread(Option<JoinHandle<Result<HostState>>>),
    Process(Option<HostProcess>),
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    Running,
    Hidden,
    Exited,
}

/// A dispatch loop running on its own thread.
#[derive(Debug)]
pub struct DispatchThread {
    handle: JoinHandle<DispatchReport>,
    stop: StopHandle,
}

impl DispatchThread {
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the loop and collect its report.
    pub fn stop(self) -> Result<DispatchReport> {
        self.stop.stop();
        self.join()
    }

    /// Wait for the loop to end on its own (host exit or closed transport).
    pub fn join(self) -> Result<DispatchReport> {
        let Self { handle, stop } = self;
        drop(stop);
        handle
            .join()
            .map_err(|_| BridgeError::InvalidState("dispatch thread panicked".into()))
    }
}

pub struct Controller {
    window: Window,
    commands: CommandSender,
    signals: HostSignals,
    events: Option<(std::sync::mpsc::Sender<HostEvent>, Receiver<HostEvent>)>,
    runtime: HostRuntime,
    state: ControllerState,
    windows: u32,
}

impl Controller {
    /// Run `surface` on a host thread in this process.
    pub fn in_process<S>(surface: S, config: BridgeConfig) -> Result<Self>
    where
        S: RenderSurface + 'static,
    {
        let (end, host) = local_pair();
        let transport = host.link.clone();
        let link = std::sync::Arc::new(host.link);
        let commands = host.commands;
        let handle = thread::Builder::new()
            .name("chartbridge-host".into())
            .spawn(move || {
                let outcome = HostLoop::new(surface, link).run(commands);
                if let Err(err) = &outcome {
                    tracing::error!(error = %err, "host loop failed; closing transport");
                    transport.closed();
                }
                outcome
            })?;
        Ok(Self::assemble(end, config, HostRuntime::Thread(Some(handle))))
    }

    /// Launch the host executable named by `config.host_program`.
    pub fn spawn(config: BridgeConfig) -> Result<Self> {
        let cmd = HostCommand::from_config(&config)?;
        Self::spawn_with(&cmd, config)
    }

    /// Launch a host executable with an explicit command.
    pub fn spawn_with(cmd: &HostCommand, config: BridgeConfig) -> Result<Self> {
        let (end, process) = spawn_host(cmd)?;
        Ok(Self::assemble(end, config, HostRuntime::Process(Some(process))))
    }

    fn assemble(end: ControllerEnd, config: BridgeConfig, runtime: HostRuntime) -> Self {
        let window = Window::builder(end.commands.clone())
            .config(config)
            .returns(end.returns.clone())
            .build();
        Self {
            window,
            commands: end.commands,
            signals: end.signals,
            events: Some((end.events_tx, end.events_rx)),
            runtime,
            state: ControllerState::Created,
            windows: 0,
        }
    }

    #[must_use]
    pub fn window(&self) -> &Window {
        &self.window
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub fn signals(&self) -> &HostSignals {
        &self.signals
    }

    /// Create a chart in the primary window.
    pub fn create_chart(&self, layout: ChartLayout) -> Result<ChartHandle> {
        self.window.create_chart(layout)
    }

    /// Start the host and flush the deferred queue once the page is ready.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ControllerState::Created {
            return Err(BridgeError::InvalidState(format!(
                "start called in state {:?}",
                self.state
            )));
        }
        let config = self.window.config().clone();
        let started = Instant::now();
        self.commands.lifecycle(Lifecycle::Start)?;
        self.signals.wait_loaded(config.load_timeout)?;
        if let Some(probe) = &config.ready_probe {
            self.wait_ready(probe, started + config.load_timeout)?;
        }
        self.state = ControllerState::Running;
        let flushed = self.window.on_load();
        tracing::info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "controller started"
        );
        flushed.map(|_| ())
    }

    fn wait_ready(&self, probe: &str, deadline: Instant) -> Result<()> {
        loop {
            let answer = self.window.probe(probe)?;
            if matches!(answer.trim(), "true" | "1") {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BridgeError::Timeout {
                    waiting_for: "ready probe",
                    after: self.window.config().load_timeout,
                });
            }
            tracing::debug!(answer = %answer, "page not ready yet");
            thread::sleep(READY_RETRY.min(remaining));
        }
    }

    pub fn show(&mut self) -> Result<()> {
        self.require_started()?;
        self.commands.lifecycle(Lifecycle::Show)?;
        self.state = ControllerState::Running;
        Ok(())
    }

    pub fn hide(&mut self) -> Result<()> {
        self.require_started()?;
        self.commands.lifecycle(Lifecycle::Hide)?;
        self.state = ControllerState::Hidden;
        Ok(())
    }

    fn require_started(&self) -> Result<()> {
        match self.state {
            ControllerState::Running | ControllerState::Hidden => Ok(()),
            state => Err(BridgeError::InvalidState(format!(
                "window is not running ({state:?})"
            ))),
        }
    }

    /// Open another host window. Its scripts go straight through: the host
    /// processes commands in order, so the window exists before any script
    /// addressed to it.
    pub fn create_window(&mut self) -> Result<Window> {
        self.require_started()?;
        self.windows += 1;
        let label = format!("window-{}", self.windows);
        let sender = self.commands.targeted(label.clone());
        sender.lifecycle(Lifecycle::CreateWindow)?;
        let window = Window::builder(sender)
            .config(self.window.config().clone())
            .registry(self.window.registry().clone())
            .ids(std::sync::Arc::clone(self.window.ids()))
            .returns(self.window.returns().clone())
            .build();
        window.on_load()?;
        tracing::debug!(label = %label, "secondary window ready");
        Ok(window)
    }

    /// Synchronous evaluation in the primary window.
    pub fn evaluate(&self, script: impl Into<String>) -> Result<String> {
        self.window.evaluate(script)
    }

    /// Build a dispatcher over this controller's event queue. Available once.
    pub fn dispatcher(&mut self) -> Result<Dispatcher> {
        let (tx, rx) = self
            .events
            .take()
            .ok_or_else(|| BridgeError::InvalidState("dispatcher already taken".into()))?;
        Ok(Dispatcher::with_queue(self.window.clone(), tx, rx)
            .with_exit_signal(self.signals.exit_latch()))
    }

    /// Run the dispatcher on a background thread.
    pub fn spawn_dispatch(&mut self) -> Result<DispatchThread> {
        let mut dispatcher = self.dispatcher()?;
        let stop = dispatcher
            .stop_handle()
            .ok_or_else(|| BridgeError::InvalidState("dispatcher has no sender".into()))?;
        let handle = thread::Builder::new()
            .name("chartbridge-dispatch".into())
            .spawn(move || dispatcher.run())?;
        Ok(DispatchThread { handle, stop })
    }

    /// Ask the host to exit and wait for it.
    pub fn exit(&mut self) -> Result<()> {
        if self.state == ControllerState::Exited {
            return Ok(());
        }
        let timeout = self.window.config().exit_timeout;
        if let Err(err) = self.commands.lifecycle(Lifecycle::Exit) {
            tracing::debug!(error = %err, "exit command not delivered");
        }
        let waited = self.signals.wait_exited(timeout);
        self.state = ControllerState::Exited;
        self.window.returns().close_all();
        match &mut self.runtime {
            HostRuntime::Thread(handle) => {
                if waited.is_ok() {
                    if let Some(handle) = handle.take() {
                        match handle.join() {
                            Ok(Ok(state)) => tracing::debug!(?state, "host thread joined"),
                            Ok(Err(err)) => tracing::warn!(error = %err, "host loop failed"),
                            Err(_) => tracing::error!("host thread panicked"),
                        }
                    }
                }
            }
            HostRuntime::Process(process) => {
                if let Some(process) = process.take() {
                    process.shutdown(timeout)?;
                }
            }
        }
        tracing::info!("controller exited");
        waited
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if matches!(self.state, ControllerState::Running | ControllerState::Hidden) {
            let _ = self.commands.lifecycle(Lifecycle::Exit);
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}
