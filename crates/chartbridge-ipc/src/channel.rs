#![forbid(unsafe_code)]

//! The channel between a controller and a renderer host.
//!
//! Outbound, the controller pushes [`Envelope`]s (a target window plus one
//! typed [`Command`]). Inbound, the host reports through a [`HostLink`]: raw
//! emitted messages go to the dispatcher's event queue, replies go straight
//! to the [`ReturnSlots`], and the load and exit notifications set
//! [`HostSignals`].
//!
//! [`local_pair`] wires both ends together in-process. The child-process
//! transport in [`crate::process`] reuses the same controller end and feeds
//! a [`LocalHostLink`] from frames read off the child's stdout.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chartbridge_core::{
    BridgeError, Command, Latch, Lifecycle, Reply, RequestId, Result, ScriptError,
};
use chartbridge_runtime::{HostEvent, ReturnSlots, ScriptSink};

/// One outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Host window the command applies to; `None` is the primary window.
    pub target: Option<String>,
    pub command: Command,
}

impl Envelope {
    #[must_use]
    pub fn new(target: Option<String>, command: Command) -> Self {
        Self { target, command }
    }
}

/// Host-side reporting surface.
pub trait HostLink: Send + Sync {
    /// The page emitted a raw wire message.
    fn emit(&self, raw: String);
    /// Result of an evaluate request.
    fn reply(&self, reply: Reply);
    /// The page faulted. `request` is set when the fault answers an evaluate.
    fn fault(&self, request: Option<RequestId>, error: ScriptError);
    /// The surface finished loading.
    fn loaded(&self);
    /// The host loop is ending.
    fn exited(&self);
}

#[derive(Debug, Default)]
struct SignalState {
    loaded: bool,
    exited: bool,
    closed: bool,
}

/// Load / exit / closed notifications from the host, waitable with a timeout.
#[derive(Clone, Default)]
pub struct HostSignals {
    state: Arc<(Mutex<SignalState>, Condvar)>,
    exit: Latch,
}

impl HostSignals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut SignalState)) {
        let mut state = self.lock();
        f(&mut state);
        self.state.1.notify_all();
    }

    pub fn mark_loaded(&self) {
        self.update(|s| s.loaded = true);
    }

    pub fn mark_exited(&self) {
        self.update(|s| s.exited = true);
        self.exit.set();
    }

    /// The transport died. Wakes every waiter.
    pub fn mark_closed(&self) {
        self.update(|s| s.closed = true);
        self.exit.set();
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    #[must_use]
    pub fn is_exited(&self) -> bool {
        self.lock().exited
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Latch set when the host exits or the transport closes. Hand it to the
    /// dispatcher so its loop ends with the host.
    #[must_use]
    pub fn exit_latch(&self) -> Latch {
        self.exit.clone()
    }

    /// Wait for the load signal.
    pub fn wait_loaded(&self, timeout: Duration) -> Result<()> {
        self.wait(timeout, "load signal", |s| {
            if s.loaded {
                Some(Ok(()))
            } else if s.closed || s.exited {
                Some(Err(BridgeError::TransportClosed))
            } else {
                None
            }
        })
    }

    /// Wait for the host to exit. A closed transport counts as exited.
    pub fn wait_exited(&self, timeout: Duration) -> Result<()> {
        self.wait(timeout, "exit signal", |s| (s.exited || s.closed).then_some(Ok(())))
    }

    fn wait(
        &self,
        timeout: Duration,
        waiting_for: &'static str,
        check: impl Fn(&SignalState) -> Option<Result<()>>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(outcome) = check(&*state) {
                return outcome;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(waiting_for, ?timeout, "host signal wait timed out");
                return Err(BridgeError::Timeout {
                    waiting_for,
                    after: timeout,
                });
            }
            let (guard, _) = self
                .state
                .1
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}

impl std::fmt::Debug for HostSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.lock();
        f.debug_struct("HostSignals")
            .field("loaded", &s.loaded)
            .field("exited", &s.exited)
            .field("closed", &s.closed)
            .finish()
    }
}

/// [`HostLink`] that feeds controller-side queues in this process.
#[derive(Clone, Debug)]
pub struct LocalHostLink {
    events: Sender<HostEvent>,
    returns: ReturnSlots,
    signals: HostSignals,
}

impl LocalHostLink {
    /// The transport is gone: wake the dispatcher and every blocked waiter.
    pub fn closed(&self) {
        self.signals.mark_closed();
        self.returns.close_all();
        let _ = self.events.send(HostEvent::Closed);
    }
}

impl HostLink for LocalHostLink {
    fn emit(&self, raw: String) {
        if self.events.send(HostEvent::Message(raw)).is_err() {
            tracing::debug!("event queue gone; emitted message dropped");
        }
    }

    fn reply(&self, reply: Reply) {
        self.returns.deliver(reply);
    }

    fn fault(&self, request: Option<RequestId>, error: ScriptError) {
        match request {
            Some(id) => {
                self.returns.fail(Some(id), error);
            }
            None => {
                let _ = self.events.send(HostEvent::Fault {
                    request: None,
                    error,
                });
            }
        }
    }

    fn loaded(&self) {
        self.signals.mark_loaded();
    }

    fn exited(&self) {
        self.signals.mark_exited();
        let _ = self.events.send(HostEvent::Wake);
    }
}

/// [`ScriptSink`] pushing onto the outbound queue.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: Sender<Envelope>,
    target: Option<String>,
}

impl CommandSender {
    /// Same queue, addressed to another host window.
    #[must_use]
    pub fn targeted(&self, target: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            target: Some(target.into()),
        }
    }

    pub fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Envelope::new(self.target.clone(), command))
            .map_err(|_| BridgeError::TransportClosed)
    }

    pub fn lifecycle(&self, verb: Lifecycle) -> Result<()> {
        tracing::debug!(verb = %verb, target = ?self.target, "lifecycle command");
        self.send(Command::Lifecycle(verb))
    }
}

impl ScriptSink for CommandSender {
    fn inject(&self, script: &str) -> Result<()> {
        self.send(Command::Script(script.to_string()))
    }

    fn submit(&self, command: &Command) -> Result<()> {
        self.send(command.clone())
    }
}

/// Controller half of a channel.
#[derive(Debug)]
pub struct ControllerEnd {
    pub commands: CommandSender,
    pub events_tx: Sender<HostEvent>,
    pub events_rx: Receiver<HostEvent>,
    pub returns: ReturnSlots,
    pub signals: HostSignals,
}

/// Host half of an in-process channel.
#[derive(Debug)]
pub struct HostEnd {
    pub commands: Receiver<Envelope>,
    pub link: LocalHostLink,
}

/// Build the controller end plus the outbound receiver and a link feeding
/// the controller's queues.
pub(crate) fn controller_end() -> (ControllerEnd, Receiver<Envelope>, LocalHostLink) {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (events_tx, events_rx) = mpsc::channel();
    let returns = ReturnSlots::new();
    let signals = HostSignals::new();
    let link = LocalHostLink {
        events: events_tx.clone(),
        returns: returns.clone(),
        signals: signals.clone(),
    };
    let end = ControllerEnd {
        commands: CommandSender {
            tx: cmd_tx,
            target: None,
        },
        events_tx,
        events_rx,
        returns,
        signals,
    };
    (end, cmd_rx, link)
}

/// In-process channel: run a host loop on the [`HostEnd`] in another thread.
#[must_use]
pub fn local_pair() -> (ControllerEnd, HostEnd) {
    let (end, commands, link) = controller_end();
    (end, HostEnd { commands, link })
}
