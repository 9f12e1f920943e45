#![forbid(unsafe_code)]

//! Dispatch loop: routes inbound surface messages to handlers.
//!
//! # Role in chartbridge
//! Transports push [`HostEvent`]s into the dispatcher's queue. The loop
//! blocks on that queue (no polling), decodes each message, sends replies to
//! the window's [`ReturnSlots`](crate::ReturnSlots) without consulting the
//! registry, and invokes the resolved handler for everything else.
//!
//! Per-message failures (undecodable input, unknown handler key, a panicking
//! handler) are logged and counted; they never end the loop. The loop ends
//! when stopped, when the host reports exit (after handling what the host
//! queued before exiting), or when the queue closes.
//!
//! The dispatcher drops its own sender once it starts consuming, so the
//! queue closes when every transport sender and [`StopHandle`] is gone.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use chartbridge_core::wire::decode;
use chartbridge_core::{Delivery, Handler, Inbound, Invocation, Latch, Message, RequestId, ScriptError};

use crate::window::Window;

/// Item on the inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Raw wire string emitted by the surface.
    Message(String),
    /// The surface faulted while evaluating a script. A request id means
    /// the fault answers a synchronous evaluate.
    Fault {
        request: Option<RequestId>,
        error: ScriptError,
    },
    /// The transport closed; nothing more will arrive.
    Closed,
    /// No-op used to unblock the loop so it re-checks its signals.
    Wake,
}

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    HostExited,
    Closed,
}

/// Counters for one dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Inline handlers invoked.
    pub delivered: u64,
    /// Task handlers spawned.
    pub spawned: u64,
    /// Replies routed to a waiting request.
    pub replies: u64,
    /// Replies nobody was waiting for.
    pub orphan_replies: u64,
    pub decode_errors: u64,
    pub missing_handlers: u64,
    pub handler_panics: u64,
    pub faults: u64,
    pub exit: Option<ExitReason>,
}

/// Stops a running dispatcher from another thread.
#[derive(Clone, Debug)]
pub struct StopHandle {
    stop: Latch,
    wake: Sender<HostEvent>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.set();
        let _ = self.wake.send(HostEvent::Wake);
    }
}

/// Routes [`HostEvent`]s to the window's handlers.
pub struct Dispatcher {
    window: Window,
    events: Receiver<HostEvent>,
    sender: Option<Sender<HostEvent>>,
    stop: Latch,
    exit: Latch,
    tasks: Vec<JoinHandle<()>>,
    report: DispatchReport,
}

impl Dispatcher {
    /// Dispatcher with its own queue; feed it through [`sender`](Self::sender).
    #[must_use]
    pub fn new(window: Window) -> Self {
        let (tx, rx) = mpsc::channel();
        Self::with_queue(window, tx, rx)
    }

    /// Dispatcher on an existing queue. `sender` must feed `events`.
    #[must_use]
    pub fn with_queue(window: Window, sender: Sender<HostEvent>, events: Receiver<HostEvent>) -> Self {
        Self {
            window,
            events,
            sender: Some(sender),
            stop: Latch::new(),
            exit: Latch::new(),
            tasks: Vec::new(),
            report: DispatchReport::default(),
        }
    }

    /// End the loop once `exit` is set (the host's exit signal).
    #[must_use]
    pub fn with_exit_signal(mut self, exit: Latch) -> Self {
        self.exit = exit;
        self
    }

    /// Sender feeding this dispatcher. `None` once [`run`](Self::run) or
    /// [`step`](Self::step) has started consuming.
    #[must_use]
    pub fn sender(&self) -> Option<Sender<HostEvent>> {
        self.sender.clone()
    }

    /// Handle that stops [`run`](Self::run) from another thread. Take it
    /// before the loop starts; it keeps the queue open while held.
    #[must_use]
    pub fn stop_handle(&self) -> Option<StopHandle> {
        Some(StopHandle {
            stop: self.stop.clone(),
            wake: self.sender.clone()?,
        })
    }

    #[must_use]
    pub fn report(&self) -> &DispatchReport {
        &self.report
    }

    /// Block on the queue until stopped, the host exits, or the queue closes.
    pub fn run(&mut self) -> DispatchReport {
        tracing::debug!("dispatch loop started");
        self.sender = None;
        let reason = loop {
            if self.stop.is_set() {
                break ExitReason::Stopped;
            }
            if self.exit.is_set() {
                self.drain_queued();
                break ExitReason::HostExited;
            }
            match self.events.recv() {
                Ok(event) => {
                    if !self.handle(event) {
                        break ExitReason::Closed;
                    }
                }
                Err(_) => break ExitReason::Closed,
            }
            self.reap_finished_tasks();
        };
        if reason == ExitReason::Closed {
            self.window.returns().close_all();
        }
        self.report.exit = Some(reason);
        tracing::debug!(?reason, delivered = self.report.delivered, "dispatch loop finished");
        self.report.clone()
    }

    /// Handle everything already queued without blocking. Returns the number
    /// of events processed.
    pub fn step(&mut self) -> usize {
        self.sender = None;
        let mut processed = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    processed += 1;
                    if !self.handle(event) {
                        self.window.returns().close_all();
                        self.report.exit = Some(ExitReason::Closed);
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.window.returns().close_all();
                    self.report.exit = Some(ExitReason::Closed);
                    break;
                }
            }
        }
        self.reap_finished_tasks();
        processed
    }

    /// Handle whatever the host queued before it exited.
    fn drain_queued(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if !self.handle(event) {
                break;
            }
        }
    }

    /// Wait for every spawned task handler to finish.
    pub fn join_tasks(&mut self) {
        for handle in self.tasks.drain(..) {
            if let Err(payload) = handle.join() {
                self.report.handler_panics += 1;
                tracing::error!(panic = %panic_message(payload.as_ref()), "task handler panicked");
            }
        }
    }

    /// Returns `false` when the queue is finished.
    fn handle(&mut self, event: HostEvent) -> bool {
        match event {
            HostEvent::Message(raw) => self.route(&raw),
            HostEvent::Fault { request, error } => {
                self.report.faults += 1;
                match request {
                    Some(id) => {
                        self.window.returns().fail(Some(id), error);
                    }
                    None => self.window.record_script_fault(error),
                }
            }
            HostEvent::Closed => return false,
            HostEvent::Wake => {}
        }
        true
    }

    fn route(&mut self, raw: &str) {
        match decode(raw) {
            Err(err) => {
                self.report.decode_errors += 1;
                tracing::warn!(error = %err, len = raw.len(), "dropping undecodable message");
            }
            Ok(Inbound::Return(reply)) => {
                if self.window.returns().deliver(reply) {
                    self.report.replies += 1;
                } else {
                    self.report.orphan_replies += 1;
                }
            }
            Ok(Inbound::Event(message)) => match self.window.resolve_handler(&message.name) {
                Some(handler) => self.deliver(handler, message),
                None => {
                    self.report.missing_handlers += 1;
                    tracing::warn!(
                        key = %message.name,
                        chart_id = ?message.chart_id,
                        "no handler registered"
                    );
                }
            },
        }
    }

    fn deliver(&mut self, handler: Handler, message: Message) {
        let Message {
            name,
            chart_id,
            args,
        } = message;
        let args = match handler.value_cell() {
            Some(cell) => {
                cell.set(args.into_iter().next().unwrap_or_default());
                Vec::new()
            }
            None => args,
        };
        let invocation = Invocation {
            key: name,
            chart_id,
            args,
        };

        match handler.delivery() {
            Delivery::Inline => {
                let key = invocation.key.clone();
                match catch_unwind(AssertUnwindSafe(|| handler.invoke(invocation))) {
                    Ok(()) => self.report.delivered += 1,
                    Err(payload) => {
                        self.report.handler_panics += 1;
                        tracing::error!(
                            key = %key,
                            panic = %panic_message(payload.as_ref()),
                            "handler panicked"
                        );
                    }
                }
            }
            Delivery::Task => {
                tracing::trace!(key = %invocation.key, "spawning task handler");
                self.tasks
                    .push(thread::spawn(move || handler.invoke(invocation)));
                self.report.spawned += 1;
            }
        }
    }

    fn reap_finished_tasks(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let mut remaining = Vec::with_capacity(self.tasks.len());
        for handle in self.tasks.drain(..) {
            if handle.is_finished() {
                if let Err(payload) = handle.join() {
                    self.report.handler_panics += 1;
                    tracing::error!(panic = %panic_message(payload.as_ref()), "task handler panicked");
                }
            } else {
                remaining.push(handle);
            }
        }
        self.tasks = remaining;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("report", &self.report)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use chartbridge_core::{BridgeConfig, ValueCell};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn setup() -> (Window, Dispatcher, Sender<HostEvent>) {
        let window = Window::new(RecordingSink::new());
        let dispatcher = Dispatcher::new(window.clone());
        let tx = dispatcher.sender().unwrap();
        (window, dispatcher, tx)
    }

    #[test]
    fn value_bound_handler_sees_new_value() {
        let (window, mut dispatcher, tx) = setup();
        let cell = ValueCell::new("opt1");
        let seen = Arc::new(Mutex::new(None));
        let (record, observed) = (Arc::clone(&seen), cell.clone());
        window.register_handler(
            "switchA",
            Handler::new(move |inv| {
                *record.lock().unwrap() = Some((observed.get(), inv.args.len()));
            })
            .bound_to(cell.clone()),
        );
        tx.send(HostEvent::Message("switchA_~_chart1_~_opt2".into())).unwrap();
        assert_eq!(dispatcher.step(), 1);
        assert_eq!(*seen.lock().unwrap(), Some(("opt2".to_string(), 0)));
        assert_eq!(cell.get(), "opt2");
    }

    #[test]
    fn missing_handler_does_not_stop_later_messages() {
        let (window, mut dispatcher, tx) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        window.register_handler(
            "known",
            Handler::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tx.send(HostEvent::Message("unknownId_~_x".into())).unwrap();
        tx.send(HostEvent::Message("known_~_x".into())).unwrap();
        dispatcher.step();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.report().missing_handlers, 1);
    }

    #[test]
    fn undecodable_and_panicking_messages_are_contained() {
        let (window, mut dispatcher, tx) = setup();
        window.register_handler("boom", Handler::new(|_| panic!("handler bug")));
        tx.send(HostEvent::Message("no delimiter here".into())).unwrap();
        tx.send(HostEvent::Message("boom_~_".into())).unwrap();
        tx.send(HostEvent::Closed).unwrap();
        let report = dispatcher.run();
        assert_eq!(report.decode_errors, 1);
        assert_eq!(report.handler_panics, 1);
        assert_eq!(report.exit, Some(ExitReason::Closed));
        assert!(window.returns().is_closed());
    }

    #[test]
    fn replies_never_reach_the_registry() {
        let (window, mut dispatcher, tx) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        window.register_handler(
            "",
            Handler::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let pending = window.returns().open(RequestId(7)).unwrap();
        tx.send(HostEvent::Message("_~_~RETURN~_~_7_~_true".into())).unwrap();
        tx.send(HostEvent::Message("_~_~RETURN~_~_stray".into())).unwrap();
        dispatcher.step();
        assert_eq!(pending.wait(Duration::from_secs(1)).unwrap(), "true");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.report().replies, 1);
        assert_eq!(dispatcher.report().orphan_replies, 1);
    }

    #[test]
    fn task_handlers_run_off_thread() {
        let (window, mut dispatcher, tx) = setup();
        let (done_tx, done_rx) = mpsc::channel();
        let done_tx = Mutex::new(done_tx);
        window.register_handler(
            "slow",
            Handler::task(move |inv| {
                let _ = done_tx.lock().unwrap().send((thread::current().id(), inv.args));
            }),
        );
        tx.send(HostEvent::Message("slow_~_a;;;b".into())).unwrap();
        dispatcher.step();
        let (thread_id, args) = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread_id, thread::current().id());
        assert_eq!(args, vec!["a", "b"]);
        dispatcher.join_tasks();
        assert_eq!(dispatcher.report().spawned, 1);
    }

    #[test]
    fn stop_handle_unblocks_run() {
        let (_window, mut dispatcher, _tx) = setup();
        let stop = dispatcher.stop_handle().unwrap();
        let runner = thread::spawn(move || dispatcher.run());
        thread::sleep(Duration::from_millis(20));
        stop.stop();
        let report = runner.join().unwrap();
        assert_eq!(report.exit, Some(ExitReason::Stopped));
    }

    #[test]
    fn exit_signal_ends_loop() {
        let window = Window::builder(RecordingSink::new())
            .config(BridgeConfig::default())
            .build();
        let exit = Latch::new();
        let mut dispatcher = Dispatcher::new(window).with_exit_signal(exit.clone());
        let tx = dispatcher.sender().unwrap();
        exit.set();
        tx.send(HostEvent::Wake).unwrap();
        assert_eq!(dispatcher.run().exit, Some(ExitReason::HostExited));
    }

    #[test]
    fn step_on_disconnected_queue_fails_pending_requests() {
        let (window, mut dispatcher, tx) = setup();
        let pending = window.returns().open(RequestId(3)).unwrap();
        tx.send(HostEvent::Message("_~_~RETURN~_~_9_~_late".into())).unwrap();
        drop(tx);
        assert_eq!(dispatcher.step(), 1);
        assert_eq!(dispatcher.report().exit, Some(ExitReason::Closed));
        assert!(window.returns().is_closed());
        assert!(matches!(
            pending.wait(Duration::from_secs(1)),
            Err(chartbridge_core::BridgeError::TransportClosed)
        ));
    }

    #[test]
    fn run_ends_when_every_sender_is_gone() {
        let (window, mut dispatcher, tx) = setup();
        let runner = thread::spawn(move || dispatcher.run());
        thread::sleep(Duration::from_millis(20));
        drop(tx);
        assert_eq!(runner.join().unwrap().exit, Some(ExitReason::Closed));
        assert!(window.returns().is_closed());
    }

    #[test]
    fn uncorrelated_fault_is_recorded() {
        let (window, mut dispatcher, tx) = setup();
        tx.send(HostEvent::Fault {
            request: None,
            error: ScriptError::from_engine("x()", "ReferenceError: x is not defined"),
        })
        .unwrap();
        dispatcher.step();
        assert_eq!(window.take_script_faults().len(), 1);
    }
}
