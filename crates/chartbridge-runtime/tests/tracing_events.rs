#![forbid(unsafe_code)]

//! Structured log events emitted by the window and dispatch loop.

use std::sync::{Arc, Mutex};

use chartbridge_core::ScriptError;
use chartbridge_runtime::{Dispatcher, HostEvent, RecordingSink, Window};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    message: String,
    fields: Vec<(String, String)>,
}

impl CapturedEvent {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

fn with_captured_events<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(EventCapture {
        events: Arc::clone(&events),
    });
    tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    captured
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn unknown_handler_is_a_warning_with_key() {
    let events = with_captured_events(|| {
        let mut dispatcher = Dispatcher::new(Window::new(RecordingSink::new()));
        let tx = dispatcher.sender().unwrap();
        tx.send(HostEvent::Message("ghost_~_c1_~_x".into())).unwrap();
        tx.send(HostEvent::Message("_~_broken".into())).unwrap();
        dispatcher.step();
    });
    let missing = events
        .iter()
        .find(|e| e.message == "no handler registered")
        .expect("missing-handler event");
    assert_eq!(missing.level, Level::WARN);
    assert_eq!(missing.field("key"), Some("ghost"));
    assert!(events
        .iter()
        .any(|e| e.level == Level::WARN && e.message == "dropping undecodable message"));
}

#[test]
fn load_is_logged_once() {
    let events = with_captured_events(|| {
        let w = Window::new(RecordingSink::new());
        w.run_script("a()").unwrap();
        w.on_load().unwrap();
        w.on_load().unwrap();
    });
    let loads = events
        .iter()
        .filter(|e| e.message == "render surface loaded")
        .count();
    assert_eq!(loads, 1);
    assert!(events
        .iter()
        .any(|e| e.level == Level::DEBUG && e.message == "flushing deferred scripts"));
}

#[test]
fn remote_fault_is_an_error_event() {
    let events = with_captured_events(|| {
        let w = Window::new(RecordingSink::new());
        w.record_script_fault(ScriptError::from_engine("x()", "ReferenceError: x"));
    });
    assert!(events
        .iter()
        .any(|e| e.level == Level::ERROR && e.message == "render surface reported a script fault"));
}
