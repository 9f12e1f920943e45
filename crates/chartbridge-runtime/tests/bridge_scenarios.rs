//! End-to-end behavior of a window plus dispatcher over an in-memory sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chartbridge_core::{BridgeConfig, BridgeError, FlushMode, Handler};
use chartbridge_runtime::{
    ChartHandle, ChartLayout, Dispatcher, ExitReason, HostEvent, RecordingSink, SubchartOptions,
    Window,
};
use pretty_assertions::assert_eq;

fn window(sink: &RecordingSink) -> Window {
    Window::builder(sink.clone()).id_seed(2024).build()
}

#[test]
fn deferred_scripts_flush_once_then_pass_through() {
    let sink = RecordingSink::new();
    let w = window(&sink);
    w.run_script("A").unwrap();
    w.run_script("B").unwrap();
    assert!(sink.scripts().is_empty());

    assert!(w.on_load().unwrap());
    assert!(!w.on_load().unwrap());
    w.run_script("C").unwrap();
    assert_eq!(sink.scripts(), vec!["A\nB", "C"]);
}

#[test]
fn per_statement_mode_keeps_order() {
    let sink = RecordingSink::new();
    let w = Window::builder(sink.clone())
        .config(BridgeConfig::default().with_flush_mode(FlushMode::PerStatement))
        .build();
    w.run_script_last("Z").unwrap();
    for s in ["A", "B", "C"] {
        w.run_script(s).unwrap();
    }
    w.on_load().unwrap();
    w.run_script("D").unwrap();
    assert_eq!(sink.scripts(), vec!["A", "B", "C", "Z", "D"]);
}

#[test]
fn switcher_event_updates_value_before_callback() {
    let sink = RecordingSink::new();
    let w = window(&sink);
    let chart = w.create_chart(ChartLayout::default()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let switcher = chart
        .topbar()
        .unwrap()
        .switcher("mode", &["opt1", "opt2"], None, move |c: &ChartHandle| {
            let value = c.topbar().unwrap().get("mode").unwrap().value();
            record.lock().unwrap().push(value);
        })
        .unwrap();
    w.on_load().unwrap();

    let mut dispatcher = Dispatcher::new(w.clone());
    let tx = dispatcher.sender().unwrap();
    tx.send(HostEvent::Message(format!(
        "{}_~_{}_~_opt2",
        switcher.id(),
        chart.id()
    )))
    .unwrap();
    dispatcher.step();
    assert_eq!(*seen.lock().unwrap(), vec!["opt2"]);
    assert_eq!(switcher.value(), "opt2");
}

#[test]
fn subchart_events_resolve_in_shared_registry() {
    let sink = RecordingSink::new();
    let w = window(&sink);
    let main = w.create_chart(ChartLayout::default()).unwrap();
    let sub = main.create_subchart(SubchartOptions::default()).unwrap();
    let searched = Arc::new(Mutex::new(None));
    let record = Arc::clone(&searched);
    sub.on_search(move |c: &ChartHandle, text: &str| {
        *record.lock().unwrap() = Some((c.id().to_string(), text.to_string()));
    })
    .unwrap();
    assert!(main.window().registry().same_registry(sub.window().registry()));

    let mut dispatcher = Dispatcher::new(w.clone());
    dispatcher
        .sender()
        .unwrap()
        .send(HostEvent::Message(format!("search{}_~_TSLA", sub.id())))
        .unwrap();
    dispatcher.step();
    assert_eq!(
        *searched.lock().unwrap(),
        Some((sub.id().to_string(), "TSLA".to_string()))
    );
}

#[test]
fn unknown_key_then_valid_message() {
    let sink = RecordingSink::new();
    let w = window(&sink);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    w.register_handler(
        "valid",
        Handler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let mut dispatcher = Dispatcher::new(w.clone());
    let tx = dispatcher.sender().unwrap();
    tx.send(HostEvent::Message("unknownId_~_x".into())).unwrap();
    tx.send(HostEvent::Message("valid_~_y".into())).unwrap();
    tx.send(HostEvent::Closed).unwrap();
    let report = dispatcher.run();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(report.missing_handlers, 1);
    assert_eq!(report.exit, Some(ExitReason::Closed));
}

#[test]
fn last_registration_wins() {
    let sink = RecordingSink::new();
    let w = window(&sink);
    let log = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let log = Arc::clone(&log);
        w.register_handler(
            "k",
            Handler::new(move |_| log.lock().unwrap().push(tag)),
        );
    }
    let mut dispatcher = Dispatcher::new(w.clone());
    dispatcher
        .sender()
        .unwrap()
        .send(HostEvent::Message("k_~_".into()))
        .unwrap();
    dispatcher.step();
    assert_eq!(*log.lock().unwrap(), vec!["second"]);
}

#[test]
fn evaluate_answered_through_dispatcher() {
    let sink = RecordingSink::new();
    let w = Window::builder(sink.clone())
        .config(BridgeConfig::default().with_return_timeout(Duration::from_secs(5)))
        .build();
    w.on_load().unwrap();
    let mut dispatcher = Dispatcher::new(w.clone());
    let tx = dispatcher.sender().unwrap();
    let stop = dispatcher.stop_handle().unwrap();
    let runner = thread::spawn(move || dispatcher.run());

    // Answer each evaluate request the sink sees, echoing its id.
    let responder_sink = sink.clone();
    let responder = thread::spawn(move || {
        for _ in 0..500 {
            if let Some(line) = responder_sink.scripts().first().cloned() {
                if let chartbridge_core::Command::Evaluate {
                    request: Some(id), ..
                } = chartbridge_core::Command::from_wire(&line)
                {
                    tx.send(HostEvent::Message(format!("_~_~RETURN~_~_{id}_~_42")))
                        .unwrap();
                    return;
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
    });

    assert_eq!(w.evaluate("answer()").unwrap(), "42");
    responder.join().unwrap();
    stop.stop();
    assert_eq!(runner.join().unwrap().replies, 1);
}

#[test]
fn closed_transport_fails_pending_evaluate() {
    let sink = RecordingSink::new();
    let w = Window::builder(sink)
        .config(BridgeConfig::default().with_return_timeout(Duration::from_secs(30)))
        .build();
    w.on_load().unwrap();
    let mut dispatcher = Dispatcher::new(w.clone());
    let tx = dispatcher.sender().unwrap();
    let runner = thread::spawn(move || dispatcher.run());
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        tx.send(HostEvent::Closed).unwrap();
    });
    assert!(matches!(w.evaluate("hang()"), Err(BridgeError::TransportClosed)));
    closer.join().unwrap();
    assert_eq!(runner.join().unwrap().exit, Some(ExitReason::Closed));
}
