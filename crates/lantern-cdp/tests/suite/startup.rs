//! Startup handshake: connect with break-on-first-statement, wait for the
//! debugger, pause, resume.

use std::thread;

use serde_json::{json, Value};

use crate::support::{command, wait_for_notification, wait_for_response, TestClient};

#[test]
fn connect_with_break_on_first_statement_pauses_then_resumes() {
    let client = TestClient::connect_break_on_start();

    let inspector = client.inspector.clone();
    let messages = client.messages_handle();
    let transport = thread::spawn(move || {
        inspector.send_command(&command(1, "Debugger.enable", json!({}))).unwrap();
        inspector.send_command(&command(2, "Runtime.enable", json!({}))).unwrap();
        inspector
            .send_command(&command(3, "Runtime.runIfWaitingForDebugger", json!({})))
            .unwrap();
        wait_for_response(&messages, 3);

        // The engine thread is released and will execute the first
        // statement, which pauses. Resume once the pause shows up.
        wait_for_notification(&messages, "Debugger.paused");
        inspector.send_command(&command(4, "Debugger.resume", json!({}))).unwrap();
    });

    // Engine thread: block until the client finishes its startup handshake.
    client.inspector.wait_for_debugger();

    // `runIfWaitingForDebugger` saw the Pause startup state, so a pause
    // request is pending against the engine.
    assert!(client.engine.has_pending_async_break());

    // First statement executes; the async break pauses, the nested loop
    // services the resume.
    client.pump();
    transport.join().unwrap();

    let paused = client.notifications("Debugger.paused");
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0]["params"]["reason"], "Break");

    assert!(client.result(4).is_object());
    let resumed = client.notifications("Debugger.resumed");
    assert_eq!(resumed.len(), 1);

    // paused → resume response → resumed, in wire order.
    let paused_at = client.index_of_notification("Debugger.paused");
    let response_at = client.index_of_response(4);
    let resumed_at = client.index_of_notification("Debugger.resumed");
    assert!(paused_at < response_at);
    assert!(response_at < resumed_at);
}

#[test]
fn run_if_waiting_requires_runtime_enabled() {
    let client = TestClient::connect_running();
    client.send(1, "Runtime.runIfWaitingForDebugger", json!({}));
    assert_eq!(client.error(1)["message"], "Runtime is not enabled");
}

#[test]
fn startup_commands_drain_in_fifo_order() {
    let client = TestClient::connect_running();
    client.queue(1, "Runtime.enable", json!({}));
    client.queue(2, "Debugger.enable", json!({}));
    client.queue(3, "Runtime.runIfWaitingForDebugger", json!({}));
    client.pump();

    let ids: Vec<i64> = client
        .messages()
        .iter()
        .filter_map(|m| m.get("id").and_then(Value::as_i64))
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}
