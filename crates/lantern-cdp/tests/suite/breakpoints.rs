//! Breakpoint lifecycle over the wire: pending resolution, duplicate
//! detection, conditions, removal.

use std::thread;

use lantern_diag::{BreakInfo, DiagValue, MockEngine};
use serde_json::json;

use crate::support::{command, wait_for_notification, TestClient};

#[test]
fn pending_breakpoint_resolves_when_the_script_parses() {
    let client = TestClient::connect_running();
    client.enable_debugger();

    client.send(1, "Debugger.setBreakpointByUrl", json!({ "url": "a.js", "lineNumber": 3 }));
    let result = client.result(1);
    let breakpoint_id = result["breakpointId"].as_str().expect("breakpointId").to_string();
    assert_eq!(result["locations"], json!([]));

    client
        .engine
        .emit_script_parsed(MockEngine::script("42", "a.js"), "let x = 0;");

    let parsed_at = client.index_of_notification("Debugger.scriptParsed");
    let resolved_at = client.index_of_notification("Debugger.breakpointResolved");
    assert!(parsed_at < resolved_at);

    let resolved = client.notifications("Debugger.breakpointResolved");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["params"]["breakpointId"], breakpoint_id);
    assert_eq!(
        resolved[0]["params"]["location"],
        json!({ "scriptId": "42", "lineNumber": 3, "columnNumber": 0 })
    );
}

#[test]
fn identical_reparse_resolves_again() {
    let client = TestClient::connect_running();
    client.enable_debugger();
    client.send(1, "Debugger.setBreakpointByUrl", json!({ "url": "a.js", "lineNumber": 3 }));

    client
        .engine
        .emit_script_parsed(MockEngine::script("42", "a.js"), "let x = 0;");
    client
        .engine
        .emit_script_parsed(MockEngine::script("43", "a.js"), "let x = 0;");

    let resolved = client.notifications("Debugger.breakpointResolved");
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0]["params"]["location"]["scriptId"], "42");
    assert_eq!(resolved[1]["params"]["location"]["scriptId"], "43");
}

#[test]
fn loaded_script_resolves_inline_and_reports_the_location() {
    let client = TestClient::connect_running();
    client.engine.register_script(MockEngine::script("7", "app.js"), "main();");
    client.enable_debugger();

    client.send(
        1,
        "Debugger.setBreakpointByUrl",
        json!({ "url": "app.js", "lineNumber": 0, "columnNumber": 4 }),
    );
    let result = client.result(1);
    assert_eq!(
        result["locations"],
        json!([{ "scriptId": "7", "lineNumber": 0, "columnNumber": 4 }])
    );
}

#[test]
fn url_regex_breakpoints_match_every_loaded_script() {
    let client = TestClient::connect_running();
    client.engine.register_script(MockEngine::script("1", "one.test.js"), "a");
    client.engine.register_script(MockEngine::script("2", "two.test.js"), "b");
    client.engine.register_script(MockEngine::script("3", "main.js"), "c");
    client.enable_debugger();

    client.send(
        1,
        "Debugger.setBreakpointByUrl",
        json!({ "urlRegex": r".*\.test\.js", "lineNumber": 0 }),
    );
    let locations = client.result(1)["locations"].as_array().unwrap().clone();
    assert_eq!(locations.len(), 2);
}

#[test]
fn set_breakpoint_by_url_validates_its_arguments() {
    let client = TestClient::connect_running();
    client.enable_debugger();

    client.send(1, "Debugger.setBreakpointByUrl", json!({ "lineNumber": 3 }));
    assert_eq!(client.error(1)["message"], "Either url or urlRegex must be specified");

    client.send(
        2,
        "Debugger.setBreakpointByUrl",
        json!({ "lineNumber": 3, "url": "a.js", "urlRegex": "a" }),
    );
    assert_eq!(client.error(2)["message"], "Either url or urlRegex must be specified");

    client.send(
        3,
        "Debugger.setBreakpointByUrl",
        json!({ "lineNumber": 3, "url": "a.js", "columnNumber": -1 }),
    );
    assert_eq!(client.error(3)["message"], "Invalid column number specified");

    client.send(
        4,
        "Debugger.setBreakpointByUrl",
        json!({ "lineNumber": 3, "urlRegex": "(" }),
    );
    assert!(client.error(4)["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid urlRegex"));
}

#[test]
fn identical_requests_are_rejected_as_duplicates() {
    let client = TestClient::connect_running();
    client.enable_debugger();

    let params = json!({ "url": "a.js", "lineNumber": 3 });
    client.send(1, "Debugger.setBreakpointByUrl", params.clone());
    assert!(client.result(1)["breakpointId"].is_string());

    client.send(2, "Debugger.setBreakpointByUrl", params);
    assert_eq!(
        client.error(2)["message"],
        "Breakpoint at specified location already exists"
    );
}

#[test]
fn set_breakpoint_resolves_against_a_loaded_script_only() {
    let client = TestClient::connect_running();
    client.engine.register_script(MockEngine::script("7", "app.js"), "main();");
    client.enable_debugger();

    client.send(
        1,
        "Debugger.setBreakpoint",
        json!({ "location": { "scriptId": "7", "lineNumber": 2 } }),
    );
    let result = client.result(1);
    assert!(result["breakpointId"].is_string());
    assert_eq!(
        result["actualLocation"],
        json!({ "scriptId": "7", "lineNumber": 2, "columnNumber": 0 })
    );

    client.send(
        2,
        "Debugger.setBreakpoint",
        json!({ "location": { "scriptId": "404", "lineNumber": 2 } }),
    );
    assert_eq!(client.error(2)["message"], "Breakpoint could not be resolved");
}

#[test]
fn remove_breakpoint_succeeds_exactly_once() {
    let client = TestClient::connect_running();
    client.engine.register_script(MockEngine::script("1", "a.js"), "x");
    client.enable_debugger();

    client.send(1, "Debugger.setBreakpointByUrl", json!({ "url": "a.js", "lineNumber": 0 }));
    let breakpoint_id = client.result(1)["breakpointId"].as_str().unwrap().to_string();
    let installed = client.engine.installed_breakpoints();

    client.send(2, "Debugger.removeBreakpoint", json!({ "breakpointId": breakpoint_id }));
    assert!(client.result(2).is_object());
    assert_eq!(client.engine.removed_breakpoints(), installed);

    client.send(3, "Debugger.removeBreakpoint", json!({ "breakpointId": breakpoint_id }));
    assert_eq!(client.error(3)["message"], "Breakpoint could not be found");
}

#[test]
fn conditional_breakpoint_pauses_only_when_truthy() {
    let client = TestClient::connect_running();
    client.enable_debugger();
    client
        .engine
        .emit_script_parsed(MockEngine::script("1", "a.js"), "tick();");

    client.send(
        1,
        "Debugger.setBreakpointByUrl",
        json!({ "url": "a.js", "lineNumber": 3, "condition": "x > 1" }),
    );
    let fingerprint = client.result(1)["breakpointId"].as_str().unwrap().to_string();
    let engine_id = client.engine.installed_breakpoints()[0];
    let hit = BreakInfo {
        script_id: "1".to_string(),
        line: 3,
        column: 0,
        breakpoint_id: Some(engine_id),
        exception: None,
    };

    // First hit: x = 0, condition falsy, silently resumed.
    client
        .engine
        .queue_evaluation(0, "x > 1", Ok(DiagValue::boolean(false)));
    client.engine.emit_break(hit.clone());
    assert!(client.notifications("Debugger.paused").is_empty());

    // Second hit: x = 2, condition truthy, pause reaches the client.
    client
        .engine
        .queue_evaluation(0, "x > 1", Ok(DiagValue::boolean(true)));

    let inspector = client.inspector.clone();
    let messages = client.messages_handle();
    let transport = thread::spawn(move || {
        wait_for_notification(&messages, "Debugger.paused");
        inspector.send_command(&command(2, "Debugger.resume", json!({}))).unwrap();
    });
    client.engine.emit_break(hit);
    transport.join().unwrap();

    let paused = client.notifications("Debugger.paused");
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0]["params"]["hitBreakpoints"], json!([fingerprint]));
}

#[test]
fn failing_condition_still_pauses() {
    let client = TestClient::connect_running();
    client.enable_debugger();
    client
        .engine
        .emit_script_parsed(MockEngine::script("1", "a.js"), "tick();");

    client.send(
        1,
        "Debugger.setBreakpointByUrl",
        json!({ "url": "a.js", "lineNumber": 0, "condition": "boom()" }),
    );
    let engine_id = client.engine.installed_breakpoints()[0];

    client.engine.queue_evaluation(
        0,
        "boom()",
        Err(lantern_diag::DiagError::ScriptException(DiagValue::error(5, "boom"))),
    );

    let inspector = client.inspector.clone();
    let messages = client.messages_handle();
    let transport = thread::spawn(move || {
        wait_for_notification(&messages, "Debugger.paused");
        inspector.send_command(&command(2, "Debugger.resume", json!({}))).unwrap();
    });
    client.engine.emit_break(BreakInfo {
        script_id: "1".to_string(),
        line: 0,
        column: 0,
        breakpoint_id: Some(engine_id),
        exception: None,
    });
    transport.join().unwrap();

    assert_eq!(client.notifications("Debugger.paused").len(), 1);
}

#[test]
fn runtime_exceptions_pause_with_exception_reason() {
    let client = TestClient::connect_running();
    client.enable_debugger();

    let inspector = client.inspector.clone();
    let messages = client.messages_handle();
    let transport = thread::spawn(move || {
        wait_for_notification(&messages, "Debugger.paused");
        inspector.send_command(&command(1, "Debugger.resume", json!({}))).unwrap();
    });

    client.engine.emit(lantern_diag::DebugEvent::RuntimeException(BreakInfo {
        script_id: "1".to_string(),
        line: 4,
        column: 2,
        breakpoint_id: None,
        exception: Some(DiagValue::error(44, "Error: kaboom")),
    }));
    transport.join().unwrap();

    let paused = &client.notifications("Debugger.paused")[0];
    assert_eq!(paused["params"]["reason"], "exception");
    assert_eq!(paused["params"]["data"]["subtype"], "error");
    assert_eq!(paused["params"]["data"]["description"], "Error: kaboom");
}

#[test]
fn stepping_issues_engine_steps_and_continues() {
    let client = TestClient::connect_running();
    client.enable_debugger();
    client
        .engine
        .emit_script_parsed(MockEngine::script("1", "a.js"), "tick();");

    let inspector = client.inspector.clone();
    let messages = client.messages_handle();
    let transport = thread::spawn(move || {
        wait_for_notification(&messages, "Debugger.paused");
        inspector.send_command(&command(2, "Debugger.stepOver", json!({}))).unwrap();
    });

    client.queue(1, "Debugger.pause", json!({}));
    client.pump();
    transport.join().unwrap();

    assert_eq!(client.engine.step_calls(), vec![lantern_diag::StepKind::Over]);
    // The step resumed execution.
    assert_eq!(client.notifications("Debugger.resumed").len(), 1);
}

#[test]
fn set_pause_on_exceptions_maps_states() {
    let client = TestClient::connect_running();
    client.enable_debugger();

    client.send(1, "Debugger.setPauseOnExceptions", json!({ "state": "all" }));
    assert_eq!(
        client.engine.break_on_exception_mode(),
        Some(lantern_diag::ExceptionBreakMode::FirstChance)
    );

    client.send(2, "Debugger.setPauseOnExceptions", json!({ "state": "uncaught" }));
    assert_eq!(
        client.engine.break_on_exception_mode(),
        Some(lantern_diag::ExceptionBreakMode::Uncaught)
    );

    client.send(3, "Debugger.setPauseOnExceptions", json!({ "state": "nope" }));
    assert_eq!(client.error(3)["message"], "Unrecognized state value: nope");
}
