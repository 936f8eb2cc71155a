//! Harness for driving a full [`Inspector`] over the mock engine.
//!
//! The test thread plays the engine thread: `pump` delivers pending
//! async-break requests through the debug callback, blocking while the
//! adapter runs its nested message loop. Tests that need commands serviced
//! *during* a pause spawn a second thread to play the transport.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lantern_cdp::Inspector;
use lantern_diag::MockEngine;
use serde_json::{json, Value};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    pub engine: Arc<MockEngine>,
    pub inspector: Arc<Inspector<MockEngine>>,
    messages: Arc<Mutex<Vec<Value>>>,
}

impl TestClient {
    /// Connect with `breakOnNextLine=false` and emulate the host's
    /// post-connect `Debugger.go`, leaving the adapter in a clean running
    /// state: no pending pause request, no pending async break.
    pub fn connect_running() -> Self {
        let client = Self::connect(false);
        client.engine.pump_async_break();
        client.inspector.send_request("Debugger.go").unwrap();
        client.engine.pump_async_break();
        client
    }

    /// Connect with `breakOnNextLine=true` without pumping: the `Connect`
    /// command stays queued for a later `wait_for_debugger` drain, as in a
    /// real embedding that blocks before running the first script.
    pub fn connect_break_on_start() -> Self {
        Self::connect(true)
    }

    fn connect(break_on_next_line: bool) -> Self {
        let engine = Arc::new(MockEngine::new());
        let inspector = Arc::new(Inspector::new(engine.clone()).unwrap());
        let messages: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = messages.clone();
        inspector
            .connect(
                break_on_next_line,
                Box::new(move |text| {
                    let message: Value =
                        serde_json::from_str(text).expect("outbound message is JSON");
                    sink.lock().unwrap().push(message);
                }),
            )
            .unwrap();

        Self {
            engine,
            inspector,
            messages,
        }
    }

    /// Submit a command and drain it on the calling (engine) thread.
    pub fn send(&self, id: i64, method: &str, params: Value) {
        self.queue(id, method, params);
        self.engine.pump_async_break();
    }

    /// Enqueue a command without draining it.
    pub fn queue(&self, id: i64, method: &str, params: Value) {
        let raw = json!({ "id": id, "method": method, "params": params }).to_string();
        self.inspector.send_command(&raw).unwrap();
    }

    pub fn send_raw(&self, raw: &str) {
        self.inspector.send_command(raw).unwrap();
        self.engine.pump_async_break();
    }

    pub fn pump(&self) {
        self.engine.pump_async_break();
    }

    /// Drain queued commands through the embedder pump, i.e. with the engine
    /// running rather than inside a debug callback. Frame evaluation fails
    /// with `NotAtBreak` on this path.
    pub fn host_pump(&self, id: i64, method: &str, params: Value) {
        self.queue(id, method, params);
        self.inspector.process_command_queue();
    }

    pub fn enable_debugger(&self) {
        self.send(9001, "Debugger.enable", json!({}));
        assert!(self.response(9001).get("result").is_some());
    }

    pub fn enable_runtime(&self) {
        self.send(9002, "Runtime.enable", json!({}));
        assert!(self.response(9002).get("result").is_some());
    }

    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().unwrap().clone()
    }

    pub fn messages_handle(&self) -> Arc<Mutex<Vec<Value>>> {
        self.messages.clone()
    }

    pub fn try_response(&self, id: i64) -> Option<Value> {
        self.messages()
            .into_iter()
            .find(|m| m.get("id").and_then(Value::as_i64) == Some(id))
    }

    pub fn response(&self, id: i64) -> Value {
        self.try_response(id)
            .unwrap_or_else(|| panic!("no response for id {id}"))
    }

    pub fn result(&self, id: i64) -> Value {
        let response = self.response(id);
        response
            .get("result")
            .cloned()
            .unwrap_or_else(|| panic!("response for id {id} is an error: {response}"))
    }

    pub fn error(&self, id: i64) -> Value {
        let response = self.response(id);
        response
            .get("error")
            .cloned()
            .unwrap_or_else(|| panic!("response for id {id} is not an error: {response}"))
    }

    pub fn notifications(&self, method: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .collect()
    }

    /// Index of the first notification with `method` in the outbound stream.
    pub fn index_of_notification(&self, method: &str) -> usize {
        self.messages()
            .iter()
            .position(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .unwrap_or_else(|| panic!("no {method} notification"))
    }

    pub fn index_of_response(&self, id: i64) -> usize {
        self.messages()
            .iter()
            .position(|m| m.get("id").and_then(Value::as_i64) == Some(id))
            .unwrap_or_else(|| panic!("no response for id {id}"))
    }
}

/// Poll `messages` until a notification with `method` shows up.
pub fn wait_for_notification(messages: &Arc<Mutex<Vec<Value>>>, method: &str) -> Value {
    poll(messages, |m| {
        m.get("method").and_then(Value::as_str) == Some(method)
    })
    .unwrap_or_else(|| panic!("timed out waiting for {method}"))
}

/// Poll `messages` until a response for `id` shows up.
pub fn wait_for_response(messages: &Arc<Mutex<Vec<Value>>>, id: i64) -> Value {
    poll(messages, |m| m.get("id").and_then(Value::as_i64) == Some(id))
        .unwrap_or_else(|| panic!("timed out waiting for response {id}"))
}

fn poll(messages: &Arc<Mutex<Vec<Value>>>, predicate: impl Fn(&Value) -> bool) -> Option<Value> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(found) = messages.lock().unwrap().iter().find(|m| predicate(m)) {
            return Some(found.clone());
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

pub fn command(id: i64, method: &str, params: Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}
