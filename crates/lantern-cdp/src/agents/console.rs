//! The `Console` domain. Message delivery happens through
//! `Runtime.consoleAPICalled`; this domain only acknowledges the lifecycle
//! methods clients send.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{AgentError, AgentResult};

pub(crate) struct ConsoleAgent;

impl ConsoleAgent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    pub(crate) fn handle(&self, method: &str, _params: Value) -> AgentResult<Value> {
        match method {
            "enable" | "disable" | "clearMessages" => Ok(json!({})),
            other => Err(AgentError::MethodNotFound(format!("Console.{other}"))),
        }
    }
}
