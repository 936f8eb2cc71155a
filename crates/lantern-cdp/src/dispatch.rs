//! Inbound message routing: parse `{id, method, params}`, invoke the domain
//! agent, send the response.

use lantern_diag::DiagEngine;
use serde_json::Value;

use crate::error::AgentError;
use crate::hub::{AgentSet, FrontendChannel};
use crate::protocol;

pub(crate) fn dispatch_message<E: DiagEngine>(
    agents: &AgentSet<E>,
    channel: &FrontendChannel,
    raw: &str,
) {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            channel.send_error(
                Value::Null,
                protocol::PARSE_ERROR,
                &format!("Message must be valid JSON: {err}"),
            );
            return;
        }
    };

    let call_id = parsed.get("id").cloned().unwrap_or(Value::Null);
    let Some(id) = call_id.as_i64() else {
        channel.send_error(
            call_id,
            protocol::INVALID_REQUEST,
            "Message must have an integer 'id' property",
        );
        return;
    };

    let Some(method) = parsed.get("method").and_then(Value::as_str) else {
        channel.send_error(
            call_id,
            protocol::INVALID_REQUEST,
            "Message must have a string 'method' property",
        );
        return;
    };

    let params = parsed.get("params").cloned().unwrap_or(Value::Null);

    tracing::debug!(method, id, "dispatching protocol command");

    let result = match method.split_once('.') {
        Some(("Debugger", name)) => agents.debugger.handle(name, params),
        Some(("Runtime", name)) => agents.runtime.handle(name, params),
        Some(("Console", name)) => agents.console.handle(name, params),
        Some(("Schema", name)) => agents.schema.handle(name, params),
        _ => Err(AgentError::MethodNotFound(method.to_string())),
    };

    match result {
        Ok(value) => channel.send_response(id, value),
        Err(err) => channel.send_error(Value::from(id), err.code(), &err.to_string()),
    }
}
