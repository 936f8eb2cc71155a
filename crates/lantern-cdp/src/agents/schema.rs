//! The `Schema` domain: advertises the supported protocol domains.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{AgentError, AgentResult};
use crate::protocol::PROTOCOL_VERSION;

const DOMAINS: [&str; 4] = ["Console", "Debugger", "Runtime", "Schema"];

pub(crate) struct SchemaAgent;

impl SchemaAgent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    pub(crate) fn handle(&self, method: &str, _params: Value) -> AgentResult<Value> {
        match method {
            "getDomains" => {
                let domains: Vec<_> = DOMAINS
                    .iter()
                    .map(|name| json!({ "name": name, "version": PROTOCOL_VERSION }))
                    .collect();
                Ok(json!({ "domains": domains }))
            }
            other => Err(AgentError::MethodNotFound(format!("Schema.{other}"))),
        }
    }
}
