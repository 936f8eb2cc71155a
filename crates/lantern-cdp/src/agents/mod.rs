pub(crate) mod console;
pub(crate) mod debugger;
pub(crate) mod runtime;
pub(crate) mod schema;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AgentError;

pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, AgentError> {
    serde_json::from_value(params).map_err(|err| AgentError::InvalidParams(err.to_string()))
}
