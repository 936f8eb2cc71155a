use lantern_diag::DiagError;
use thiserror::Error;

use crate::protocol;

pub type HubResult<T> = Result<T, HubError>;

/// Errors surfaced to the embedding host.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("'command' is required")]
    CommandRequired,
    #[error("command exceeds maximum size ({0} bytes)")]
    CommandTooLarge(usize),
    #[error("handler is already connected")]
    AlreadyConnected,
    #[error("no handler is currently connected")]
    NotConnected,
    #[error("engine: {0}")]
    Engine(#[from] DiagError),
}

/// Errors produced by domain-agent method handlers; these map onto the wire
/// `{code, message}` error object of the failed response.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0} is not enabled")]
    NotEnabled(&'static str),
    #[error("Not implemented")]
    NotImplemented,
    #[error("Either url or urlRegex must be specified")]
    UrlRequired,
    #[error("Invalid column number specified")]
    InvalidColumnNumber,
    #[error("Invalid urlRegex: {0}")]
    InvalidUrlRegex(String),
    #[error("Breakpoint at specified location already exists")]
    BreakpointExists,
    #[error("Breakpoint could not be found")]
    BreakpointNotFound,
    #[error("Breakpoint could not be resolved")]
    BreakpointCouldNotResolve,
    #[error("Script must be loaded before resolving")]
    ScriptMustBeLoaded,
    #[error("Script not found: {0}")]
    ScriptNotFound(String),
    #[error("Invalid call frame ID specified")]
    InvalidCallFrameId,
    #[error("Invalid object ID")]
    InvalidObjectId,
    #[error("Script parse failed")]
    ScriptParse,
    #[error("Unrecognized state value: {0}")]
    UnrecognizedState(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Engine(#[from] DiagError),
}

impl AgentError {
    pub fn code(&self) -> i64 {
        match self {
            AgentError::MethodNotFound(_) => protocol::METHOD_NOT_FOUND,
            AgentError::InvalidParams(_) => protocol::INVALID_PARAMS,
            _ => protocol::SERVER_ERROR,
        }
    }
}

pub(crate) type AgentResult<T> = Result<T, AgentError>;
