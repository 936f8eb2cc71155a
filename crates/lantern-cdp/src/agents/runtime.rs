//! The `Runtime` domain: evaluation, property enumeration, script
//! compilation, and console notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use lantern_diag::{DiagEngine, DiagError, DiagValue, ScopeKind};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::parse_params;
use crate::error::{AgentError, AgentResult};
use crate::hub::{FrontendChannel, Inner};
use crate::protocol::{ExceptionDetails, RemoteObject};
use crate::wrap;

const DOMAIN: &str = "Runtime";

pub(crate) struct RuntimeAgent<E: DiagEngine> {
    engine: Arc<E>,
    hub: Weak<Inner<E>>,
    channel: FrontendChannel,
    enabled: AtomicBool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams {
    expression: String,
    #[serde(default)]
    silent: Option<bool>,
    #[serde(default)]
    await_promise: Option<bool>,
    #[serde(default)]
    throw_on_side_effect: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPropertiesParams {
    object_id: String,
    #[serde(default)]
    accessor_properties_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileScriptParams {
    expression: String,
    #[serde(rename = "sourceURL", default)]
    source_url: Option<String>,
    #[serde(default)]
    persist_script: Option<bool>,
}

impl<E: DiagEngine> RuntimeAgent<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        hub: Weak<Inner<E>>,
        channel: FrontendChannel,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            hub,
            channel,
            enabled: AtomicBool::new(false),
        })
    }

    pub(crate) fn handle(&self, method: &str, params: Value) -> AgentResult<Value> {
        match method {
            "enable" => self.enable(),
            "disable" => self.disable(),
            "evaluate" => self.evaluate(parse_params(params)?),
            "getProperties" => self.get_properties(parse_params(params)?),
            "compileScript" => self.compile_script(parse_params(params)?),
            "runIfWaitingForDebugger" => self.run_if_waiting_for_debugger(),
            "awaitPromise" | "callFunctionOn" | "releaseObject" | "releaseObjectGroup"
            | "discardConsoleEntries" | "setCustomObjectFormatterEnabled" | "runScript" => {
                Err(AgentError::NotImplemented)
            }
            other => Err(AgentError::MethodNotFound(format!("{DOMAIN}.{other}"))),
        }
    }

    pub(crate) fn teardown(&self) {
        let _ = self.disable();
    }

    fn enable(&self) -> AgentResult<Value> {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            self.channel.send_notification(
                "Runtime.executionContextCreated",
                json!({ "context": { "id": 1, "origin": "default", "name": "default" } }),
            );
        }
        Ok(json!({}))
    }

    fn disable(&self) -> AgentResult<Value> {
        self.enabled.store(false, Ordering::SeqCst);
        Ok(json!({}))
    }

    fn evaluate(&self, params: EvaluateParams) -> AgentResult<Value> {
        if params.throw_on_side_effect.unwrap_or(false) {
            // Side-effect freedom cannot be proven, so refuse without
            // touching the engine evaluator.
            let result = RemoteObject {
                kind: "error".to_string(),
                subtype: Some("error".to_string()),
                class_name: Some("error".to_string()),
                description: Some("Eval Error".to_string()),
                ..RemoteObject::default()
            };
            let details = ExceptionDetails {
                exception_id: 0,
                text: "Possible side effects of expression evaluation".to_string(),
                line_number: -1,
                column_number: -1,
                exception: None,
            };
            return Ok(json!({ "result": result, "exceptionDetails": details }));
        }

        if params.await_promise.unwrap_or(false) {
            return Err(AgentError::NotImplemented);
        }

        let silent = params.silent.unwrap_or(false);

        match self.engine.evaluate_at_frame(&params.expression, 0) {
            Ok(value) => Ok(json!({ "result": wrap::wrap_value(&value) })),
            Err(DiagError::ScriptException(exception)) => Ok(exception_response(&exception)),
            Err(DiagError::CompileError(metadata)) => Ok(json!({
                "result": wrap::wrap_exception(&metadata.exception),
                "exceptionDetails": wrap::exception_details_from_metadata(&metadata),
            })),
            Err(DiagError::NotAtBreak) => self.evaluate_global(&params.expression, silent),
            Err(err) => self.evaluation_failure(err, silent),
        }
    }

    /// Fallback for evaluation while the engine is running: execute the
    /// expression as a top-level script inside a guard that funnels both the
    /// completion value and any thrown error into an inspectable object.
    fn evaluate_global(&self, expression: &str, silent: bool) -> AgentResult<Value> {
        let guarded = format!(
            "try{{({{value:eval(\"{}\")}})}}catch(e){{({{error:e}})}}",
            escape_js_string(expression)
        );

        match self.engine.run_script(&guarded, "") {
            Ok(completion) => {
                if let Some(handle) = completion.handle {
                    let object = self.engine.object_from_handle(handle)?;
                    if let Some(property) =
                        object.properties.iter().find(|p| p.name == "value")
                    {
                        return Ok(json!({ "result": wrap::wrap_value(&property.value) }));
                    }
                    if let Some(property) =
                        object.properties.iter().find(|p| p.name == "error")
                    {
                        return Ok(exception_response(&property.value));
                    }
                }
                self.evaluation_failure(
                    DiagError::Other("unexpected evaluation result shape".to_string()),
                    silent,
                )
            }
            Err(DiagError::ScriptException(exception)) => Ok(exception_response(&exception)),
            Err(DiagError::CompileError(metadata)) => Ok(json!({
                "result": wrap::wrap_exception(&metadata.exception),
                "exceptionDetails": wrap::exception_details_from_metadata(&metadata),
            })),
            Err(err) => self.evaluation_failure(err, silent),
        }
    }

    fn evaluation_failure(&self, err: DiagError, silent: bool) -> AgentResult<Value> {
        if !silent {
            return Err(err.into());
        }
        let details = ExceptionDetails {
            exception_id: 0,
            text: err.to_string(),
            line_number: 0,
            column_number: 0,
            exception: None,
        };
        Ok(json!({
            "result": RemoteObject { kind: "undefined".to_string(), ..RemoteObject::default() },
            "exceptionDetails": details,
        }))
    }

    fn get_properties(&self, params: GetPropertiesParams) -> AgentResult<Value> {
        if params.accessor_properties_only.unwrap_or(false) {
            // Accessor-only enumeration is unsupported; an empty list keeps
            // the front-end happy.
            return Ok(json!({ "result": [] }));
        }

        let parsed = wrap::parse_object_id(&params.object_id)?;

        let object = if let Some(handle) = parsed.handle {
            self.engine.object_from_handle(handle).map_err(|err| match err {
                DiagError::InvalidHandle(_) => AgentError::InvalidObjectId,
                other => AgentError::from(other),
            })?
        } else if let (Some(ordinal), Some(name)) = (parsed.ordinal, parsed.name.as_deref()) {
            let scope = match name {
                "locals" => ScopeKind::Locals,
                "globals" => ScopeKind::Globals,
                _ => return Err(AgentError::InvalidObjectId),
            };
            self.engine.frame_scope(ordinal, scope)?
        } else {
            return Err(AgentError::InvalidObjectId);
        };

        let result: Vec<_> = object.properties.iter().map(wrap::wrap_property).collect();
        let internals: Vec<_> = object
            .internals
            .iter()
            .map(wrap::wrap_internal_property)
            .collect();
        Ok(json!({ "result": result, "internalProperties": internals }))
    }

    fn compile_script(&self, params: CompileScriptParams) -> AgentResult<Value> {
        if params.persist_script.unwrap_or(false) {
            return Err(AgentError::NotImplemented);
        }

        let url = params.source_url.unwrap_or_default();
        match self.engine.parse_script(&params.expression, &url) {
            Ok(()) => Ok(json!({})),
            Err(DiagError::CompileError(metadata)) => Ok(json!({
                "exceptionDetails": wrap::exception_details_from_metadata(&metadata),
            })),
            Err(_) => Err(AgentError::ScriptParse),
        }
    }

    fn run_if_waiting_for_debugger(&self) -> AgentResult<Value> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(AgentError::NotEnabled(DOMAIN));
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.run_if_waiting_for_debugger();
        }
        Ok(json!({}))
    }

    pub(crate) fn console_api_called(&self, api: &str, args: &[DiagValue]) {
        let wrapped: Vec<_> = args.iter().map(wrap::wrap_value).collect();
        self.channel.send_notification(
            "Runtime.consoleAPICalled",
            json!({
                "type": api,
                "args": wrapped,
                "executionContextId": 1,
                "timestamp": 0,
            }),
        );
    }
}

fn exception_response(exception: &DiagValue) -> Value {
    json!({
        "result": wrap::wrap_exception(exception),
        "exceptionDetails": wrap::exception_details(exception),
    })
}

fn escape_js_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
