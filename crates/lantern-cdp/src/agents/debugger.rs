//! The `Debugger` domain: breakpoints, stepping, pause/resume, script
//! bookkeeping, and the source/break/resume event sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use lantern_diag::{
    BreakInfo, DiagEngine, DiagError, DiagValue, ExceptionBreakMode, FrameInfo, ScriptInfo,
    StepKind,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::parse_params;
use crate::breakpoints::{Breakpoint, BreakpointRegistry};
use crate::condition;
use crate::core::{DebugEventSink, SkipPauseRequest};
use crate::error::{AgentError, AgentResult};
use crate::hub::{lock, FrontendChannel, Inner};
use crate::protocol::{CallFrame, Location, RemoteObject, Scope};
use crate::wrap;

const DOMAIN: &str = "Debugger";

#[derive(Default)]
struct DebuggerState {
    enabled: bool,
    skip_all_pauses: bool,
    scripts: HashMap<String, ScriptInfo>,
    breakpoints: BreakpointRegistry,
}

pub(crate) struct DebuggerAgent<E: DiagEngine> {
    engine: Arc<E>,
    hub: Weak<Inner<E>>,
    channel: FrontendChannel,
    self_weak: Weak<DebuggerAgent<E>>,
    state: Mutex<DebuggerState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBreakpointByUrlParams {
    line_number: u32,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    url_regex: Option<String>,
    #[serde(default)]
    column_number: Option<i64>,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBreakpointParams {
    location: Location,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveBreakpointParams {
    breakpoint_id: String,
}

#[derive(Debug, Deserialize)]
struct SetPauseOnExceptionsParams {
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateOnCallFrameParams {
    call_frame_id: String,
    expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetScriptSourceParams {
    script_id: String,
}

impl<E: DiagEngine> DebuggerAgent<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        hub: Weak<Inner<E>>,
        channel: FrontendChannel,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            engine,
            hub,
            channel,
            self_weak: weak.clone(),
            state: Mutex::new(DebuggerState::default()),
        })
    }

    pub(crate) fn handle(&self, method: &str, params: Value) -> AgentResult<Value> {
        match method {
            "enable" => self.enable(),
            "disable" => self.disable(),
            "setBreakpointByUrl" => self.set_breakpoint_by_url(parse_params(params)?),
            "setBreakpoint" => self.set_breakpoint(parse_params(params)?),
            "removeBreakpoint" => self.remove_breakpoint(parse_params(params)?),
            "stepOver" => self.step(StepKind::Over),
            "stepInto" => self.step(StepKind::In),
            "stepOut" => self.step(StepKind::Out),
            "pause" => self.pause(),
            "resume" => self.resume(),
            "setPauseOnExceptions" => self.set_pause_on_exceptions(parse_params(params)?),
            "evaluateOnCallFrame" => self.evaluate_on_call_frame(parse_params(params)?),
            "getScriptSource" => self.get_script_source(parse_params(params)?),
            "setBreakpointsActive" | "setSkipAllPauses" | "continueToLocation"
            | "searchInContent" | "setScriptSource" | "restartFrame" | "setVariableValue"
            | "setAsyncCallStackDepth" | "setBlackboxPatterns" | "setBlackboxedRanges" => {
                Err(AgentError::NotImplemented)
            }
            other => Err(AgentError::MethodNotFound(format!("{DOMAIN}.{other}"))),
        }
    }

    pub(crate) fn teardown(&self) {
        if let Err(err) = self.disable() {
            tracing::debug!("debugger teardown failed: {err}");
        }
    }

    fn enable(&self) -> AgentResult<Value> {
        {
            let mut state = lock(&self.state);
            if state.enabled {
                return Ok(json!({}));
            }
            state.enabled = true;
        }

        let Some(hub) = self.hub.upgrade() else {
            return Ok(json!({}));
        };
        hub.core.enable();
        if let Some(this) = self.self_weak.upgrade() {
            let sink: Arc<dyn DebugEventSink> = this;
            hub.core.set_sink(Some(sink));
        }

        // Replay scripts parsed before the debugger attached, in the engine's
        // enumeration order.
        let scripts = self.engine.scripts().unwrap_or_default();
        for script in &scripts {
            self.process_source_event(script, true);
        }

        Ok(json!({}))
    }

    fn disable(&self) -> AgentResult<Value> {
        let resolved = {
            let mut state = lock(&self.state);
            if !state.enabled {
                return Ok(json!({}));
            }
            state.enabled = false;
            let resolved = state.breakpoints.resolved_ids();
            state.breakpoints.clear();
            state.scripts.clear();
            state.skip_all_pauses = false;
            resolved
        };

        for breakpoint_id in resolved {
            let _ = self.engine.remove_breakpoint(breakpoint_id);
        }

        if let Some(hub) = self.hub.upgrade() {
            hub.core.set_sink(None);
            hub.core.disable();
        }

        Ok(json!({}))
    }

    fn set_breakpoint_by_url(&self, params: SetBreakpointByUrlParams) -> AgentResult<Value> {
        let column = params.column_number.unwrap_or(0);
        if column < 0 {
            return Err(AgentError::InvalidColumnNumber);
        }
        let column = column as u32;

        let mut breakpoint = match (params.url, params.url_regex) {
            (Some(url), None) => {
                Breakpoint::by_url(url, params.line_number, column, params.condition)
            }
            (None, Some(pattern)) => {
                Breakpoint::by_url_regex(pattern, params.line_number, column, params.condition)?
            }
            _ => return Err(AgentError::UrlRequired),
        };

        let fingerprint = breakpoint.fingerprint();

        let mut state = lock(&self.state);
        if state.breakpoints.contains(&fingerprint) {
            return Err(AgentError::BreakpointExists);
        }

        let mut locations = Vec::new();
        for script in state.scripts.values() {
            if breakpoint.bind_script(script) && breakpoint.resolve(self.engine.as_ref())? {
                if let Some(location) = breakpoint.actual_location() {
                    locations.push(location);
                }
            }
        }

        let mut response = json!({ "locations": locations });
        if !state.breakpoints.has_equivalent(&breakpoint) {
            state.breakpoints.insert(breakpoint)?;
            response["breakpointId"] = Value::String(fingerprint);
        }
        Ok(response)
    }

    fn set_breakpoint(&self, params: SetBreakpointParams) -> AgentResult<Value> {
        let mut breakpoint = Breakpoint::at_location(&params.location, params.condition);
        let fingerprint = breakpoint.fingerprint();

        let mut state = lock(&self.state);
        if state.breakpoints.contains(&fingerprint) {
            return Err(AgentError::BreakpointExists);
        }

        if !breakpoint.resolve(self.engine.as_ref())? {
            return Err(AgentError::BreakpointCouldNotResolve);
        }

        let mut response = json!({ "actualLocation": breakpoint.actual_location() });
        if !state.breakpoints.has_equivalent(&breakpoint) {
            state.breakpoints.insert(breakpoint)?;
            response["breakpointId"] = Value::String(fingerprint);
        }
        Ok(response)
    }

    fn remove_breakpoint(&self, params: RemoveBreakpointParams) -> AgentResult<Value> {
        let removed = lock(&self.state).breakpoints.remove(&params.breakpoint_id);
        match removed {
            Some(breakpoint) => {
                if let Some(resolved) = breakpoint.resolved() {
                    let _ = self.engine.remove_breakpoint(resolved.breakpoint_id);
                }
                Ok(json!({}))
            }
            None => Err(AgentError::BreakpointNotFound),
        }
    }

    fn step(&self, kind: StepKind) -> AgentResult<Value> {
        if let Some(hub) = self.hub.upgrade() {
            hub.core.step(kind)?;
        }
        Ok(json!({}))
    }

    fn pause(&self) -> AgentResult<Value> {
        if let Some(hub) = self.hub.upgrade() {
            hub.core.pause_on_next_statement()?;
        }
        Ok(json!({}))
    }

    fn resume(&self) -> AgentResult<Value> {
        if !lock(&self.state).enabled {
            return Err(AgentError::NotEnabled(DOMAIN));
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.continue_run();
        }
        Ok(json!({}))
    }

    fn set_pause_on_exceptions(&self, params: SetPauseOnExceptionsParams) -> AgentResult<Value> {
        let mode = match params.state.as_str() {
            "none" => ExceptionBreakMode::None,
            "all" => ExceptionBreakMode::FirstChance,
            "uncaught" => ExceptionBreakMode::Uncaught,
            other => return Err(AgentError::UnrecognizedState(other.to_string())),
        };
        self.engine.set_break_on_exception(mode)?;
        Ok(json!({}))
    }

    fn evaluate_on_call_frame(&self, params: EvaluateOnCallFrameParams) -> AgentResult<Value> {
        let parsed = wrap::parse_object_id(&params.call_frame_id)
            .map_err(|_| AgentError::InvalidCallFrameId)?;
        let Some(ordinal) = parsed.ordinal else {
            return Err(AgentError::InvalidCallFrameId);
        };

        match self.engine.evaluate_at_frame(&params.expression, ordinal) {
            Ok(value) => Ok(json!({ "result": wrap::wrap_value(&value) })),
            Err(DiagError::ScriptException(exception)) => Ok(json!({
                "result": wrap::wrap_exception(&exception),
                "exceptionDetails": wrap::exception_details(&exception),
            })),
            Err(DiagError::CompileError(metadata)) => Ok(json!({
                "result": wrap::wrap_exception(&metadata.exception),
                "exceptionDetails": wrap::exception_details_from_metadata(&metadata),
            })),
            Err(err) => Err(err.into()),
        }
    }

    fn get_script_source(&self, params: GetScriptSourceParams) -> AgentResult<Value> {
        {
            let state = lock(&self.state);
            if !state.enabled {
                return Err(AgentError::NotEnabled(DOMAIN));
            }
            if !state.scripts.contains_key(&params.script_id) {
                return Err(AgentError::ScriptNotFound(params.script_id));
            }
        }

        let source = self.engine.script_source(&params.script_id)?;
        Ok(json!({ "scriptSource": source }))
    }

    fn process_source_event(&self, script: &ScriptInfo, success: bool) {
        let mut params = json!({
            "scriptId": script.script_id,
            "url": script.url,
            "startLine": script.start_line,
            "startColumn": script.start_column,
            "endLine": script.end_line,
            "endColumn": script.end_column,
            "executionContextId": script.execution_context_id,
            "hash": script.hash,
            "sourceMapURL": script.source_map_url,
            "hasSourceURL": script.has_source_url,
        });
        let method = if success {
            params["isLiveEdit"] = Value::Bool(script.is_live_edit);
            "Debugger.scriptParsed"
        } else {
            "Debugger.scriptFailedToParse"
        };
        self.channel.send_notification(method, params);

        let mut resolutions = Vec::new();
        {
            let mut state = lock(&self.state);
            state
                .scripts
                .insert(script.script_id.clone(), script.clone());

            for (fingerprint, breakpoint) in state.breakpoints.iter_mut() {
                if !breakpoint.bind_script(script) {
                    continue;
                }
                match breakpoint.resolve(self.engine.as_ref()) {
                    Ok(true) => {
                        if let Some(location) = breakpoint.actual_location() {
                            resolutions.push((fingerprint.clone(), location));
                        }
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::debug!("breakpoint {fingerprint} failed to resolve: {err}");
                    }
                }
            }
        }

        for (breakpoint_id, location) in resolutions {
            self.channel.send_notification(
                "Debugger.breakpointResolved",
                json!({ "breakpointId": breakpoint_id, "location": location }),
            );
        }
    }

    fn process_break_event(&self, info: &BreakInfo) -> SkipPauseRequest {
        let request = if lock(&self.state).skip_all_pauses {
            SkipPauseRequest::Continue
        } else {
            self.evaluate_breakpoint_condition(info)
        };
        if request != SkipPauseRequest::NoSkip {
            return request;
        }

        let frames = self.engine.stack_trace().unwrap_or_else(|err| {
            tracing::error!("failed to fetch the paused stack trace: {err}");
            Vec::new()
        });
        let call_frames: Vec<CallFrame> = frames.iter().map(build_call_frame).collect();

        let hit_breakpoints: Vec<String> = info
            .breakpoint_id
            .and_then(|id| {
                let mut state = lock(&self.state);
                state
                    .breakpoints
                    .find_by_resolved_id(id)
                    .map(|(fingerprint, _)| fingerprint.clone())
            })
            .into_iter()
            .collect();

        let mut params = json!({
            "callFrames": call_frames,
            "reason": "Break",
            "hitBreakpoints": hit_breakpoints,
        });
        if let Some(exception) = &info.exception {
            params["reason"] = Value::String("exception".to_string());
            params["data"] =
                serde_json::to_value(wrap::wrap_exception(exception)).unwrap_or(Value::Null);
        }

        self.channel.send_notification("Debugger.paused", params);
        SkipPauseRequest::NoSkip
    }

    fn evaluate_breakpoint_condition(&self, info: &BreakInfo) -> SkipPauseRequest {
        let Some(engine_id) = info.breakpoint_id else {
            return SkipPauseRequest::NoSkip;
        };

        let condition = {
            let mut state = lock(&self.state);
            state
                .breakpoints
                .find_by_resolved_id(engine_id)
                .and_then(|(_, breakpoint)| breakpoint.condition().map(str::to_string))
        };
        let Some(condition) = condition else {
            return SkipPauseRequest::NoSkip;
        };

        condition::evaluate(self.engine.as_ref(), &condition)
    }
}

impl<E: DiagEngine> DebugEventSink for DebuggerAgent<E> {
    fn on_source_event(&self, script: &ScriptInfo, success: bool) {
        self.process_source_event(script, success);
    }

    fn on_break_event(&self, info: &BreakInfo) -> SkipPauseRequest {
        self.process_break_event(info)
    }

    fn on_resume_event(&self) {
        self.channel.send_notification("Debugger.resumed", json!({}));
    }
}

fn build_call_frame(frame: &FrameInfo) -> CallFrame {
    let scope = |kind: &str, name: &str| Scope {
        kind: kind.to_string(),
        object: RemoteObject {
            kind: "object".to_string(),
            class_name: Some("Object".to_string()),
            description: Some("Object".to_string()),
            object_id: Some(wrap::scope_object_id(frame.ordinal, name)),
            ..RemoteObject::default()
        },
    };

    CallFrame {
        call_frame_id: wrap::call_frame_id(frame.ordinal),
        function_name: frame.function_name.clone(),
        location: Location {
            script_id: frame.script_id.clone(),
            line_number: frame.line,
            column_number: frame.column,
        },
        scope_chain: vec![scope("local", "locals"), scope("global", "globals")],
        this: frame
            .this
            .as_ref()
            .map(wrap::wrap_value)
            .unwrap_or_else(|| wrap::wrap_value(&DiagValue::undefined())),
    }
}
