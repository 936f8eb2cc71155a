use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    BreakInfo, ConsoleSink, DebugEvent, DebugEventCallback, DiagEngine, DiagError, DiagObject,
    DiagResult, DiagValue, EngineBreakpointId, ExceptionBreakMode, FrameInfo, ObjectHandle,
    ResolvedLocation, ScopeKind, ScriptInfo, StepKind,
};

const CONSOLE_OBJECT_HANDLE: ObjectHandle = 9000;

#[derive(Default)]
struct MockState {
    scripts: Vec<ScriptInfo>,
    sources: HashMap<String, String>,
    stack: Vec<FrameInfo>,
    scopes: HashMap<(u32, ScopeKind), DiagObject>,
    objects: HashMap<ObjectHandle, DiagObject>,
    breakpoints: HashMap<EngineBreakpointId, (String, u32, u32)>,
    next_breakpoint_id: EngineBreakpointId,
    evaluations: HashMap<(u32, String), VecDeque<DiagResult<DiagValue>>>,
    script_runs: VecDeque<DiagResult<DiagValue>>,
    script_parses: VecDeque<DiagResult<()>>,
    break_on_exception: Option<ExceptionBreakMode>,
    console_sink: Option<Arc<ConsoleSink>>,
    // recorded calls
    evaluate_calls: Vec<(u32, String)>,
    run_script_calls: Vec<String>,
    step_calls: Vec<StepKind>,
    removed_breakpoints: Vec<EngineBreakpointId>,
    async_break_requests: usize,
}

/// Deterministic, in-memory engine test double.
///
/// Tests play the engine thread: `pump_async_break` and the `emit_*` helpers
/// deliver debug events through the registered callback on the calling
/// thread, blocking until the callback returns, exactly like a real engine's
/// debug callback contract. Break-class events flip the paused gate for their
/// duration so frame evaluation works inside them and fails with
/// [`DiagError::NotAtBreak`] outside.
pub struct MockEngine {
    state: Mutex<MockState>,
    callback: Mutex<Option<Arc<dyn Fn(DebugEvent) + Send + Sync>>>,
    paused: AtomicBool,
    async_break_requested: AtomicBool,
    context_depth: AtomicI32,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_breakpoint_id: 1,
                ..MockState::default()
            }),
            callback: Mutex::new(None),
            paused: AtomicBool::new(false),
            async_break_requested: AtomicBool::new(false),
            context_depth: AtomicI32::new(0),
        }
    }

    /// Convenience constructor for a one-line script entry.
    pub fn script(script_id: &str, url: &str) -> ScriptInfo {
        ScriptInfo {
            script_id: script_id.to_string(),
            url: url.to_string(),
            start_line: 0,
            start_column: 0,
            end_line: 10,
            end_column: 0,
            execution_context_id: 1,
            hash: format!("hash-{script_id}"),
            is_live_edit: false,
            source_map_url: String::new(),
            has_source_url: !url.is_empty(),
        }
    }

    pub fn register_script(&self, script: ScriptInfo, source: &str) {
        let mut state = self.lock();
        state.sources.insert(script.script_id.clone(), source.to_string());
        state.scripts.push(script);
    }

    pub fn set_stack(&self, frames: Vec<FrameInfo>) {
        self.lock().stack = frames;
    }

    pub fn set_scope(&self, ordinal: u32, scope: ScopeKind, object: DiagObject) {
        self.lock().scopes.insert((ordinal, scope), object);
    }

    pub fn insert_object(&self, handle: ObjectHandle, object: DiagObject) {
        self.lock().objects.insert(handle, object);
    }

    pub fn queue_evaluation(
        &self,
        ordinal: u32,
        expression: impl Into<String>,
        result: DiagResult<DiagValue>,
    ) {
        self.lock()
            .evaluations
            .entry((ordinal, expression.into()))
            .or_default()
            .push_back(result);
    }

    pub fn queue_script_run(&self, result: DiagResult<DiagValue>) {
        self.lock().script_runs.push_back(result);
    }

    pub fn queue_script_parse(&self, result: DiagResult<()>) {
        self.lock().script_parses.push_back(result);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Deliver a pending async-break request, if any. Returns whether an
    /// event was delivered.
    pub fn pump_async_break(&self) -> bool {
        if !self.async_break_requested.load(Ordering::SeqCst) {
            return false;
        }
        self.emit(DebugEvent::AsyncBreak(BreakInfo::default()));
        true
    }

    pub fn emit_script_parsed(&self, script: ScriptInfo, source: &str) {
        self.register_script(script.clone(), source);
        self.emit(DebugEvent::SourceCompile(script));
    }

    pub fn emit_compile_error(&self, script: ScriptInfo) {
        self.emit(DebugEvent::CompileError(script));
    }

    pub fn emit_break(&self, info: BreakInfo) {
        self.emit(DebugEvent::Breakpoint(info));
    }

    /// Deliver `event` through the registered debug callback on the calling
    /// thread. The engine treats any delivered event as satisfying a prior
    /// async-break request.
    pub fn emit(&self, event: DebugEvent) {
        let callback = {
            let slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
            slot.clone()
        };
        let Some(callback) = callback else { return };

        self.async_break_requested.store(false, Ordering::SeqCst);

        let pauses = matches!(
            event,
            DebugEvent::Breakpoint(_)
                | DebugEvent::StepComplete(_)
                | DebugEvent::DebuggerStatement(_)
                | DebugEvent::RuntimeException(_)
                | DebugEvent::AsyncBreak(_)
        );
        if pauses {
            self.paused.store(true, Ordering::SeqCst);
        }
        (*callback)(event);
        if pauses {
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    /// Invoke the console sink as if script code called `console.<api>`.
    pub fn call_console(&self, api: &str, args: &[DiagValue]) {
        let sink = self.lock().console_sink.clone();
        if let Some(sink) = sink {
            (*sink)(api, args);
        }
    }

    pub fn async_break_request_count(&self) -> usize {
        self.lock().async_break_requests
    }

    pub fn has_pending_async_break(&self) -> bool {
        self.async_break_requested.load(Ordering::SeqCst)
    }

    pub fn evaluate_calls(&self) -> Vec<(u32, String)> {
        self.lock().evaluate_calls.clone()
    }

    pub fn run_script_calls(&self) -> Vec<String> {
        self.lock().run_script_calls.clone()
    }

    pub fn step_calls(&self) -> Vec<StepKind> {
        self.lock().step_calls.clone()
    }

    pub fn removed_breakpoints(&self) -> Vec<EngineBreakpointId> {
        self.lock().removed_breakpoints.clone()
    }

    pub fn installed_breakpoints(&self) -> Vec<EngineBreakpointId> {
        let mut ids: Vec<_> = self.lock().breakpoints.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn break_on_exception_mode(&self) -> Option<ExceptionBreakMode> {
        self.lock().break_on_exception
    }

    pub fn context_depth(&self) -> i32 {
        self.context_depth.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiagEngine for MockEngine {
    fn start_debugging(&self, callback: DebugEventCallback) -> DiagResult<()> {
        let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DiagError::Other("debugging already started".to_string()));
        }
        *slot = Some(Arc::from(callback));
        Ok(())
    }

    fn stop_debugging(&self) -> DiagResult<()> {
        let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        Ok(())
    }

    fn request_async_break(&self) -> DiagResult<()> {
        self.async_break_requested.store(true, Ordering::SeqCst);
        self.lock().async_break_requests += 1;
        Ok(())
    }

    fn scripts(&self) -> DiagResult<Vec<ScriptInfo>> {
        Ok(self.lock().scripts.clone())
    }

    fn script_source(&self, script_id: &str) -> DiagResult<String> {
        self.lock()
            .sources
            .get(script_id)
            .cloned()
            .ok_or_else(|| DiagError::ScriptNotFound(script_id.to_string()))
    }

    fn stack_trace(&self) -> DiagResult<Vec<FrameInfo>> {
        Ok(self.lock().stack.clone())
    }

    fn frame_scope(&self, ordinal: u32, scope: ScopeKind) -> DiagResult<DiagObject> {
        self.lock()
            .scopes
            .get(&(ordinal, scope))
            .cloned()
            .ok_or(DiagError::InvalidOrdinal(ordinal))
    }

    fn object_from_handle(&self, handle: ObjectHandle) -> DiagResult<DiagObject> {
        self.lock()
            .objects
            .get(&handle)
            .cloned()
            .ok_or(DiagError::InvalidHandle(handle))
    }

    fn set_breakpoint(
        &self,
        script_id: &str,
        line: u32,
        column: u32,
    ) -> DiagResult<ResolvedLocation> {
        let mut state = self.lock();
        if !state.scripts.iter().any(|s| s.script_id == script_id) {
            return Err(DiagError::ScriptNotFound(script_id.to_string()));
        }
        let id = state.next_breakpoint_id;
        state.next_breakpoint_id += 1;
        state
            .breakpoints
            .insert(id, (script_id.to_string(), line, column));
        Ok(ResolvedLocation {
            breakpoint_id: id,
            line,
            column,
        })
    }

    fn remove_breakpoint(&self, breakpoint_id: EngineBreakpointId) -> DiagResult<()> {
        let mut state = self.lock();
        state.removed_breakpoints.push(breakpoint_id);
        state.breakpoints.remove(&breakpoint_id);
        Ok(())
    }

    fn set_step(&self, kind: StepKind) -> DiagResult<()> {
        if !self.paused.load(Ordering::SeqCst) {
            return Err(DiagError::NotAtBreak);
        }
        self.lock().step_calls.push(kind);
        Ok(())
    }

    fn break_on_exception(&self) -> DiagResult<ExceptionBreakMode> {
        Ok(self
            .lock()
            .break_on_exception
            .unwrap_or(ExceptionBreakMode::None))
    }

    fn set_break_on_exception(&self, mode: ExceptionBreakMode) -> DiagResult<()> {
        self.lock().break_on_exception = Some(mode);
        Ok(())
    }

    fn evaluate_at_frame(&self, expression: &str, ordinal: u32) -> DiagResult<DiagValue> {
        let mut state = self.lock();
        state.evaluate_calls.push((ordinal, expression.to_string()));
        if !self.paused.load(Ordering::SeqCst) {
            return Err(DiagError::NotAtBreak);
        }
        let key = (ordinal, expression.to_string());
        match state.evaluations.get_mut(&key).and_then(|q| q.pop_front()) {
            Some(result) => result,
            None => Err(DiagError::Other(format!(
                "no mock evaluation result queued for `{expression}`"
            ))),
        }
    }

    fn run_script(&self, source: &str, _url: &str) -> DiagResult<DiagValue> {
        let mut state = self.lock();
        state.run_script_calls.push(source.to_string());
        match state.script_runs.pop_front() {
            Some(result) => result,
            None => Err(DiagError::Other(
                "no mock script result queued".to_string(),
            )),
        }
    }

    fn parse_script(&self, _source: &str, _url: &str) -> DiagResult<()> {
        let mut state = self.lock();
        state.script_parses.pop_front().unwrap_or(Ok(()))
    }

    fn acquire_context(&self) -> DiagResult<()> {
        self.context_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_context(&self) {
        self.context_depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn create_console_object(&self, sink: ConsoleSink) -> DiagResult<ObjectHandle> {
        self.lock().console_sink = Some(Arc::new(sink));
        Ok(CONSOLE_OBJECT_HANDLE)
    }
}
