//! The debugger core: wraps the engine's debug-event callback and drives the
//! pause/resume/step state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use lantern_diag::{
    BreakInfo, ContextScope, DebugEvent, DiagEngine, DiagError, DiagResult, ScriptInfo, StepKind,
};

use crate::hub::{lock, Inner};

/// Decision returned by the break-event subscriber: pause, silently resume,
/// or silently step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipPauseRequest {
    NoSkip,
    Continue,
    StepFrame,
    StepInto,
    StepOut,
}

/// Subscriber interface for source, break, and resume events. Registered by
/// the Debugger agent while it is enabled.
pub(crate) trait DebugEventSink: Send + Sync {
    fn on_source_event(&self, script: &ScriptInfo, success: bool);
    fn on_break_event(&self, info: &BreakInfo) -> SkipPauseRequest;
    fn on_resume_event(&self);
}

pub(crate) struct DebuggerCore<E: DiagEngine> {
    engine: Arc<E>,
    hub: Weak<Inner<E>>,
    enabled: AtomicBool,
    paused: AtomicBool,
    in_nested_loop: AtomicBool,
    pause_on_next_statement: AtomicBool,
    sink: Mutex<Option<Arc<dyn DebugEventSink>>>,
}

impl<E: DiagEngine> DebuggerCore<E> {
    pub(crate) fn new(engine: Arc<E>, hub: Weak<Inner<E>>) -> Self {
        Self {
            engine,
            hub,
            enabled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            in_nested_loop: AtomicBool::new(false),
            pause_on_next_statement: AtomicBool::new(false),
            sink: Mutex::new(None),
        }
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_sink(&self, sink: Option<Arc<dyn DebugEventSink>>) {
        *lock(&self.sink) = sink;
    }

    pub(crate) fn pause_on_next_statement(&self) -> DiagResult<()> {
        self.pause_on_next_statement.store(true, Ordering::SeqCst);
        self.engine.request_async_break()
    }

    pub(crate) fn clear_pause_on_next_statement(&self) {
        self.pause_on_next_statement.store(false, Ordering::SeqCst);
    }

    /// Arrange a step of `kind` and resume execution. `NotAtBreak` from the
    /// engine is a soft signal and does not prevent the continuation.
    pub(crate) fn step(&self, kind: StepKind) -> DiagResult<()> {
        match self.engine.set_step(kind) {
            Ok(()) | Err(DiagError::NotAtBreak) => {}
            Err(err) => return Err(err),
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.continue_run();
        }
        Ok(())
    }

    /// Entry point for every engine debug event; runs on the engine thread.
    pub(crate) fn handle_debug_event(&self, event: DebugEvent) {
        // Commands queued by the transport thread are always processed here,
        // inside a debug callback, before the event itself is examined.
        if let Some(hub) = self.hub.upgrade() {
            hub.process_command_queue();
        }

        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        let _scope = match ContextScope::enter(self.engine.as_ref()) {
            Ok(scope) => scope,
            Err(err) => {
                tracing::error!("failed to activate engine context: {err}");
                return;
            }
        };

        match event {
            DebugEvent::SourceCompile(script) => self.handle_source_event(&script, true),
            DebugEvent::CompileError(script) => self.handle_source_event(&script, false),
            DebugEvent::Breakpoint(info)
            | DebugEvent::StepComplete(info)
            | DebugEvent::DebuggerStatement(info)
            | DebugEvent::RuntimeException(info) => self.handle_break(&info),
            DebugEvent::AsyncBreak(info) => {
                if self.pause_on_next_statement.swap(false, Ordering::SeqCst) {
                    self.handle_break(&info);
                }
            }
        }
    }

    fn handle_source_event(&self, script: &ScriptInfo, success: bool) {
        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            sink.on_source_event(script, success);
        }

        // The engine considers a prior break request satisfied by *any* debug
        // event, even a source event that never enters the debugger UI, so a
        // still-pending pause needs a fresh request.
        if self.pause_on_next_statement.load(Ordering::SeqCst) {
            if let Err(err) = self.engine.request_async_break() {
                tracing::error!("failed to re-request async break: {err}");
            }
        }
    }

    fn handle_break(&self, info: &BreakInfo) {
        if self.in_nested_loop.load(Ordering::SeqCst) {
            // A pause must not start on top of a pause.
            return;
        }

        let Some(sink) = lock(&self.sink).clone() else {
            return;
        };

        self.paused.store(true, Ordering::SeqCst);

        let request = sink.on_break_event(info);

        if request == SkipPauseRequest::NoSkip {
            self.in_nested_loop.store(true, Ordering::SeqCst);
            if let Some(hub) = self.hub.upgrade() {
                hub.process_deferred_go();
                hub.wait_for_debugger();
            }
            self.in_nested_loop.store(false, Ordering::SeqCst);
        }

        self.paused.store(false, Ordering::SeqCst);

        match request {
            SkipPauseRequest::StepFrame | SkipPauseRequest::StepInto => {
                self.set_step_quiet(StepKind::In);
            }
            SkipPauseRequest::StepOut => self.set_step_quiet(StepKind::Out),
            SkipPauseRequest::NoSkip | SkipPauseRequest::Continue => {}
        }

        sink.on_resume_event();
    }

    // Engine errors never propagate out of break handling; the callback has
    // to return cleanly for execution to resume.
    fn set_step_quiet(&self, kind: StepKind) {
        if let Err(err) = self.engine.set_step(kind) {
            if !matches!(err, DiagError::NotAtBreak) {
                tracing::error!("failed to set step type: {err}");
            }
        }
    }
}
