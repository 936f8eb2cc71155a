//! Diagnostic facade for an embedded JavaScript engine.
//!
//! `lantern-cdp` consumes this crate to observe and control script execution:
//! enumerating parsed scripts, walking the paused stack, planting breakpoints,
//! stepping, and evaluating expressions.
//!
//! The engine delivers debug events synchronously on its script-executing
//! thread through the callback registered with
//! [`DiagEngine::start_debugging`]; every other method here must be called on
//! that same thread. The trait is designed so the adapter can be exercised
//! against [`MockEngine`] without a live engine.

mod mock;

use thiserror::Error;

pub use mock::MockEngine;

/// Engine-allocated handle for an object surfaced to the debugger.
pub type ObjectHandle = i32;
/// Engine-assigned id for a breakpoint it has accepted.
pub type EngineBreakpointId = u32;

/// Property attribute bit: the property cannot be written.
pub const PROPERTY_READ_ONLY: u32 = 0x4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Function,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Boolean(bool),
    Number(f64),
    String(String),
}

/// The engine's diagnostic description of a value.
///
/// Primitives carry their payload inline; objects carry a [`ObjectHandle`]
/// that stays valid while the debugger session is enabled. `display` is the
/// engine's own rendering when it provides one (property enumerations do,
/// plain evaluation results may not).
#[derive(Clone, Debug, PartialEq)]
pub struct DiagValue {
    pub kind: ValueKind,
    pub primitive: Option<Primitive>,
    pub class_name: Option<String>,
    pub display: Option<String>,
    pub handle: Option<ObjectHandle>,
}

impl DiagValue {
    pub fn undefined() -> Self {
        Self::of_kind(ValueKind::Undefined)
    }

    pub fn null() -> Self {
        Self::of_kind(ValueKind::Null)
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            primitive: Some(Primitive::Boolean(value)),
            ..Self::of_kind(ValueKind::Boolean)
        }
    }

    pub fn number(value: f64) -> Self {
        Self {
            primitive: Some(Primitive::Number(value)),
            ..Self::of_kind(ValueKind::Number)
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            primitive: Some(Primitive::String(value.into())),
            ..Self::of_kind(ValueKind::String)
        }
    }

    pub fn object(handle: ObjectHandle, class_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            handle: Some(handle),
            ..Self::of_kind(ValueKind::Object)
        }
    }

    pub fn array(handle: ObjectHandle) -> Self {
        Self {
            handle: Some(handle),
            ..Self::of_kind(ValueKind::Array)
        }
    }

    pub fn function(handle: ObjectHandle) -> Self {
        Self {
            handle: Some(handle),
            ..Self::of_kind(ValueKind::Function)
        }
    }

    pub fn error(handle: ObjectHandle, message: impl Into<String>) -> Self {
        Self {
            class_name: Some("Error".to_string()),
            display: Some(message.into()),
            handle: Some(handle),
            ..Self::of_kind(ValueKind::Error)
        }
    }

    fn of_kind(kind: ValueKind) -> Self {
        Self {
            kind,
            primitive: None,
            class_name: None,
            display: None,
            handle: None,
        }
    }

    /// JavaScript truthiness over the description.
    pub fn is_truthy(&self) -> bool {
        match self.kind {
            ValueKind::Undefined | ValueKind::Null => false,
            ValueKind::Boolean | ValueKind::Number | ValueKind::String => {
                match &self.primitive {
                    Some(Primitive::Boolean(b)) => *b,
                    Some(Primitive::Number(n)) => *n != 0.0 && !n.is_nan(),
                    Some(Primitive::String(s)) => !s.is_empty(),
                    None => false,
                }
            }
            ValueKind::Object | ValueKind::Array | ValueKind::Function | ValueKind::Error => true,
        }
    }
}

/// A named property as the engine reports it during enumeration.
#[derive(Clone, Debug, PartialEq)]
pub struct DiagProperty {
    pub name: String,
    pub attributes: u32,
    pub value: DiagValue,
}

/// Result of enumerating an object: regular plus engine-internal properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiagObject {
    pub properties: Vec<DiagProperty>,
    pub internals: Vec<DiagProperty>,
}

/// A parsed source unit as reported by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptInfo {
    pub script_id: String,
    pub url: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub execution_context_id: u32,
    pub hash: String,
    pub is_live_edit: bool,
    pub source_map_url: String,
    pub has_source_url: bool,
}

/// A stack frame view, valid only while the engine is paused.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameInfo {
    pub ordinal: u32,
    pub function_name: String,
    pub script_id: String,
    pub line: u32,
    pub column: u32,
    pub this: Option<DiagValue>,
}

/// The named scopes a paused frame exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Locals,
    Globals,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    In,
    Out,
    Over,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionBreakMode {
    None,
    FirstChance,
    Uncaught,
}

/// Where a breakpoint actually landed once the engine accepted it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub breakpoint_id: EngineBreakpointId,
    pub line: u32,
    pub column: u32,
}

/// Pending-exception metadata the engine records alongside a failed parse or
/// evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionMetadata {
    pub line: u32,
    pub column: u32,
    pub text: String,
    pub exception: DiagValue,
}

/// Payload of a break-class debug event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakInfo {
    pub script_id: String,
    pub line: u32,
    pub column: u32,
    pub breakpoint_id: Option<EngineBreakpointId>,
    pub exception: Option<DiagValue>,
}

/// A debug event, delivered on the engine thread.
#[derive(Clone, Debug)]
pub enum DebugEvent {
    SourceCompile(ScriptInfo),
    CompileError(ScriptInfo),
    Breakpoint(BreakInfo),
    StepComplete(BreakInfo),
    DebuggerStatement(BreakInfo),
    RuntimeException(BreakInfo),
    AsyncBreak(BreakInfo),
}

#[derive(Debug, Error)]
pub enum DiagError {
    /// Soft signal: the operation requires the engine to be paused. Callers
    /// on the stepping path ignore this and proceed to a continuation.
    #[error("engine is not paused at a break")]
    NotAtBreak,
    #[error("script threw during evaluation")]
    ScriptException(DiagValue),
    #[error("script failed to compile")]
    CompileError(ExceptionMetadata),
    #[error("invalid call frame ordinal {0}")]
    InvalidOrdinal(u32),
    #[error("invalid object handle {0}")]
    InvalidHandle(ObjectHandle),
    #[error("script not found: {0}")]
    ScriptNotFound(String),
    #[error("engine call failed with code {code}")]
    Engine { code: i32 },
    #[error("{0}")]
    Other(String),
}

pub type DiagResult<T> = Result<T, DiagError>;

/// Callback invoked by the engine for every debug event.
pub type DebugEventCallback = Box<dyn Fn(DebugEvent) + Send + Sync>;
/// Callback invoked when script code calls a `console` API method.
pub type ConsoleSink = Box<dyn Fn(&str, &[DiagValue]) + Send + Sync>;

/// Capability surface over the engine's diagnostic primitives.
///
/// All methods take `&self`: the engine handle is shared and internally
/// synchronized, like the runtime handles of the engines this models. Apart
/// from [`request_async_break`](Self::request_async_break), which any thread
/// may call, methods must run on the engine thread.
pub trait DiagEngine: Send + Sync + 'static {
    fn start_debugging(&self, callback: DebugEventCallback) -> DiagResult<()>;

    /// Idempotent; also safe while a debug callback is in flight.
    fn stop_debugging(&self) -> DiagResult<()>;

    /// Ask the engine to emit a break event at its next safe point.
    fn request_async_break(&self) -> DiagResult<()>;

    fn scripts(&self) -> DiagResult<Vec<ScriptInfo>>;
    fn script_source(&self, script_id: &str) -> DiagResult<String>;

    fn stack_trace(&self) -> DiagResult<Vec<FrameInfo>>;
    fn frame_scope(&self, ordinal: u32, scope: ScopeKind) -> DiagResult<DiagObject>;
    fn object_from_handle(&self, handle: ObjectHandle) -> DiagResult<DiagObject>;

    fn set_breakpoint(
        &self,
        script_id: &str,
        line: u32,
        column: u32,
    ) -> DiagResult<ResolvedLocation>;
    fn remove_breakpoint(&self, breakpoint_id: EngineBreakpointId) -> DiagResult<()>;

    fn set_step(&self, kind: StepKind) -> DiagResult<()>;

    fn break_on_exception(&self) -> DiagResult<ExceptionBreakMode>;
    fn set_break_on_exception(&self, mode: ExceptionBreakMode) -> DiagResult<()>;

    fn evaluate_at_frame(&self, expression: &str, ordinal: u32) -> DiagResult<DiagValue>;

    /// Run `source` as a top-level script and return its completion value.
    fn run_script(&self, source: &str, url: &str) -> DiagResult<DiagValue>;

    /// Compile `source` without running it.
    fn parse_script(&self, source: &str, url: &str) -> DiagResult<()>;

    /// Raw context activation. Use [`ContextScope`] instead of calling these
    /// directly.
    fn acquire_context(&self) -> DiagResult<()>;
    fn release_context(&self);

    /// Mint the engine-side `console` object; `sink` receives every console
    /// API call made by script code.
    fn create_console_object(&self, sink: ConsoleSink) -> DiagResult<ObjectHandle>;
}

/// Scoped context activation: entering activates an engine context, dropping
/// deactivates it. Entry points that call engine APIs from a debug callback
/// hold one of these for their duration.
pub struct ContextScope<'e, E: DiagEngine + ?Sized> {
    engine: &'e E,
}

impl<'e, E: DiagEngine + ?Sized> ContextScope<'e, E> {
    pub fn enter(engine: &'e E) -> DiagResult<Self> {
        engine.acquire_context()?;
        Ok(Self { engine })
    }
}

impl<E: DiagEngine + ?Sized> Drop for ContextScope<'_, E> {
    fn drop(&mut self) {
        self.engine.release_context();
    }
}
