//! The protocol hub: command queue, startup state machine, nested-message-
//! loop pump, and the wire send path.
//!
//! Two threads matter. The engine thread owns script execution and is the
//! only place engine APIs are called; the transport thread delivers inbound
//! protocol messages. The two rendezvous through the command queue: the
//! transport enqueues and requests an async break, the engine thread drains
//! from inside its debug callback. While the engine is paused the drain loop
//! keeps running on the engine thread, blocking on a condition variable
//! until the client resumes execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use lantern_diag::{ContextScope, DiagEngine, DiagValue, ObjectHandle, StepKind};
use serde_json::{json, Value};

use crate::agents::console::ConsoleAgent;
use crate::agents::debugger::DebuggerAgent;
use crate::agents::runtime::RuntimeAgent;
use crate::agents::schema::SchemaAgent;
use crate::core::DebuggerCore;
use crate::dispatch;
use crate::error::{HubError, HubResult};

/// Outbound path: receives every serialized response and notification.
pub type SendCallback = Box<dyn Fn(&str) + Send + Sync>;
/// Fired on the submitting thread whenever the transport enqueues a command.
pub type CommandQueueCallback = Box<dyn Fn() + Send + Sync>;

const HOST_REQUEST_GO: &str = "Debugger.go";
const HOST_REQUEST_DEFERRED_GO: &str = "Debugger.deferredGo";
const HOST_REQUEST_STEP_INTO: &str = "Debugger.stepInto";
const HOST_REQUEST_CONSOLE_LOG: &str = "Console.log";

// Mutex poisoning cannot leave the queue state inconsistent (every critical
// section is a handful of field assignments), so recover the guard instead of
// failing the engine thread.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug)]
pub struct HubOptions {
    /// Inbound protocol messages larger than this are rejected before they
    /// reach the queue.
    pub max_message_bytes: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            max_message_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StartupState {
    Pause,
    Continue,
    Running,
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    MessageReceived(String),
    HostRequest(String),
}

struct QueueState {
    commands: Vec<Command>,
    send_callback: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    queue_callback: Option<Arc<dyn Fn() + Send + Sync>>,
    startup_state: StartupState,
    is_connected: bool,
}

/// The domain agents alive between `Connect` and `Disconnect`.
pub(crate) struct AgentSet<E: DiagEngine> {
    pub(crate) debugger: Arc<DebuggerAgent<E>>,
    pub(crate) runtime: Arc<RuntimeAgent<E>>,
    pub(crate) console: Arc<ConsoleAgent>,
    pub(crate) schema: Arc<SchemaAgent>,
}

impl<E: DiagEngine> Clone for AgentSet<E> {
    fn clone(&self) -> Self {
        Self {
            debugger: self.debugger.clone(),
            runtime: self.runtime.clone(),
            console: self.console.clone(),
            schema: self.schema.clone(),
        }
    }
}

/// Serialization sink for responses and notifications; implemented by the
/// hub, handed to agents as a non-owning channel.
pub(crate) trait FrontendSink: Send + Sync {
    fn send_message(&self, message: Value);
}

#[derive(Clone)]
pub(crate) struct FrontendChannel {
    sink: Weak<dyn FrontendSink>,
}

impl FrontendChannel {
    pub(crate) fn send_response(&self, call_id: i64, result: Value) {
        self.send(json!({ "id": call_id, "result": result }));
    }

    pub(crate) fn send_error(&self, call_id: Value, code: i64, message: &str) {
        self.send(json!({ "id": call_id, "error": { "code": code, "message": message } }));
    }

    pub(crate) fn send_notification(&self, method: &str, params: Value) {
        self.send(json!({ "method": method, "params": params }));
    }

    fn send(&self, message: Value) {
        if let Some(sink) = self.sink.upgrade() {
            sink.send_message(message);
        }
    }
}

pub(crate) struct Inner<E: DiagEngine> {
    pub(crate) engine: Arc<E>,
    pub(crate) core: DebuggerCore<E>,
    options: HubOptions,
    queue: Mutex<QueueState>,
    command_ready: Condvar,
    waiting_for_debugger: AtomicBool,
    deferred_go: AtomicBool,
    processing_command_queue: AtomicBool,
    session: Mutex<Option<AgentSet<E>>>,
    self_weak: Weak<Inner<E>>,
}

/// The adapter's embedder-facing handle.
///
/// Owns the engine binding for its lifetime: construction registers the
/// debug-event callback, drop unregisters it (safely racing any in-flight
/// callback, which holds only a weak reference).
pub struct Inspector<E: DiagEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: DiagEngine> Inspector<E> {
    pub fn new(engine: Arc<E>) -> HubResult<Self> {
        Self::with_options(engine, HubOptions::default())
    }

    pub fn with_options(engine: Arc<E>, options: HubOptions) -> HubResult<Self> {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<E>>| Inner {
            engine: engine.clone(),
            core: DebuggerCore::new(engine.clone(), weak.clone()),
            options,
            queue: Mutex::new(QueueState {
                commands: Vec::new(),
                send_callback: None,
                queue_callback: None,
                startup_state: StartupState::Running,
                is_connected: false,
            }),
            command_ready: Condvar::new(),
            waiting_for_debugger: AtomicBool::new(false),
            deferred_go: AtomicBool::new(false),
            processing_command_queue: AtomicBool::new(false),
            session: Mutex::new(None),
            self_weak: weak.clone(),
        });

        let weak = Arc::downgrade(&inner);
        engine.start_debugging(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.core.handle_debug_event(event);
            }
        }))?;

        Ok(Self { inner })
    }

    /// Attach a wire connection. Only one is allowed at a time.
    pub fn connect(&self, break_on_next_line: bool, callback: SendCallback) -> HubResult<()> {
        {
            let mut queue = lock(&self.inner.queue);
            if queue.send_callback.is_some() {
                return Err(HubError::AlreadyConnected);
            }
            queue.send_callback = Some(Arc::from(callback));
            queue.startup_state = if break_on_next_line {
                StartupState::Pause
            } else {
                StartupState::Continue
            };
            self.inner.enqueue(&mut queue, Command::Connect);
        }

        self.inner.engine.request_async_break()?;
        Ok(())
    }

    pub fn disconnect(&self) -> HubResult<()> {
        {
            let mut queue = lock(&self.inner.queue);
            if queue.send_callback.is_none() {
                return Err(HubError::NotConnected);
            }
            queue.send_callback = None;
            self.inner.enqueue(&mut queue, Command::Disconnect);
        }

        self.inner.engine.request_async_break()?;
        Ok(())
    }

    /// Submit one inbound protocol message. Callable from any thread.
    pub fn send_command(&self, command: &str) -> HubResult<()> {
        if command.is_empty() {
            return Err(HubError::CommandRequired);
        }
        if command.len() > self.inner.options.max_message_bytes {
            return Err(HubError::CommandTooLarge(self.inner.options.max_message_bytes));
        }

        let queue_callback = {
            let mut queue = lock(&self.inner.queue);
            if queue.send_callback.is_none() {
                return Err(HubError::NotConnected);
            }
            self.inner
                .enqueue(&mut queue, Command::MessageReceived(command.to_string()));
            queue.queue_callback.clone()
        };

        // Trigger a debugger break so the engine thread drains the queue.
        self.inner.engine.request_async_break()?;

        if let Some(callback) = queue_callback {
            (*callback)();
        }
        Ok(())
    }

    /// Submit an internal host-side control string. Unlike `send_command`
    /// this is an intra-process nudge and does not fire the queue callback.
    pub fn send_request(&self, request: &str) -> HubResult<()> {
        self.inner.send_request(request)
    }

    /// Block the engine thread until the client resumes execution. Must be
    /// called on the engine thread.
    pub fn wait_for_debugger(&self) {
        self.inner.wait_for_debugger();
    }

    /// Explicitly drain pending commands, for hosts whose event loop pumps
    /// the adapter. Must be called on the engine thread.
    pub fn process_command_queue(&self) {
        self.inner.process_command_queue();
    }

    pub fn set_command_queue_callback(&self, callback: Option<CommandQueueCallback>) {
        lock(&self.inner.queue).queue_callback = callback.map(Arc::from);
    }

    /// Mint an engine-side `console` object bound to this hub.
    pub fn create_console_object(&self) -> HubResult<ObjectHandle> {
        let weak = self.inner.self_weak.clone();
        let handle = self
            .inner
            .engine
            .create_console_object(Box::new(move |api, args| {
                if let Some(inner) = weak.upgrade() {
                    inner.console_api_called(api, args);
                }
            }))?;
        Ok(handle)
    }
}

impl<E: DiagEngine> Drop for Inspector<E> {
    fn drop(&mut self) {
        if let Err(err) = self.inner.engine.stop_debugging() {
            tracing::debug!("engine refused to stop debugging on teardown: {err}");
        }
    }
}

impl<E: DiagEngine> Inner<E> {
    fn enqueue(&self, queue: &mut QueueState, command: Command) {
        queue.commands.push(command);
        self.command_ready.notify_all();
    }

    pub(crate) fn send_request(&self, request: &str) -> HubResult<()> {
        {
            let mut queue = lock(&self.queue);
            self.enqueue(&mut queue, Command::HostRequest(request.to_string()));
        }

        // The host string never reaches the engine, but the request still has
        // to wake the engine thread so the queue drains promptly.
        self.engine.request_async_break()?;
        Ok(())
    }

    pub(crate) fn wait_for_debugger(&self) {
        self.waiting_for_debugger.store(true, Ordering::SeqCst);
        self.process_command_queue();
    }

    pub(crate) fn run_if_waiting_for_debugger(&self) {
        let startup = lock(&self.queue).startup_state;
        if startup == StartupState::Pause {
            if let Err(err) = self.core.pause_on_next_statement() {
                tracing::error!("failed to request startup pause: {err}");
            }
        }
        self.waiting_for_debugger.store(false, Ordering::SeqCst);
    }

    pub(crate) fn continue_run(&self) {
        self.waiting_for_debugger.store(false, Ordering::SeqCst);
        lock(&self.queue).startup_state = StartupState::Running;
    }

    pub(crate) fn process_deferred_go(&self) {
        if self.deferred_go.swap(false, Ordering::SeqCst) {
            if let Err(err) = self.send_request(HOST_REQUEST_GO) {
                tracing::error!("failed to queue deferred continuation: {err}");
            }
        }
    }

    /// The drain loop. Runs on the engine thread only; re-entry from a debug
    /// callback raised during command handling is a no-op.
    pub(crate) fn process_command_queue(&self) {
        if self.processing_command_queue.swap(true, Ordering::SeqCst) {
            return;
        }
        let _reentrancy = ClearOnDrop(&self.processing_command_queue);

        // Commands call into the engine; make sure a context is active for
        // the whole drain.
        let _scope = match ContextScope::enter(self.engine.as_ref()) {
            Ok(scope) => scope,
            Err(err) => {
                tracing::error!("failed to activate engine context: {err}");
                return;
            }
        };

        loop {
            let batch = {
                let mut queue = lock(&self.queue);
                if self.waiting_for_debugger.load(Ordering::SeqCst) && queue.commands.is_empty() {
                    queue = self
                        .command_ready
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                std::mem::take(&mut queue.commands)
            };

            let drained_any = !batch.is_empty();
            for command in batch {
                self.dispatch_command(command);
            }

            if !self.waiting_for_debugger.load(Ordering::SeqCst) && !drained_any {
                break;
            }
        }
    }

    fn dispatch_command(&self, command: Command) {
        match command {
            Command::Connect => self.handle_connect(),
            Command::Disconnect => self.handle_disconnect(),
            Command::MessageReceived(message) => self.handle_message(&message),
            Command::HostRequest(request) => self.handle_host_request(&request),
        }
    }

    fn handle_connect(&self) {
        if lock(&self.queue).is_connected {
            tracing::error!("connect command received while already connected");
            return;
        }

        let channel = self.channel();
        let agents = AgentSet {
            debugger: DebuggerAgent::new(
                self.engine.clone(),
                self.self_weak.clone(),
                channel.clone(),
            ),
            runtime: RuntimeAgent::new(
                self.engine.clone(),
                self.self_weak.clone(),
                channel.clone(),
            ),
            console: ConsoleAgent::new(),
            schema: SchemaAgent::new(),
        };
        *lock(&self.session) = Some(agents);

        if let Err(err) = self.core.pause_on_next_statement() {
            tracing::error!("failed to arrange break on connect: {err}");
        }

        lock(&self.queue).is_connected = true;
    }

    fn handle_disconnect(&self) {
        if !lock(&self.queue).is_connected {
            tracing::error!("disconnect command received while not connected");
            return;
        }

        let agents = lock(&self.session).take();
        if let Some(agents) = agents {
            agents.debugger.teardown();
            agents.runtime.teardown();
        }

        self.run_if_waiting_for_debugger();
        lock(&self.queue).is_connected = false;
    }

    fn handle_message(&self, raw: &str) {
        let agents = lock(&self.session).clone();
        let Some(agents) = agents else {
            tracing::debug!("dropping protocol message: no session");
            return;
        };
        dispatch::dispatch_message(&agents, &self.channel(), raw);
    }

    fn handle_host_request(&self, request: &str) {
        match request {
            HOST_REQUEST_GO => {
                self.core.clear_pause_on_next_statement();
                self.continue_run();
            }
            HOST_REQUEST_DEFERRED_GO => self.deferred_go.store(true, Ordering::SeqCst),
            HOST_REQUEST_STEP_INTO => {
                if let Err(err) = self.core.step(StepKind::In) {
                    tracing::error!("host step request failed: {err}");
                }
            }
            HOST_REQUEST_CONSOLE_LOG => {}
            other => tracing::debug!("ignoring unknown host request {other:?}"),
        }
    }

    pub(crate) fn channel(&self) -> FrontendChannel {
        let sink: Weak<dyn FrontendSink> = self.self_weak.clone();
        FrontendChannel { sink }
    }

    fn console_api_called(&self, api: &str, args: &[DiagValue]) {
        if !lock(&self.queue).is_connected {
            return;
        }
        let agents = lock(&self.session).clone();
        if let Some(agents) = agents {
            agents.runtime.console_api_called(api, args);
        }
    }
}

impl<E: DiagEngine> FrontendSink for Inner<E> {
    fn send_message(&self, message: Value) {
        let text = message.to_string();
        // Snapshot under the lock, invoke without it.
        let callback = lock(&self.queue).send_callback.clone();
        if let Some(callback) = callback {
            (*callback)(&text);
        }
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
