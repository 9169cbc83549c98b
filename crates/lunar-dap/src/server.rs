//! The debug adapter: request dispatch, session state, response/event
//! emission.
//!
//! One `DebugAdapter` owns the VM façade, the transport and every piece of
//! debugger state; the dispatcher and the hook driver both run on the VM
//! thread and never interleave, which is what makes the shared mutable
//! state safe.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use lunar_vm::{FrameInfo, LuaValue, LuaVm, VmId};

use crate::breakpoints::BreakpointIndex;
use crate::config::{AttachConfig, LaunchConfig};
use crate::dap::messages::{Event, Request, Response};
use crate::dap::types::{Breakpoint, EvaluateBody, Source, StackFrame, Thread};
use crate::eval::{self, EvalContext};
use crate::path::{classify, ChunkResolver, NullResolver, PathConvert, RawSource};
use crate::stack::StackBroker;
use crate::state::{ControlState, DebuggerState};
use crate::transport::Transport;
use crate::variables::{self, ChildRegistry, VarRef, HOST_FRAME_REFERENCE};
use crate::watch::WatchTable;

/// The VM is single-threaded; one fixed DAP thread id represents it.
pub(crate) const THREAD_ID: i64 = 1;

pub struct DebugAdapter<V: LuaVm> {
    pub(crate) vm: V,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) resolver: Box<dyn ChunkResolver>,
    pub(crate) control: ControlState,
    pub(crate) breakpoints: BreakpointIndex,
    pub(crate) paths: PathConvert,
    pub(crate) watch: WatchTable,
    pub(crate) children: ChildRegistry,
    pub(crate) stack: StackBroker,
    pub(crate) current_vm: VmId,
    pub(crate) should_exit: bool,
    next_seq: i64,
}

impl<V: LuaVm> DebugAdapter<V> {
    pub fn new(vm: V, transport: Box<dyn Transport>) -> Self {
        let current_vm = vm.main_vm();
        DebugAdapter {
            vm,
            transport,
            resolver: Box::new(NullResolver),
            control: ControlState::new(),
            breakpoints: BreakpointIndex::new(),
            paths: PathConvert::new(),
            watch: WatchTable::new(),
            children: ChildRegistry::new(),
            stack: StackBroker::new(),
            current_vm,
            should_exit: false,
            next_seq: 1,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ChunkResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn state(&self) -> DebuggerState {
        self.control.state()
    }

    /// Serve requests until the client disconnects or the stream ends.
    ///
    /// Blocking while the debuggee is stopped happens inside the hook
    /// driver, not here; by the time control returns to this loop the VM is
    /// not running.
    pub fn run(&mut self) -> anyhow::Result<()> {
        while !self.should_exit {
            let Some(request) = self.transport.recv()? else {
                break;
            };
            self.dispatch(&request);
        }
        Ok(())
    }

    /// Route one request. Returns true when the handler resumed the
    /// debuggee (the hook driver's stopped-loop exits on it).
    pub fn dispatch(&mut self, request: &Request) -> bool {
        if request.message_type != "request" {
            return false;
        }
        tracing::debug!(target: "lunar.dap", command = %request.command, seq = request.seq, "request");

        match catch_unwind(AssertUnwindSafe(|| self.handle_request(request))) {
            Ok(resume) => resume,
            Err(_) => {
                tracing::error!(
                    target: "lunar.dap",
                    command = %request.command,
                    "panic in request handler; continuing in safe mode"
                );
                self.respond_error(
                    request,
                    "Internal error (panic). The adapter will continue in safe-mode.",
                );
                false
            }
        }
    }

    fn handle_request(&mut self, request: &Request) -> bool {
        match request.command.as_str() {
            "initialize" => self.on_initialize(request),
            "launch" => self.on_launch(request),
            "attach" => self.on_attach(request),
            "configurationDone" => self.on_configuration_done(request),
            "setBreakpoints" => self.on_set_breakpoints(request),
            "threads" => self.on_threads(request),
            "stackTrace" => self.on_stack_trace(request),
            "source" => self.on_source(request),
            "scopes" => self.on_scopes(request),
            "variables" => self.on_variables(request),
            "setVariable" => self.on_set_variable(request),
            "evaluate" => self.on_evaluate(request),
            "continue" => self.on_continue(request),
            "next" => self.on_next(request),
            "stepIn" => self.on_step_in(request),
            "stepOut" => self.on_step_out(request),
            "pause" => self.on_pause(request),
            "disconnect" => self.on_disconnect(request),
            _ => {
                self.respond_error(request, format!("Unknown command: {}", request.command));
                false
            }
        }
    }

    // ----- lifecycle -----

    fn on_initialize(&mut self, request: &Request) -> bool {
        if !self.control.is(DebuggerState::Birth) {
            self.respond_error(request, "already initialized");
            return false;
        }
        self.respond_success(request, Some(capabilities()));
        self.set_state(DebuggerState::Initialized);
        false
    }

    fn on_launch(&mut self, request: &Request) -> bool {
        if !self.control.is(DebuggerState::Initialized) {
            self.respond_error(request, "not initialized or unexpected state");
            return false;
        }
        let args: LaunchConfig = match parse_args(request) {
            Ok(args) => args,
            Err(_) => {
                self.respond_error(request, "Launch failed");
                return false;
            }
        };

        if let Some(cwd) = &args.cwd {
            self.paths.set_workdir(cwd);
        }
        // `path` and `cpath` are independent overrides of the VM's package
        // search paths.
        if let Some(path) = &args.path {
            self.vm.set_package_path(&path.to_lowercase());
        }
        if let Some(cpath) = &args.cpath {
            self.vm.set_package_cpath(&cpath.to_lowercase());
        }

        let program = self.paths.display_path(&self.paths.client_key(&args.program));
        if let Err(err) = self.vm.load_file(&program) {
            self.output(
                "console",
                format!("Failed to launch {} due to error: {}\n", program.display(), err),
            );
            self.respond_error(request, "Launch failed");
            return false;
        }

        self.respond_success(request, None);
        self.emit_event("thread", Some(json!({ "reason": "started", "threadId": THREAD_ID })));
        if args.stop_on_entry {
            self.set_state(DebuggerState::Stepping);
            self.emit_stopped("entry");
        } else {
            self.set_state(DebuggerState::Running);
        }

        self.run_debuggee();
        false
    }

    fn on_attach(&mut self, request: &Request) -> bool {
        if !self.control.is(DebuggerState::Initialized) {
            self.respond_error(request, "not initialized or unexpected state");
            return false;
        }
        let args: AttachConfig = match parse_args(request) {
            Ok(args) => args,
            Err(_) => {
                self.respond_error(request, "Launch failed");
                return false;
            }
        };

        if let Some(cwd) = &args.cwd {
            self.paths.set_workdir(cwd);
        }

        self.respond_success(request, None);
        self.emit_event("thread", Some(json!({ "reason": "started", "threadId": THREAD_ID })));
        if args.stop_on_entry {
            self.set_state(DebuggerState::Stepping);
            self.emit_stopped("entry");
        } else {
            self.set_state(DebuggerState::Running);
        }

        self.run_debuggee();
        false
    }

    fn on_configuration_done(&mut self, request: &Request) -> bool {
        if self.control.is(DebuggerState::Birth) {
            self.respond_error(request, "not initialized or unexpected state");
            return false;
        }
        self.respond_success(request, None);
        false
    }

    fn on_disconnect(&mut self, request: &Request) -> bool {
        self.respond_success(request, None);
        self.set_state(DebuggerState::Terminated);
        self.should_exit = true;
        true
    }

    // ----- breakpoints -----

    fn on_set_breakpoints(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SourceArg {
            #[serde(default)]
            path: Option<String>,
        }

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SourceBreakpoint {
            line: u32,
            #[serde(default)]
            condition: Option<String>,
        }

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            source: SourceArg,
            #[serde(default)]
            breakpoints: Vec<SourceBreakpoint>,
        }

        if self.control.is(DebuggerState::Birth) {
            self.respond_error(request, "not initialized or unexpected state");
            return false;
        }
        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        let Some(path) = args.source.path else {
            self.respond_success(request, Some(json!({ "breakpoints": [] })));
            return false;
        };

        // Replace semantics: a setBreakpoints call owns its source outright.
        let key = self.paths.client_key(&path);
        self.breakpoints.clear(&key);

        let mut verified = Vec::with_capacity(args.breakpoints.len());
        for breakpoint in &args.breakpoints {
            self.breakpoints
                .insert(key.clone(), breakpoint.line, breakpoint.condition.clone());
            verified.push(Breakpoint {
                verified: true,
                line: breakpoint.line,
                source: Some(Source {
                    name: None,
                    path: Some(path.clone()),
                    source_reference: None,
                }),
            });
        }

        self.respond_success(request, body(json!({ "breakpoints": verified })));
        false
    }

    // ----- inspection -----

    fn on_threads(&mut self, request: &Request) -> bool {
        if !self.control.is(DebuggerState::Stepping) {
            self.respond_error(request, "not initialized or unexpected state");
            return false;
        }
        let threads = vec![Thread { id: THREAD_ID, name: "Main Thread".to_string() }];
        self.respond_success(request, body(json!({ "threads": threads })));
        false
    }

    fn on_stack_trace(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            #[serde(default)]
            levels: Option<i64>,
        }

        if !self.control.is(DebuggerState::Stepping) {
            self.respond_error(request, "Error retrieving stack frame");
            return false;
        }
        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        self.paths.begin_render();
        self.stack.begin_render();

        let levels = args.levels.filter(|&l| l > 0).map(|l| l as u32).unwrap_or(u32::MAX);
        let mut frames = Vec::new();
        let mut depth: u32 = 0;
        while depth < levels {
            let Some(info) = self.vm.stack_frame(depth) else {
                break;
            };
            let source = self.frame_source(depth, &info);
            frames.push(StackFrame {
                id: depth as i64,
                name: info.name.clone().unwrap_or_else(|| "?".to_string()),
                source,
                line: info.line.max(0) as i64,
                column: 1,
            });
            depth += 1;
        }

        let total = frames.len();
        self.respond_success(
            request,
            body(json!({ "stackFrames": frames, "totalFrames": total })),
        );
        false
    }

    fn frame_source(&mut self, depth: u32, info: &FrameInfo) -> Option<Source> {
        match classify(&info.source) {
            RawSource::File(path) => {
                let key = self.paths.vm_file_key(path);
                Some(self.display_source(&key))
            }
            RawSource::Native => Some(Source {
                name: Some("<C function>".to_string()),
                path: None,
                source_reference: Some(HOST_FRAME_REFERENCE),
            }),
            RawSource::Chunk(name) => {
                let key = self.paths.resolve_chunk(name, self.resolver.as_mut())?;
                Some(self.display_source(&key))
            }
            RawSource::Anonymous(_) => {
                let reference = self.stack.record(depth, info.source_id);
                Some(Source { name: None, path: None, source_reference: Some(reference) })
            }
        }
    }

    fn display_source(&self, key: &std::path::Path) -> Source {
        let display = self.paths.display_path(key);
        Source {
            name: display
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            path: Some(display.to_string_lossy().into_owned()),
            source_reference: Some(0),
        }
    }

    fn on_source(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            source_reference: i64,
        }

        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        let content = self
            .stack
            .depth_for(args.source_reference)
            .and_then(|depth| self.vm.stack_frame(depth))
            .and_then(|info| match classify(&info.source) {
                RawSource::Anonymous(text) => Some(text.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "Source not available".to_string());

        self.respond_success(request, Some(json!({ "content": content })));
        false
    }

    fn on_scopes(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            frame_id: i64,
        }

        if !self.control.is(DebuggerState::Stepping) {
            self.respond_error(request, "Error retrieving stack frame");
            return false;
        }
        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        let scopes = u32::try_from(args.frame_id)
            .ok()
            .and_then(|depth| variables::scopes(&mut self.vm, depth).ok());
        match scopes {
            Some(scopes) => {
                self.respond_success(request, body(json!({ "scopes": scopes })));
            }
            None => self.respond_error(request, "Error retrieving stack frame"),
        }
        false
    }

    fn on_variables(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            variables_reference: i64,
        }

        if !self.control.is(DebuggerState::Stepping) {
            self.respond_error(request, "Error retrieving variables");
            return false;
        }
        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        let vars = VarRef::decode(args.variables_reference).and_then(|varref| {
            variables::variables(&mut self.vm, &self.watch, &mut self.children, varref).ok()
        });
        match vars {
            Some(vars) => {
                self.respond_success(request, body(json!({ "variables": vars })));
            }
            None => self.respond_error(request, "Error retrieving variables"),
        }
        false
    }

    fn on_set_variable(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            variables_reference: i64,
            name: String,
            value: String,
        }

        if !self.control.is(DebuggerState::Stepping) {
            self.respond_error(request, "Failed set variable");
            return false;
        }
        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        let Some(varref) = VarRef::decode(args.variables_reference) else {
            self.respond_error(request, "Failed set variable");
            return false;
        };

        // The new value is parsed by the VM in the frame's environment.
        let parsed = self
            .vm
            .eval_in_frame(varref.depth as u32, &format!("return {}", args.value));
        let value = match parsed {
            Ok(mut values) if !values.is_empty() => values.remove(0),
            Ok(_) => LuaValue::Nil,
            Err(_) => {
                self.respond_error(request, "Failed set variable");
                return false;
            }
        };

        match variables::set_variable(
            &mut self.vm,
            &self.watch,
            &self.children,
            varref,
            &args.name,
            value,
        ) {
            Ok(stored) => {
                let rendered = variables::render_value(&mut self.vm, &stored);
                self.respond_success(request, Some(json!({ "value": rendered })));
            }
            Err(_) => self.respond_error(request, "Failed set variable"),
        }
        false
    }

    fn on_evaluate(&mut self, request: &Request) -> bool {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            expression: String,
            #[serde(default)]
            frame_id: Option<i64>,
            #[serde(default)]
            context: Option<String>,
        }

        if !self.control.is(DebuggerState::Stepping) {
            self.respond_error(request, "Error retrieving stack frame");
            return false;
        }
        let args: Args = match parse_args(request) {
            Ok(args) => args,
            Err(message) => {
                self.respond_error(request, message);
                return false;
            }
        };

        let depth = match u32::try_from(args.frame_id.unwrap_or(0)) {
            Ok(depth) => depth,
            Err(_) => {
                self.respond_error(request, "Error retrieving stack frame");
                return false;
            }
        };
        if self.vm.stack_frame(depth).is_none() {
            self.respond_error(request, "Error retrieving stack frame");
            return false;
        }

        let context = EvalContext::from_dap_context(args.context.as_deref());
        match eval::evaluate(&mut self.vm, &mut self.watch, depth, &args.expression, context) {
            Ok(evaluation) => {
                let body_value = EvaluateBody {
                    result: evaluation.result,
                    variables_reference: evaluation.reference,
                };
                self.respond_success(request, body(serde_json::to_value(body_value).unwrap_or(Value::Null)));
            }
            Err(message) => self.respond_error(request, message),
        }
        false
    }

    // ----- execution control -----

    fn on_continue(&mut self, request: &Request) -> bool {
        self.respond_success(request, Some(json!({ "allThreadsContinued": true })));
        self.clear_value_handles();
        self.set_state(DebuggerState::Running);
        true
    }

    fn on_next(&mut self, request: &Request) -> bool {
        self.respond_success(request, None);
        self.clear_value_handles();
        self.control.step_over(self.current_vm);
        true
    }

    fn on_step_in(&mut self, request: &Request) -> bool {
        self.respond_success(request, None);
        self.clear_value_handles();
        self.control.step_in();
        true
    }

    fn on_step_out(&mut self, request: &Request) -> bool {
        self.respond_success(request, None);
        self.clear_value_handles();
        self.control.step_out(self.current_vm);
        true
    }

    fn on_pause(&mut self, request: &Request) -> bool {
        self.respond_success(request, None);
        self.clear_value_handles();
        self.control.request_pause();
        true
    }

    /// Encoded watch and child references must not survive a resume; the
    /// values they reach would be stale once the VM has run.
    fn clear_value_handles(&mut self) {
        self.watch.clear(&mut self.vm);
        self.children.clear();
    }

    // ----- emission -----

    pub(crate) fn set_state(&mut self, state: DebuggerState) {
        if !self.control.set(state) {
            return;
        }
        match state {
            DebuggerState::Initialized => {
                self.emit_event("initialized", None);
                self.transport.open();
                self.output("console", "Debugger initialized\n");
            }
            DebuggerState::Terminated => {
                self.emit_event("terminated", None);
                self.transport.close();
            }
            _ => {}
        }
    }

    fn alloc_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }

    fn respond_success(&mut self, request: &Request, body: Option<Value>) {
        let response = Response::success(self.alloc_seq(), request, body);
        self.send_message(&response);
    }

    fn respond_error(&mut self, request: &Request, message: impl Into<String>) {
        let response = Response::error(self.alloc_seq(), request, message);
        self.send_message(&response);
    }

    pub(crate) fn emit_event(&mut self, name: &str, body: Option<Value>) {
        let event = Event::new(self.alloc_seq(), name, body);
        self.send_message(&event);
    }

    pub(crate) fn emit_stopped(&mut self, reason: &str) {
        self.emit_event(
            "stopped",
            Some(json!({
                "reason": reason,
                "threadId": THREAD_ID,
                "allThreadsStopped": true,
            })),
        );
    }

    pub(crate) fn output(&mut self, category: &str, text: impl Into<String>) {
        self.emit_event(
            "output",
            Some(json!({ "category": category, "output": text.into() })),
        );
    }

    fn send_message<T: Serialize>(&mut self, message: &T) {
        match serde_json::to_value(message) {
            Ok(value) => {
                if let Err(err) = self.transport.send(&value) {
                    tracing::warn!(target: "lunar.dap", "failed to write message: {err}");
                }
            }
            Err(err) => {
                tracing::error!(target: "lunar.dap", "failed to serialize message: {err}");
            }
        }
    }
}

fn body(value: Value) -> Option<Value> {
    Some(value)
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsConditionalBreakpoints": true,
        "supportsHitConditionalBreakpoints": false,
        "supportsLogPoints": false,
        "supportsSetVariable": true,
        "supportsEvaluateForHovers": true,
        "supportsStepBack": false,
        "supportsRestartRequest": false,
        "supportsTerminateRequest": false,
    })
}

fn parse_args<T: DeserializeOwned>(request: &Request) -> Result<T, String> {
    let value = request.arguments.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(value).map_err(|err| crate::dap::codec::redact_json_error(&err.to_string()))
}
