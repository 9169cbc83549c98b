//! The hook driver: per-line break decisions and the cooperative pump.
//!
//! The VM invokes a hook on every executed line plus call/return for depth
//! tracking. The line decision is ordered for the hot path: the step check
//! is two integer compares, the breakpoint check starts with the lineset
//! reject test, and only a hit resolves the frame's source string.
//!
//! While stopped, the driver pumps the transport synchronously and returns
//! to the VM only when a handler resumes execution. Modeling the stop as an
//! ordinary loop keeps the debuggee's stack observable and avoids a second
//! scheduler.

use std::path::PathBuf;

use lunar_vm::{HookEvent, LuaVm, RunEvent, VmId};

use crate::path::{classify, RawSource};
use crate::server::DebugAdapter;
use crate::state::DebuggerState;

impl<V: LuaVm> DebugAdapter<V> {
    /// Drive the debuggee until it finishes, handling hooks as they fire.
    ///
    /// Entered by launch/attach after their response; when stop-on-entry
    /// left the state at `stepping`, the debuggee is held before its first
    /// instruction until a resume-class request arrives.
    pub(crate) fn run_debuggee(&mut self) {
        if self.control.is(DebuggerState::Stepping) {
            self.pump_paused();
        }

        loop {
            let event = self.vm.resume();
            if self.control.is(DebuggerState::Terminated) {
                // Detached: the VM runs to completion unobserved.
                match event {
                    RunEvent::Hook(_) => continue,
                    RunEvent::Finished | RunEvent::Faulted(_) => break,
                }
            }
            match event {
                RunEvent::Hook(hook) => self.on_hook(hook),
                RunEvent::Finished => break,
                RunEvent::Faulted(message) => {
                    self.output(
                        "console",
                        format!("Program terminated with error: {message}\n"),
                    );
                    break;
                }
            }
        }

        self.set_state(DebuggerState::Terminated);
    }

    pub(crate) fn on_hook(&mut self, event: HookEvent) {
        self.current_vm = event.vm();

        // Requests that arrived while the debuggee was running (pause,
        // setBreakpoints, disconnect) are consumed at hook boundaries.
        self.poll_requests();
        if self.control.is(DebuggerState::Terminated) {
            return;
        }

        match event {
            HookEvent::Call { .. } => self.control.enter_call(),
            HookEvent::Return { .. } => self.control.leave_call(),
            HookEvent::Line { vm, line } => self.on_line(vm, line),
        }
    }

    fn on_line(&mut self, vm: VmId, line: i32) {
        if line <= 0 {
            return;
        }
        let line = line as u32;

        if self.control.is(DebuggerState::Stepping) && self.control.check_step(vm) {
            let reason = if self.control.take_pause() { "pause" } else { "step" };
            self.break_here(reason);
            return;
        }

        if !self.breakpoints.has(line) {
            return;
        }
        let Some(key) = self.frame_breakpoint_key() else {
            return;
        };
        if self.breakpoints.fires(&mut self.vm, &key, line, 0) {
            self.break_here("breakpoint");
        }
    }

    /// Canonical breakpoint key of the topmost frame's source, if it can
    /// carry breakpoints at all.
    fn frame_breakpoint_key(&mut self) -> Option<PathBuf> {
        let info = self.vm.stack_frame(0)?;
        match classify(&info.source) {
            RawSource::File(path) => Some(self.paths.vm_file_key(path)),
            RawSource::Chunk(name) => self.paths.resolve_chunk(name, self.resolver.as_mut()),
            RawSource::Native | RawSource::Anonymous(_) => None,
        }
    }

    /// Stop here: re-anchor as a completed step-in, announce the stop, and
    /// hold the VM until a handler resumes.
    fn break_here(&mut self, reason: &str) {
        self.control.step_in();
        tracing::debug!(target: "lunar.dap", reason, depth = self.control.depth(), "stopped");
        self.emit_stopped(reason);
        self.pump_paused();
    }

    /// Blocking request pump while stopped. Returns true when a handler
    /// resumed execution; end of stream detaches the debugger.
    pub(crate) fn pump_paused(&mut self) -> bool {
        loop {
            match self.transport.recv() {
                Ok(Some(request)) => {
                    if self.dispatch(&request) {
                        return true;
                    }
                }
                Ok(None) => {
                    tracing::debug!(target: "lunar.dap", "client closed the stream while stopped; detaching");
                    self.set_state(DebuggerState::Terminated);
                    self.should_exit = true;
                    return false;
                }
                Err(err) => {
                    tracing::error!(target: "lunar.dap", "transport error while stopped: {err}");
                    self.set_state(DebuggerState::Terminated);
                    self.should_exit = true;
                    return false;
                }
            }
        }
    }

    /// Non-blocking drain of pending requests (running state).
    fn poll_requests(&mut self) {
        while let Ok(Some(request)) = self.transport.try_recv() {
            self.dispatch(&request);
            if self.control.is(DebuggerState::Terminated) {
                break;
            }
        }
    }
}
