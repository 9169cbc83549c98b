//! Debugger state machine and step control.
//!
//! The state graph is birth → initialized → running/stepping → terminated.
//! Step decisions compare the live stack depth against an anchor captured
//! when the step was requested; the comparison is `<=`, not `==`, so a
//! step-over across a tail call and a step-out across a multi-frame unwind
//! still land (the frame the anchor named may never be returned to exactly).

use lunar_vm::VmId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebuggerState {
    Birth,
    Initialized,
    Running,
    Stepping,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode {
    In,
    Over,
    Out,
}

/// Anchor level used by step-in: matches any depth.
const STEP_IN_LEVEL: i64 = -1000;

/// The mutable control state shared by the dispatcher and the hook driver.
#[derive(Debug)]
pub struct ControlState {
    state: DebuggerState,
    step: StepMode,
    anchor_level: i64,
    anchor_vm: Option<VmId>,
    stack_level: i64,
    pause_pending: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState {
            state: DebuggerState::Birth,
            step: StepMode::In,
            anchor_level: STEP_IN_LEVEL,
            anchor_vm: None,
            stack_level: 0,
            pause_pending: false,
        }
    }
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn is(&self, state: DebuggerState) -> bool {
        self.state == state
    }

    /// Write the state field. Returns false on a self-transition so callers
    /// can keep `set` idempotent with respect to side effects.
    pub fn set(&mut self, state: DebuggerState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    pub fn step_mode(&self) -> StepMode {
        self.step
    }

    /// Stack depth as observed through call/return hooks.
    pub fn depth(&self) -> i64 {
        self.stack_level
    }

    pub fn enter_call(&mut self) {
        self.stack_level += 1;
    }

    pub fn leave_call(&mut self) {
        self.stack_level -= 1;
    }

    /// Arm a step that stops at the very next line of any frame on any VM.
    pub fn step_in(&mut self) {
        self.state = DebuggerState::Stepping;
        self.step = StepMode::In;
        self.anchor_level = STEP_IN_LEVEL;
        self.anchor_vm = None;
    }

    /// Arm a step that stops at the next line at or above the current depth.
    pub fn step_over(&mut self, vm: VmId) {
        self.state = DebuggerState::Stepping;
        self.step = StepMode::Over;
        self.anchor_level = self.stack_level;
        self.anchor_vm = Some(vm);
    }

    /// Arm a step that stops once the current frame has returned.
    pub fn step_out(&mut self, vm: VmId) {
        self.state = DebuggerState::Stepping;
        self.step = StepMode::Out;
        self.anchor_level = self.stack_level - 1;
        self.anchor_vm = Some(vm);
    }

    /// Whether the current hook firing satisfies the armed step.
    pub fn check_step(&self, vm: VmId) -> bool {
        match self.step {
            StepMode::In => true,
            StepMode::Over | StepMode::Out => {
                self.anchor_vm == Some(vm) && self.stack_level <= self.anchor_level
            }
        }
    }

    /// `pause` is implemented as a step-in whose stop reports reason
    /// `"pause"` instead of `"step"`.
    pub fn request_pause(&mut self) {
        self.step_in();
        self.pause_pending = true;
    }

    /// Consume the pending-pause flag, if set.
    pub fn take_pause(&mut self) -> bool {
        std::mem::take(&mut self.pause_pending)
    }
}
