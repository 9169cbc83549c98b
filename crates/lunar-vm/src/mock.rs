use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::{
    EvalError, FrameInfo, FunctionId, HookEvent, LuaValue, RunEvent, TableId, VmError, VmId,
};

/// One frame of a scripted stack snapshot, topmost first.
#[derive(Clone, Debug)]
pub struct MockFrame {
    pub info: FrameInfo,
    pub locals: Vec<(String, LuaValue)>,
    pub varargs: Vec<LuaValue>,
    pub upvalues: Vec<(String, LuaValue)>,
}

impl MockFrame {
    pub fn new(source: impl Into<String>, source_id: u64, line: i32) -> Self {
        MockFrame {
            info: FrameInfo {
                source: source.into(),
                source_id,
                line,
                name: Some("main".to_string()),
                is_vararg: false,
                upvalue_count: 0,
            },
            locals: Vec::new(),
            varargs: Vec::new(),
            upvalues: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.info.name = Some(name.into());
        self
    }

    pub fn variadic(mut self) -> Self {
        self.info.is_vararg = true;
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: LuaValue) -> Self {
        self.locals.push((name.into(), value));
        self
    }

    pub fn with_vararg(mut self, value: LuaValue) -> Self {
        self.varargs.push(value);
        self
    }

    pub fn with_upvalue(mut self, name: impl Into<String>, value: LuaValue) -> Self {
        self.upvalues.push((name.into(), value));
        self.info.upvalue_count = self.upvalues.len() as u32;
        self
    }
}

struct MockStep {
    event: RunEvent,
    frames: Option<Vec<MockFrame>>,
}

/// Deterministic, in-memory VM test double.
///
/// Execution is scripted as a queue of `(event, optional stack snapshot)`
/// steps; each [`resume`](crate::LuaVm::resume) pops one step and, when a
/// snapshot is attached, replaces the visible stack with it. Evaluation
/// results are queued per `(depth, chunk)` key.
#[derive(Default)]
pub struct MockVm {
    steps: VecDeque<MockStep>,
    frames: Vec<MockFrame>,
    globals: Vec<(String, LuaValue)>,
    tables: HashMap<TableId, Vec<(LuaValue, LuaValue)>>,
    functions: HashMap<FunctionId, Vec<(String, LuaValue)>>,
    evaluations: HashMap<(u32, String), VecDeque<Result<Vec<LuaValue>, EvalError>>>,
    load_error: Option<String>,
    pub loaded: Vec<PathBuf>,
    pub package_path: Option<String>,
    pub package_cpath: Option<String>,
    pub retained: Vec<LuaValue>,
    pub release_calls: usize,
}

/// Identity the mock reports for its main state.
pub const MOCK_MAIN_VM: VmId = 1;

impl MockVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_call(&mut self) {
        self.push_call_on(MOCK_MAIN_VM);
    }

    pub fn push_call_on(&mut self, vm: VmId) {
        self.push_step(RunEvent::Hook(HookEvent::Call { vm }));
    }

    pub fn push_return(&mut self) {
        self.push_return_on(MOCK_MAIN_VM);
    }

    pub fn push_return_on(&mut self, vm: VmId) {
        self.push_step(RunEvent::Hook(HookEvent::Return { vm }));
    }

    pub fn push_line(&mut self, line: i32, frames: Vec<MockFrame>) {
        self.push_line_on(MOCK_MAIN_VM, line, frames);
    }

    pub fn push_line_on(&mut self, vm: VmId, line: i32, frames: Vec<MockFrame>) {
        self.steps.push_back(MockStep {
            event: RunEvent::Hook(HookEvent::Line { vm, line }),
            frames: Some(frames),
        });
    }

    pub fn push_finished(&mut self) {
        self.push_step(RunEvent::Finished);
    }

    pub fn push_faulted(&mut self, message: impl Into<String>) {
        self.push_step(RunEvent::Faulted(message.into()));
    }

    fn push_step(&mut self, event: RunEvent) {
        self.steps.push_back(MockStep { event, frames: None });
    }

    pub fn set_frames(&mut self, frames: Vec<MockFrame>) {
        self.frames = frames;
    }

    pub fn set_globals(&mut self, globals: Vec<(String, LuaValue)>) {
        self.globals = globals;
    }

    pub fn insert_table(&mut self, id: TableId, entries: Vec<(LuaValue, LuaValue)>) {
        self.tables.insert(id, entries);
    }

    pub fn insert_function(&mut self, id: FunctionId, upvalues: Vec<(String, LuaValue)>) {
        self.functions.insert(id, upvalues);
    }

    pub fn set_evaluation(
        &mut self,
        depth: u32,
        chunk: impl Into<String>,
        result: Result<Vec<LuaValue>, EvalError>,
    ) {
        self.evaluations
            .entry((depth, chunk.into()))
            .or_default()
            .push_back(result);
    }

    pub fn fail_next_load(&mut self, message: impl Into<String>) {
        self.load_error = Some(message.into());
    }

    pub fn table(&self, id: TableId) -> Option<&Vec<(LuaValue, LuaValue)>> {
        self.tables.get(&id)
    }
}

impl crate::LuaVm for MockVm {
    fn main_vm(&self) -> VmId {
        MOCK_MAIN_VM
    }

    fn load_file(&mut self, path: &Path) -> Result<(), VmError> {
        if let Some(message) = self.load_error.take() {
            return Err(VmError::Load(message));
        }
        self.loaded.push(path.to_path_buf());
        Ok(())
    }

    fn resume(&mut self) -> RunEvent {
        match self.steps.pop_front() {
            Some(step) => {
                if let Some(frames) = step.frames {
                    self.frames = frames;
                }
                step.event
            }
            None => RunEvent::Finished,
        }
    }

    fn set_package_path(&mut self, path: &str) {
        self.package_path = Some(path.to_string());
    }

    fn set_package_cpath(&mut self, path: &str) {
        self.package_cpath = Some(path.to_string());
    }

    fn stack_frame(&mut self, depth: u32) -> Option<FrameInfo> {
        self.frames.get(depth as usize).map(|f| f.info.clone())
    }

    fn local_var(&mut self, depth: u32, index: i32) -> Option<(String, LuaValue)> {
        let frame = self.frames.get(depth as usize)?;
        if index > 0 {
            frame.locals.get(index as usize - 1).cloned()
        } else if index < 0 {
            let value = frame.varargs.get((-index) as usize - 1)?.clone();
            Some(("(*vararg)".to_string(), value))
        } else {
            None
        }
    }

    fn set_local_var(&mut self, depth: u32, index: i32, value: LuaValue) -> Result<(), VmError> {
        let frame = self
            .frames
            .get_mut(depth as usize)
            .ok_or(VmError::InvalidFrame(depth))?;
        let slot = if index > 0 {
            frame.locals.get_mut(index as usize - 1).map(|(_, v)| v)
        } else if index < 0 {
            frame.varargs.get_mut((-index) as usize - 1)
        } else {
            None
        };
        match slot {
            Some(v) => {
                *v = value;
                Ok(())
            }
            None => Err(VmError::UnknownVariable(format!("local #{index}"))),
        }
    }

    fn upvalue(&mut self, depth: u32, index: u32) -> Option<(String, LuaValue)> {
        let frame = self.frames.get(depth as usize)?;
        frame.upvalues.get(index as usize - 1).cloned()
    }

    fn set_upvalue(&mut self, depth: u32, index: u32, value: LuaValue) -> Result<(), VmError> {
        let frame = self
            .frames
            .get_mut(depth as usize)
            .ok_or(VmError::InvalidFrame(depth))?;
        match frame.upvalues.get_mut(index as usize - 1) {
            Some((_, v)) => {
                *v = value;
                Ok(())
            }
            None => Err(VmError::UnknownVariable(format!("upvalue #{index}"))),
        }
    }

    fn global_entries(&mut self) -> Vec<(String, LuaValue)> {
        self.globals.clone()
    }

    fn set_global(&mut self, name: &str, value: LuaValue) -> Result<(), VmError> {
        match self.globals.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.globals.push((name.to_string(), value)),
        }
        Ok(())
    }

    fn table_entries(&mut self, table: TableId) -> Vec<(LuaValue, LuaValue)> {
        self.tables.get(&table).cloned().unwrap_or_default()
    }

    fn table_set(
        &mut self,
        table: TableId,
        key: &LuaValue,
        value: LuaValue,
    ) -> Result<(), VmError> {
        let entries = self
            .tables
            .get_mut(&table)
            .ok_or_else(|| VmError::Other(format!("no mock table {table}")))?;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => entries.push((key.clone(), value)),
        }
        Ok(())
    }

    fn function_upvalues(&mut self, function: FunctionId) -> Vec<(String, LuaValue)> {
        self.functions.get(&function).cloned().unwrap_or_default()
    }

    fn eval_in_frame(&mut self, depth: u32, chunk: &str) -> Result<Vec<LuaValue>, EvalError> {
        let key = (depth, chunk.to_string());
        match self.evaluations.get_mut(&key).and_then(|q| q.pop_front()) {
            Some(result) => result,
            None => Err(EvalError::Runtime(format!(
                "no mock evaluation result queued for `{chunk}` at depth {depth}"
            ))),
        }
    }

    fn tostring(&mut self, value: &LuaValue) -> String {
        match value {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => n.to_string(),
            LuaValue::String(s) => s.clone(),
            LuaValue::Table(id) => format!("table: 0x{id:08x}"),
            LuaValue::Function { id, .. } => format!("function: 0x{id:08x}"),
            LuaValue::Userdata(id) => format!("userdata: 0x{id:08x}"),
            LuaValue::Thread(id) => format!("thread: 0x{id:08x}"),
        }
    }

    fn retain(&mut self, value: &LuaValue) {
        self.retained.push(value.clone());
    }

    fn release_retained(&mut self) {
        self.retained.clear();
        self.release_calls += 1;
    }
}
