use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("vm: {0}")]
    Vm(#[from] lunar_vm::VmError),
    #[error("no stack frame at depth {0}")]
    MissingFrame(u32),
    #[error("unknown variablesReference {0}")]
    UnknownVariablesReference(i64),
    #[error("variable `{0}` is not writable")]
    NotWritable(String),
}
