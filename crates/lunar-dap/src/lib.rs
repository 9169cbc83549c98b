//! Debug Adapter Protocol core for embedded Lua VMs.
//!
//! This crate is the request-dispatch and runtime-control core of a
//! source-level Lua debugger: it owns the debugger state machine, step
//! control, breakpoint bookkeeping, variable-reference handles and the
//! request/response pump, and talks to the VM through the `lunar-vm` façade.
//!
//! The crate is a library; the product is embedded into a host process that
//! owns the Lua state. The host wires a [`transport::Transport`] (stdio or a
//! framed socket) and a [`lunar_vm::LuaVm`] implementation into a
//! [`DebugAdapter`] and calls [`DebugAdapter::run`] on the VM thread.

pub mod breakpoints;
pub mod config;
pub mod dap;
pub mod error;
pub mod eval;
pub mod hardening;
mod hook;
pub mod path;
pub mod server;
pub mod stack;
pub mod state;
pub mod transport;
pub mod variables;
pub mod watch;

pub use crate::config::LaunchConfig;
pub use crate::error::{DebugError, DebugResult};
pub use crate::eval::EvalContext;
pub use crate::path::{ChunkResolution, ChunkResolver, NullResolver};
pub use crate::server::DebugAdapter;
pub use crate::state::{DebuggerState, StepMode};
pub use crate::variables::{VarRef, VarScope};
