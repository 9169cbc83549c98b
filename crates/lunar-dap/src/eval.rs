//! Expression evaluation in a stopped frame.

use lunar_vm::{EvalError, LuaValue, LuaVm};

use crate::variables::{render_value, VarRef};
use crate::watch::WatchTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalContext {
    Watch,
    Hover,
    Repl,
    Other,
}

impl EvalContext {
    pub fn from_dap_context(context: Option<&str>) -> Self {
        let Some(context) = context else {
            return Self::Other;
        };
        if context.eq_ignore_ascii_case("watch") {
            Self::Watch
        } else if context.eq_ignore_ascii_case("hover") {
            Self::Hover
        } else if context.eq_ignore_ascii_case("repl") {
            Self::Repl
        } else {
            Self::Other
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub result: String,
    pub reference: i64,
}

/// Evaluate `expression` in the frame at `depth`.
///
/// The expression is first compiled with a `return ` prefix so plain
/// expressions yield their values. If that form fails to compile and the
/// context is `repl`, the bare chunk is retried as a statement and reported
/// as `"ok"`. A single table result under the `watch` context is pinned so
/// the client can expand it in later requests.
pub fn evaluate<V: LuaVm>(
    vm: &mut V,
    watch: &mut WatchTable,
    depth: u32,
    expression: &str,
    context: EvalContext,
) -> Result<Evaluation, String> {
    match vm.eval_in_frame(depth, &format!("return {expression}")) {
        Ok(values) => {
            let mut reference = 0;
            if context == EvalContext::Watch && values.len() == 1 {
                if let LuaValue::Table(_) = values[0] {
                    if let Some(slot) = watch.add(vm, values[0].clone()) {
                        reference = VarRef::watch_slot(slot).encode();
                    }
                }
            }
            let result = match values.len() {
                0 => "nil".to_string(),
                1 => render_value(vm, &values[0]),
                _ => values
                    .iter()
                    .map(|value| render_value(vm, value))
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            Ok(Evaluation { result, reference })
        }
        Err(EvalError::Compile(_)) if context == EvalContext::Repl => {
            match vm.eval_in_frame(depth, expression) {
                Ok(_) => Ok(Evaluation { result: "ok".to_string(), reference: 0 }),
                Err(err) => Err(err.message().to_string()),
            }
        }
        Err(err) => Err(err.message().to_string()),
    }
}
