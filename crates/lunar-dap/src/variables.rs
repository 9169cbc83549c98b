//! Variable reference handles and on-demand materialization.
//!
//! A variables reference is a 64-bit integer the client echoes back:
//!
//! ```text
//! bits  0..7   : category (1=local, 2=vararg, 3=upvalue, 4=global,
//!                          5=standard, 6=watch)
//! bits  8..15  : frame depth (0 = topmost)
//! bits 16..    : payload — a watch slot, or one child index
//! ```
//!
//! The payload is a single field. Values below [`CHILD_BASE`] address a
//! scope root (0) or a watch slot; values at or above it are handles into
//! the [`ChildRegistry`], which pins the expansion path (base collection
//! plus child ordinals) of every composite value handed to the client.
//! Registry handles share the watch table's lifetime: both are dropped on
//! every resume. Nesting depth and collection width are therefore
//! unbounded; only the handle count is, and it stays far inside the 2^53
//! ceiling that survives a JSON double round-trip. 0 means "no children";
//! −1 marks a host-native frame.

use lunar_vm::{LuaValue, LuaVm};

use crate::dap::types::{Scope, Variable};
use crate::error::{DebugError, DebugResult};
use crate::watch::WatchTable;

/// Reference value reserved for opaque host-native frames.
pub const HOST_FRAME_REFERENCE: i64 = -1;

/// First registry handle. Payloads below this are watch slots (or 0, the
/// scope itself), so the two ranges can never collide.
pub const CHILD_BASE: u64 = 256;

/// Payload bits available under the IEEE-754 mantissa ceiling.
const PAYLOAD_MAX: u64 = (crate::stack::MAX_SAFE_REFERENCE as u64) >> 16;

/// Global names that belong to the Lua standard library; they are split out
/// of the Globals scope into Standard.
pub const STANDARD_NAMES: &[&str] = &[
    "_G",
    "_VERSION",
    "assert",
    "collectgarbage",
    "coroutine",
    "debug",
    "dofile",
    "error",
    "getmetatable",
    "io",
    "ipairs",
    "load",
    "loadstring",
    "math",
    "next",
    "os",
    "package",
    "pairs",
    "pcall",
    "print",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "require",
    "select",
    "setmetatable",
    "string",
    "table",
    "tonumber",
    "tostring",
    "type",
    "utf8",
    "xpcall",
];

fn is_standard(name: &str) -> bool {
    STANDARD_NAMES.contains(&name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarScope {
    Local = 1,
    Vararg = 2,
    Upvalue = 3,
    Global = 4,
    Standard = 5,
    Watch = 6,
}

impl VarScope {
    fn from_u8(raw: u8) -> Option<VarScope> {
        match raw {
            1 => Some(VarScope::Local),
            2 => Some(VarScope::Vararg),
            3 => Some(VarScope::Upvalue),
            4 => Some(VarScope::Global),
            5 => Some(VarScope::Standard),
            6 => Some(VarScope::Watch),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarRef {
    pub scope: VarScope,
    pub depth: u8,
    pub payload: u64,
}

impl VarRef {
    pub fn scope_root(scope: VarScope, depth: u8) -> VarRef {
        VarRef { scope, depth, payload: 0 }
    }

    pub fn watch_slot(slot: u8) -> VarRef {
        VarRef { scope: VarScope::Watch, depth: 0, payload: slot as u64 }
    }

    pub fn encode(&self) -> i64 {
        debug_assert!(self.payload <= PAYLOAD_MAX);
        self.scope as i64 | (self.depth as i64) << 8 | (self.payload as i64) << 16
    }

    pub fn decode(raw: i64) -> Option<VarRef> {
        if raw <= 0 || raw > crate::stack::MAX_SAFE_REFERENCE {
            return None;
        }
        let scope = VarScope::from_u8((raw & 0xFF) as u8)?;
        let depth = ((raw >> 8) & 0xFF) as u8;
        let payload = (raw >> 16) as u64;
        Some(VarRef { scope, depth, payload })
    }
}

/// One pinned expansion path: the collection it starts from and the
/// 1-based child ordinals leading to the referenced value.
#[derive(Clone, Debug)]
struct ChildPath {
    scope: VarScope,
    depth: u8,
    watch_slot: u8,
    ordinals: Vec<u32>,
}

/// Handles for composite children handed to the client.
///
/// Cleared on every resume, together with the watch table, so a stale
/// reference can never reach a value the VM has since moved past.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    paths: Vec<ChildPath>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    fn alloc(&mut self, path: ChildPath) -> u64 {
        self.paths.push(path);
        CHILD_BASE + (self.paths.len() - 1) as u64
    }

    fn get(&self, handle: u64) -> Option<&ChildPath> {
        handle
            .checked_sub(CHILD_BASE)
            .and_then(|index| self.paths.get(index as usize))
    }
}

/// Where a materialized entry can be written back.
#[derive(Clone, Debug)]
enum Slot {
    Local(i32),
    Upvalue(u32),
    Global(String),
    TableField { table: lunar_vm::TableId, key: LuaValue },
    ReadOnly,
}

#[derive(Clone, Debug)]
struct Entry {
    name: String,
    value: LuaValue,
    slot: Slot,
}

/// A resolved reference: the collection it names, plus the path context
/// needed to mint handles for that collection's own composite children.
struct Resolved {
    entries: Vec<Entry>,
    watch_slot: u8,
    ordinals: Vec<u32>,
}

/// Scope list for one frame, in fixed order. Var Args appears only for
/// variadic frames.
pub fn scopes<V: LuaVm>(vm: &mut V, depth: u32) -> DebugResult<Vec<Scope>> {
    let frame = vm.stack_frame(depth).ok_or(DebugError::MissingFrame(depth))?;
    let depth = u8::try_from(depth).map_err(|_| DebugError::MissingFrame(depth))?;

    let mut scopes = Vec::with_capacity(5);
    let mut push = |name: &str, scope: VarScope| {
        scopes.push(Scope {
            name: name.to_string(),
            variables_reference: VarRef::scope_root(scope, depth).encode(),
            expensive: false,
        });
    };
    push("Locals", VarScope::Local);
    if frame.is_vararg {
        push("Var Args", VarScope::Vararg);
    }
    push("Upvalues", VarScope::Upvalue);
    push("Globals", VarScope::Global);
    push("Standard", VarScope::Standard);
    Ok(scopes)
}

/// Materialize the collection a reference points at, minting a registry
/// handle for every composite child so the client can expand further.
pub fn variables<V: LuaVm>(
    vm: &mut V,
    watch: &WatchTable,
    registry: &mut ChildRegistry,
    varref: VarRef,
) -> DebugResult<Vec<Variable>> {
    let resolved = resolve(vm, watch, registry, varref)?;
    let mut out = Vec::with_capacity(resolved.entries.len());
    for (index, entry) in resolved.entries.into_iter().enumerate() {
        let reference = if entry.value.has_children() {
            let mut ordinals = resolved.ordinals.clone();
            ordinals.push(index as u32 + 1);
            let handle = registry.alloc(ChildPath {
                scope: varref.scope,
                depth: varref.depth,
                watch_slot: resolved.watch_slot,
                ordinals,
            });
            if handle <= PAYLOAD_MAX {
                VarRef { scope: varref.scope, depth: varref.depth, payload: handle }.encode()
            } else {
                0
            }
        } else {
            0
        };
        out.push(Variable {
            name: entry.name,
            value: render_value(vm, &entry.value),
            type_: Some(entry.value.type_name().to_string()),
            variables_reference: reference,
        });
    }
    Ok(out)
}

/// Write `value` to the entry called `name` inside the referenced
/// collection, returning the stored value for the response echo.
pub fn set_variable<V: LuaVm>(
    vm: &mut V,
    watch: &WatchTable,
    registry: &ChildRegistry,
    varref: VarRef,
    name: &str,
    value: LuaValue,
) -> DebugResult<LuaValue> {
    let resolved = resolve(vm, watch, registry, varref)?;
    let entry = resolved
        .entries
        .into_iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| DebugError::NotWritable(name.to_string()))?;

    let depth = varref.depth as u32;
    match entry.slot {
        Slot::Local(index) => vm.set_local_var(depth, index, value.clone())?,
        Slot::Upvalue(index) => vm.set_upvalue(depth, index, value.clone())?,
        Slot::Global(global) => vm.set_global(&global, value.clone())?,
        Slot::TableField { table, key } => vm.table_set(table, &key, value.clone())?,
        Slot::ReadOnly => return Err(DebugError::NotWritable(name.to_string())),
    }
    Ok(value)
}

fn resolve<V: LuaVm>(
    vm: &mut V,
    watch: &WatchTable,
    registry: &ChildRegistry,
    varref: VarRef,
) -> DebugResult<Resolved> {
    let raw = varref.encode();

    let (watch_slot, ordinals): (u8, Vec<u32>) = if varref.payload >= CHILD_BASE {
        let path = registry
            .get(varref.payload)
            .ok_or(DebugError::UnknownVariablesReference(raw))?;
        // A forged reference may splice a live handle onto the wrong scope.
        if path.scope != varref.scope || path.depth != varref.depth {
            return Err(DebugError::UnknownVariablesReference(raw));
        }
        (path.watch_slot, path.ordinals.clone())
    } else if varref.scope == VarScope::Watch {
        (varref.payload as u8, Vec::new())
    } else if varref.payload == 0 {
        (0, Vec::new())
    } else {
        return Err(DebugError::UnknownVariablesReference(raw));
    };

    let mut entries = if varref.scope == VarScope::Watch {
        let value = watch
            .get(watch_slot)
            .cloned()
            .ok_or(DebugError::UnknownVariablesReference(raw))?;
        child_entries(vm, &value)
    } else {
        let depth = varref.depth as u32;
        vm.stack_frame(depth).ok_or(DebugError::MissingFrame(depth))?;
        scope_entries(vm, varref.scope, depth)
    };

    for &ordinal in &ordinals {
        let entry = entries
            .get(ordinal as usize - 1)
            .ok_or(DebugError::UnknownVariablesReference(raw))?;
        let value = entry.value.clone();
        entries = child_entries(vm, &value);
    }
    Ok(Resolved { entries, watch_slot, ordinals })
}

fn scope_entries<V: LuaVm>(vm: &mut V, scope: VarScope, depth: u32) -> Vec<Entry> {
    match scope {
        VarScope::Local => {
            let mut entries = Vec::new();
            for index in 1.. {
                let Some((name, value)) = vm.local_var(depth, index) else {
                    break;
                };
                // Skip internal pseudo-locals like "(*temporary)".
                if name.starts_with('(') {
                    continue;
                }
                entries.push(Entry { name, value, slot: Slot::Local(index) });
            }
            entries
        }
        VarScope::Vararg => {
            let mut entries = Vec::new();
            for index in 1.. {
                let Some((_, value)) = vm.local_var(depth, -index) else {
                    break;
                };
                entries.push(Entry {
                    name: format!("[{index}]"),
                    value,
                    slot: Slot::Local(-index),
                });
            }
            entries
        }
        VarScope::Upvalue => {
            let mut entries = Vec::new();
            for index in 1.. {
                let Some((name, value)) = vm.upvalue(depth, index) else {
                    break;
                };
                entries.push(Entry { name, value, slot: Slot::Upvalue(index) });
            }
            entries
        }
        VarScope::Global | VarScope::Standard => {
            let standard = scope == VarScope::Standard;
            let mut entries: Vec<Entry> = vm
                .global_entries()
                .into_iter()
                .filter(|(name, _)| is_standard(name) == standard)
                .map(|(name, value)| Entry {
                    slot: Slot::Global(name.clone()),
                    name,
                    value,
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            entries
        }
        VarScope::Watch => Vec::new(),
    }
}

fn child_entries<V: LuaVm>(vm: &mut V, value: &LuaValue) -> Vec<Entry> {
    match value {
        LuaValue::Table(table) => {
            let mut fields: Vec<(LuaValue, LuaValue)> = vm.table_entries(*table);
            fields.sort_by(|(a, _), (b, _)| sort_key(a).cmp(&sort_key(b)));
            fields
                .into_iter()
                .map(|(key, value)| Entry {
                    name: key_name(vm, &key),
                    value,
                    slot: Slot::TableField { table: *table, key },
                })
                .collect()
        }
        LuaValue::Function { id, upvalue_count } if *upvalue_count > 0 => vm
            .function_upvalues(*id)
            .into_iter()
            .map(|(name, value)| Entry { name, value, slot: Slot::ReadOnly })
            .collect(),
        _ => Vec::new(),
    }
}

fn key_name<V: LuaVm>(vm: &mut V, key: &LuaValue) -> String {
    match key {
        LuaValue::String(s) => s.clone(),
        LuaValue::Integer(i) => format!("[{i}]"),
        LuaValue::Number(n) => format!("[{}]", trim_float(*n)),
        LuaValue::Boolean(b) => format!("[{b}]"),
        other => format!("[{}]", vm.tostring(other)),
    }
}

/// Deterministic ordering for table keys; child ordinals index into the
/// sorted sequence, so the order must be stable across requests.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Bool(bool),
    Int(i64),
    Num(u64),
    Str(String),
    Other(u64),
}

fn sort_key(value: &LuaValue) -> SortKey {
    match value {
        LuaValue::Nil => SortKey::Other(0),
        LuaValue::Boolean(b) => SortKey::Bool(*b),
        LuaValue::Integer(i) => SortKey::Int(*i),
        LuaValue::Number(n) => SortKey::Num(n.to_bits()),
        LuaValue::String(s) => SortKey::Str(s.clone()),
        LuaValue::Table(id) => SortKey::Other(*id),
        LuaValue::Function { id, .. } => SortKey::Other(*id),
        LuaValue::Userdata(id) => SortKey::Other(*id),
        LuaValue::Thread(id) => SortKey::Other(*id),
    }
}

const MAX_STRING_PREVIEW: usize = 80;

/// Client-facing rendering of a value. Composite values use the VM's own
/// `tostring` so the display matches what the debuggee would print.
pub fn render_value<V: LuaVm>(vm: &mut V, value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => trim_float(*n),
        LuaValue::String(s) => format!("\"{}\"", escape_string(s, MAX_STRING_PREVIEW)),
        composite => vm.tostring(composite),
    }
}

fn trim_float(value: f64) -> String {
    if value.is_nan() || value.is_infinite() {
        return value.to_string();
    }
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn escape_string(input: &str, max_len: usize) -> String {
    let mut out = String::new();
    for (used, ch) in input.chars().enumerate() {
        if used >= max_len {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
