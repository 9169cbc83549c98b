//! Pinned evaluator results.
//!
//! `evaluate` under the `watch` context can produce a composite value whose
//! children the client fetches in later requests. The table pins those
//! values (anchoring them in the VM against collection) and hands out small
//! slot numbers that fit the variables-reference payload. Slot 0 is
//! reserved/invalid.
//!
//! The table is cleared on every resume: once the VM has run, an encoded
//! watch reference must not be able to reach a stale value.

use lunar_vm::{LuaValue, LuaVm};

#[derive(Debug)]
pub struct WatchTable {
    slots: Vec<LuaValue>,
}

/// Slots are addressed by one 8-bit reference-path field.
const MAX_SLOTS: usize = 256;

impl Default for WatchTable {
    fn default() -> Self {
        WatchTable { slots: vec![LuaValue::Nil] }
    }
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `value` and return its slot, or None when the table is full.
    pub fn add<V: LuaVm>(&mut self, vm: &mut V, value: LuaValue) -> Option<u8> {
        if self.slots.len() >= MAX_SLOTS {
            return None;
        }
        vm.retain(&value);
        self.slots.push(value);
        Some((self.slots.len() - 1) as u8)
    }

    pub fn get(&self, slot: u8) -> Option<&LuaValue> {
        if slot == 0 {
            return None;
        }
        self.slots.get(slot as usize)
    }

    pub fn clear<V: LuaVm>(&mut self, vm: &mut V) {
        vm.release_retained();
        self.slots.truncate(1);
    }
}
