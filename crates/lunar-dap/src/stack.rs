//! Synthetic source references for anonymous in-memory chunks.
//!
//! A stack frame whose chunk has no path is surfaced with a
//! `sourceReference` derived from the identity of its source buffer, and a
//! follow-up `source` request maps the reference back to a frame depth. The
//! list is rebuilt on every stackTrace request; references from an earlier
//! render are not required to stay valid.

use lunar_vm::SourceId;

/// DAP numbers round-trip through IEEE-754 doubles; references must stay
/// within the 53-bit mantissa.
pub const MAX_SAFE_REFERENCE: i64 = (1 << 53) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntheticSource {
    pub depth: u32,
    pub reference: i64,
}

#[derive(Debug, Default)]
pub struct StackBroker {
    entries: Vec<SyntheticSource>,
}

impl StackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_render(&mut self) {
        self.entries.clear();
    }

    /// Record the frame at `depth` and return its clamped reference.
    pub fn record(&mut self, depth: u32, source_id: SourceId) -> i64 {
        let reference = clamp_to_mantissa(source_id);
        self.entries.push(SyntheticSource { depth, reference });
        reference
    }

    pub fn depth_for(&self, reference: i64) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.reference == reference)
            .map(|entry| entry.depth)
    }
}

fn clamp_to_mantissa(id: SourceId) -> i64 {
    let clamped = (id & MAX_SAFE_REFERENCE as u64) as i64;
    // 0 means "no source content"; keep synthetic references positive.
    clamped.max(1)
}
