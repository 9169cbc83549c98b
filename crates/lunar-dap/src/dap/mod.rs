//! DAP wire model: framing codec, message envelopes, typed bodies.

pub mod codec;
pub mod messages;
pub mod types;

/// Upper bound for a message's whole header section.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Upper bound for a framed message body.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
