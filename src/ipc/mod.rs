//! IPC codec and wire protocol — length-prefixed MessagePack framing.

pub mod codec;
pub mod protocol;
