//! Subscription wire format
//!
//! One frame codec shared by both sides of the node: the upstream client
//! and the downstream server speak the same subscription contract, so the
//! read node is protocol-compatible as client and as server.
//!
//! Frames are length-prefixed (`u32`), so a payload that fails to decode
//! costs only that frame; the stream stays in sync and the next frame can
//! be read normally. Malformed notifications are dropped by the reader,
//! never treated as fatal.

pub mod codec;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, Frame, FrameError};
