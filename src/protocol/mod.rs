//! Protocol module
//!
//! Wire-level pieces of the game protocol:
//! - Frame codec (7-byte header, length-prefixed frames)
//! - Server-owned protobuf messages

pub mod frame;
pub mod messages;
