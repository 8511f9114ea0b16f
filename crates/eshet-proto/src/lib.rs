//! eshet-proto: wire types and codecs for the ESHET protocol.
//!
//! This crate defines:
//! - Payloads and reply variants ([`Payload`], [`Outcome`], [`StateValue`],
//!   [`StateUpdate`], [`StateOutcome`], [`AnyReply`])
//! - The outer frame codec ([`FrameBuilder`], [`FrameReader`])
//! - Typed protocol messages ([`Outgoing`], [`Incoming`], [`op`])
//! - The stream unpacker ([`Unpacker`])
//! - Protocol errors ([`ProtocolError`])

#![forbid(unsafe_code)]

mod error;
mod frame;
mod message;
mod payload;
mod unpacker;

pub use error::*;
pub use frame::*;
pub use message::*;
pub use payload::*;
pub use unpacker::*;

// Re-export the MessagePack value type so callers can build payloads without
// depending on rmpv directly.
pub use rmpv::Value;

/// Protocol version exchanged in hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default ESHET server port.
pub const DEFAULT_PORT: u16 = 11236;
