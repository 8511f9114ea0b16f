//! ESHET client library.
//!
//! ESHET is a hub-and-spoke message bus multiplexing four interaction styles
//! over one TCP connection: actions (request/reply RPC), states
//! (single-writer, multi-observer with last-known-value semantics),
//! properties (remote get/set), and events (fire-and-forget pub/sub).
//!
//! [`Client`] is the entry point. It spawns a session engine task that owns
//! the socket, keeps the client's registrations alive across transparent
//! reconnections, and maintains an idle-ping liveness loop. Facade calls
//! enqueue commands to the engine and never block on the network.
//!
//! ```no_run
//! # async fn demo() -> Result<(), eshet::Error> {
//! use eshet::Payload;
//!
//! let client = eshet::Client::connect("localhost", eshet::DEFAULT_PORT);
//! client.wait_connected().await?;
//! let args = vec![Payload::from(5i64), Payload::from(1i64)];
//! let sum = client.action_call("/calc/add", args).await?;
//! println!("{sum}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod pending;
mod registry;
mod session;

pub use client::{ActionCall, Client, Error};
pub use config::{Config, ConfigError};

pub use eshet_proto::{
    AnyReply, DEFAULT_PORT, Outcome, Payload, ProtocolError, StateOutcome, StateUpdate,
    StateValue, Value, op,
};
