//! Payloads and the reply variants built from them.

use core::fmt;
use std::io;

use rmpv::Value;

use crate::ProtocolError;

/// An opaque MessagePack value carried by the protocol.
///
/// Everything the protocol moves around (action arguments, state values,
/// event payloads, error details) is one of these; the client never inspects
/// the contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(Value);

impl Payload {
    /// The MessagePack nil value.
    pub fn nil() -> Self {
        Self(Value::Nil)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Serialise into a MessagePack byte stream.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        rmpv::encode::write_value(out, &self.0).expect("writing to a Vec cannot fail");
    }

    /// Decode one MessagePack value from the front of `data`.
    pub fn read_from(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = io::Cursor::new(data);
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| ProtocolError::ValueDecode(e.to_string()))?;
        Ok(Self(value))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.0
    }
}

macro_rules! payload_from {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for Payload {
            fn from(value: $ty) -> Self {
                Self(Value::from(value))
            }
        })*
    };
}

payload_from!(bool, i64, u64, f64, &str, String);

impl From<Vec<Payload>> for Payload {
    fn from(items: Vec<Payload>) -> Self {
        Self(Value::Array(items.into_iter().map(Value::from).collect()))
    }
}

/// Reply to a plain request: a success or error payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Payload),
    Error(Payload),
}

impl Outcome {
    pub fn into_result(self) -> Result<Payload, Payload> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::Error(payload) => Err(payload),
        }
    }
}

impl From<Result<Payload, Payload>> for Outcome {
    fn from(result: Result<Payload, Payload>) -> Self {
        match result {
            Ok(payload) => Self::Success(payload),
            Err(payload) => Self::Error(payload),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(payload) => write!(f, "Success({payload})"),
            Self::Error(payload) => write!(f, "Error({payload})"),
        }
    }
}

/// A state as seen by an observer.
///
/// The age (whole seconds since the last change, as reported by the server)
/// is present only on the initial observe reply; change notifications carry
/// `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Known(Payload, Option<u32>),
    Unknown(Option<u32>),
}

impl StateValue {
    pub fn known(payload: impl Into<Payload>) -> Self {
        Self::Known(payload.into(), None)
    }

    pub fn unknown() -> Self {
        Self::Unknown(None)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(payload, _) => write!(f, "Known({payload})"),
            Self::Unknown(_) => write!(f, "unknown"),
        }
    }
}

/// A state value as published by its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Known(Payload),
    Unknown,
}

impl From<StateUpdate> for StateValue {
    fn from(update: StateUpdate) -> Self {
        match update {
            StateUpdate::Known(payload) => Self::Known(payload, None),
            StateUpdate::Unknown => Self::Unknown(None),
        }
    }
}

impl fmt::Display for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(payload) => write!(f, "Known({payload})"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reply to a state request: a state value or an error payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StateOutcome {
    Known(Payload, Option<u32>),
    Unknown(Option<u32>),
    Error(Payload),
}

impl From<StateValue> for StateOutcome {
    fn from(value: StateValue) -> Self {
        match value {
            StateValue::Known(payload, age) => Self::Known(payload, age),
            StateValue::Unknown(age) => Self::Unknown(age),
        }
    }
}

impl fmt::Display for StateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(payload, _) => write!(f, "Known({payload})"),
            Self::Unknown(_) => write!(f, "unknown"),
            Self::Error(payload) => write!(f, "Error({payload})"),
        }
    }
}

/// The widest decoding of a reply frame, narrowed against the waiter's
/// expected kind before delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyReply {
    Success(Payload),
    Known(Payload, Option<u32>),
    Unknown(Option<u32>),
    Error(Payload),
}

impl AnyReply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "Success",
            Self::Known(..) => "Known",
            Self::Unknown(_) => "Unknown",
            Self::Error(_) => "Error",
        }
    }

    /// Narrow to a plain-request reply. Errors narrow to either kind.
    pub fn into_outcome(self) -> Result<Outcome, AnyReply> {
        match self {
            Self::Success(payload) => Ok(Outcome::Success(payload)),
            Self::Error(payload) => Ok(Outcome::Error(payload)),
            other => Err(other),
        }
    }

    /// Narrow to a state-request reply.
    pub fn into_state(self) -> Result<StateOutcome, AnyReply> {
        match self {
            Self::Known(payload, age) => Ok(StateOutcome::Known(payload, age)),
            Self::Unknown(age) => Ok(StateOutcome::Unknown(age)),
            Self::Error(payload) => Ok(StateOutcome::Error(payload)),
            other => Err(other),
        }
    }
}

impl fmt::Display for AnyReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(payload) => write!(f, "Success({payload})"),
            Self::Known(payload, _) => write!(f, "Known({payload})"),
            Self::Unknown(_) => write!(f, "unknown"),
            Self::Error(payload) => write!(f, "Error({payload})"),
        }
    }
}
