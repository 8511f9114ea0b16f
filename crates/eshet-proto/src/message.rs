//! Typed protocol messages and their mapping to frames.

use bytes::Bytes;

use crate::{
    AnyReply, FrameBuilder, FrameReader, Outcome, Payload, ProtocolError, StateUpdate, StateValue,
};

/// Opcodes, as assigned by the protocol.
pub mod op {
    pub const HELLO: u8 = 0x01;
    pub const HELLO_ID: u8 = 0x02;
    pub const HELLO_OK: u8 = 0x03;
    pub const HELLO_NEW_ID: u8 = 0x04;
    pub const REPLY_SUCCESS: u8 = 0x05;
    pub const REPLY_ERROR: u8 = 0x06;
    pub const REPLY_STATE_KNOWN: u8 = 0x07;
    pub const REPLY_STATE_UNKNOWN: u8 = 0x08;
    pub const PING: u8 = 0x09;
    pub const REPLY_STATE_KNOWN_AGE: u8 = 0x0a;
    pub const REPLY_STATE_UNKNOWN_AGE: u8 = 0x0b;
    pub const ACTION_REGISTER: u8 = 0x10;
    pub const ACTION_CALL: u8 = 0x11;
    pub const PROPERTY_REGISTER: u8 = 0x20;
    pub const PROPERTY_GET_CALL: u8 = 0x21;
    pub const PROPERTY_SET_CALL: u8 = 0x22;
    pub const PROPERTY_GET: u8 = 0x23;
    pub const PROPERTY_SET: u8 = 0x24;
    pub const EVENT_REGISTER: u8 = 0x30;
    pub const EVENT_EMIT: u8 = 0x31;
    pub const EVENT_LISTEN: u8 = 0x32;
    pub const EVENT_NOTIFY: u8 = 0x33;
    pub const STATE_REGISTER: u8 = 0x40;
    pub const STATE_CHANGED_KNOWN: u8 = 0x41;
    pub const STATE_CHANGED_UNKNOWN: u8 = 0x42;
    /// state_observe on servers predating the 0x46 renumbering.
    pub const STATE_OBSERVE_LEGACY: u8 = 0x43;
    pub const STATE_KNOWN: u8 = 0x44;
    pub const STATE_UNKNOWN: u8 = 0x45;
    pub const STATE_OBSERVE: u8 = 0x46;
}

/// A client-to-server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Hello {
        version: u8,
        timeout_secs: u16,
        id: Option<Payload>,
    },
    Ping {
        id: u16,
    },
    /// Response to an incoming action or property call.
    Reply {
        id: u16,
        outcome: Outcome,
    },
    ActionRegister {
        id: u16,
        path: String,
    },
    ActionCall {
        id: u16,
        path: String,
        args: Payload,
    },
    PropertyRegister {
        id: u16,
        path: String,
    },
    PropertyGet {
        id: u16,
        path: String,
    },
    PropertySet {
        id: u16,
        path: String,
        value: Payload,
    },
    EventRegister {
        id: u16,
        path: String,
    },
    EventEmit {
        id: u16,
        path: String,
        value: Payload,
    },
    EventListen {
        id: u16,
        path: String,
    },
    StateRegister {
        id: u16,
        path: String,
    },
    StateChanged {
        id: u16,
        path: String,
        value: StateUpdate,
    },
    StateObserve {
        id: u16,
        path: String,
        /// `op::STATE_OBSERVE`, or `op::STATE_OBSERVE_LEGACY` for old servers.
        opcode: u8,
    },
}

impl Outgoing {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            Self::Hello {
                version,
                timeout_secs,
                id,
            } => {
                let opcode = if id.is_some() { op::HELLO_ID } else { op::HELLO };
                let mut b = FrameBuilder::begin(opcode);
                b.put_u8(*version).put_u16(*timeout_secs);
                if let Some(id) = id {
                    b.put_value(id);
                }
                b.finish()
            }
            Self::Ping { id } => {
                let mut b = FrameBuilder::begin(op::PING);
                b.put_u16(*id);
                b.finish()
            }
            Self::Reply { id, outcome } => {
                let (opcode, payload) = match outcome {
                    Outcome::Success(payload) => (op::REPLY_SUCCESS, payload),
                    Outcome::Error(payload) => (op::REPLY_ERROR, payload),
                };
                encode_id_value(opcode, *id, payload)
            }
            Self::ActionRegister { id, path } => encode_id_path(op::ACTION_REGISTER, *id, path),
            Self::ActionCall { id, path, args } => {
                encode_id_path_value(op::ACTION_CALL, *id, path, args)
            }
            Self::PropertyRegister { id, path } => encode_id_path(op::PROPERTY_REGISTER, *id, path),
            Self::PropertyGet { id, path } => encode_id_path(op::PROPERTY_GET, *id, path),
            Self::PropertySet { id, path, value } => {
                encode_id_path_value(op::PROPERTY_SET, *id, path, value)
            }
            Self::EventRegister { id, path } => encode_id_path(op::EVENT_REGISTER, *id, path),
            Self::EventEmit { id, path, value } => {
                encode_id_path_value(op::EVENT_EMIT, *id, path, value)
            }
            Self::EventListen { id, path } => encode_id_path(op::EVENT_LISTEN, *id, path),
            Self::StateRegister { id, path } => encode_id_path(op::STATE_REGISTER, *id, path),
            Self::StateChanged { id, path, value } => match value {
                StateUpdate::Known(payload) => {
                    encode_id_path_value(op::STATE_CHANGED_KNOWN, *id, path, payload)
                }
                StateUpdate::Unknown => encode_id_path(op::STATE_CHANGED_UNKNOWN, *id, path),
            },
            Self::StateObserve { id, path, opcode } => encode_id_path(*opcode, *id, path),
        }
    }
}

fn encode_id_path(opcode: u8, id: u16, path: &str) -> Result<Bytes, ProtocolError> {
    let mut b = FrameBuilder::begin(opcode);
    b.put_u16(id).put_path(path);
    b.finish()
}

fn encode_id_value(opcode: u8, id: u16, value: &Payload) -> Result<Bytes, ProtocolError> {
    let mut b = FrameBuilder::begin(opcode);
    b.put_u16(id).put_value(value);
    b.finish()
}

fn encode_id_path_value(
    opcode: u8,
    id: u16,
    path: &str,
    value: &Payload,
) -> Result<Bytes, ProtocolError> {
    let mut b = FrameBuilder::begin(opcode);
    b.put_u16(id).put_path(path).put_value(value);
    b.finish()
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Hello acknowledgement; `id` is present when the server assigned a new
    /// identity token.
    HelloOk { id: Option<Payload> },
    /// A correlated reply to an earlier request.
    Reply { id: u16, reply: AnyReply },
    /// Another client is calling an action this client owns.
    ActionCall {
        id: u16,
        path: String,
        args: Payload,
    },
    /// A get on a property this client owns.
    PropertyGet { id: u16, path: String },
    /// A set on a property this client owns.
    PropertySet {
        id: u16,
        path: String,
        value: Payload,
    },
    /// A notification on a listened event.
    Event { path: String, value: Payload },
    /// A change notification on an observed state.
    StateChanged { path: String, value: StateValue },
}

impl Incoming {
    /// Decode a frame body (as produced by the unpacker).
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FrameReader::new(body);
        let opcode = r.read_u8()?;
        match opcode {
            op::HELLO_OK => {
                r.finish()?;
                Ok(Self::HelloOk { id: None })
            }
            op::HELLO_NEW_ID => {
                let id = r.read_value()?;
                r.finish()?;
                Ok(Self::HelloOk { id: Some(id) })
            }
            op::REPLY_SUCCESS => {
                let id = r.read_u16()?;
                let payload = r.read_value()?;
                r.finish()?;
                Ok(Self::Reply {
                    id,
                    reply: AnyReply::Success(payload),
                })
            }
            op::REPLY_ERROR => {
                let id = r.read_u16()?;
                let payload = r.read_value()?;
                r.finish()?;
                Ok(Self::Reply {
                    id,
                    reply: AnyReply::Error(payload),
                })
            }
            op::REPLY_STATE_KNOWN => {
                let id = r.read_u16()?;
                let payload = r.read_value()?;
                r.finish()?;
                Ok(Self::Reply {
                    id,
                    reply: AnyReply::Known(payload, None),
                })
            }
            op::REPLY_STATE_UNKNOWN => {
                let id = r.read_u16()?;
                r.finish()?;
                Ok(Self::Reply {
                    id,
                    reply: AnyReply::Unknown(None),
                })
            }
            op::REPLY_STATE_KNOWN_AGE => {
                let id = r.read_u16()?;
                let age = r.read_u32()?;
                let payload = r.read_value()?;
                r.finish()?;
                Ok(Self::Reply {
                    id,
                    reply: AnyReply::Known(payload, Some(age)),
                })
            }
            op::REPLY_STATE_UNKNOWN_AGE => {
                let id = r.read_u16()?;
                let age = r.read_u32()?;
                r.finish()?;
                Ok(Self::Reply {
                    id,
                    reply: AnyReply::Unknown(Some(age)),
                })
            }
            op::ACTION_CALL => {
                let id = r.read_u16()?;
                let path = r.read_path()?.to_owned();
                let args = r.read_value()?;
                r.finish()?;
                Ok(Self::ActionCall { id, path, args })
            }
            op::PROPERTY_GET_CALL => {
                let id = r.read_u16()?;
                let path = r.read_path()?.to_owned();
                r.finish()?;
                Ok(Self::PropertyGet { id, path })
            }
            op::PROPERTY_SET_CALL => {
                let id = r.read_u16()?;
                let path = r.read_path()?.to_owned();
                let value = r.read_value()?;
                r.finish()?;
                Ok(Self::PropertySet { id, path, value })
            }
            op::EVENT_NOTIFY => {
                let path = r.read_path()?.to_owned();
                let value = r.read_value()?;
                r.finish()?;
                Ok(Self::Event { path, value })
            }
            op::STATE_KNOWN => {
                let path = r.read_path()?.to_owned();
                let value = r.read_value()?;
                r.finish()?;
                Ok(Self::StateChanged {
                    path,
                    value: StateValue::Known(value, None),
                })
            }
            op::STATE_UNKNOWN => {
                let path = r.read_path()?.to_owned();
                r.finish()?;
                Ok(Self::StateChanged {
                    path,
                    value: StateValue::Unknown(None),
                })
            }
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(frame: &Bytes) -> &[u8] {
        &frame[crate::HEADER_LEN..]
    }

    #[test]
    fn hello_without_id() {
        let frame = Outgoing::Hello {
            version: 1,
            timeout_secs: 30,
            id: None,
        }
        .encode()
        .unwrap();
        assert_eq!(&frame[..], &[0x47, 0, 3, 0x01, 1, 0, 30]);
    }

    #[test]
    fn hello_with_id() {
        let frame = Outgoing::Hello {
            version: 1,
            timeout_secs: 30,
            id: Some(Payload::from(9i64)),
        }
        .encode()
        .unwrap();
        assert_eq!(&frame[..], &[0x47, 0, 4, 0x02, 1, 0, 30, 9]);
    }

    #[test]
    fn state_changed_picks_opcode_per_variant() {
        let known = Outgoing::StateChanged {
            id: 1,
            path: "/s".into(),
            value: StateUpdate::Known(Payload::from(5i64)),
        }
        .encode()
        .unwrap();
        assert_eq!(known[3], op::STATE_CHANGED_KNOWN);

        let unknown = Outgoing::StateChanged {
            id: 1,
            path: "/s".into(),
            value: StateUpdate::Unknown,
        }
        .encode()
        .unwrap();
        assert_eq!(unknown[3], op::STATE_CHANGED_UNKNOWN);
    }

    #[test]
    fn observe_opcode_is_configurable() {
        let frame = Outgoing::StateObserve {
            id: 1,
            path: "/s".into(),
            opcode: op::STATE_OBSERVE_LEGACY,
        }
        .encode()
        .unwrap();
        assert_eq!(frame[3], 0x43);
    }

    #[test]
    fn decodes_every_reply_shape() {
        let cases: &[(&[u8], AnyReply)] = &[
            (&[0x05, 0, 7, 5], AnyReply::Success(Payload::from(5i64))),
            (&[0x06, 0, 7, 5], AnyReply::Error(Payload::from(5i64))),
            (&[0x07, 0, 7, 5], AnyReply::Known(Payload::from(5i64), None)),
            (&[0x08, 0, 7], AnyReply::Unknown(None)),
            (
                &[0x0a, 0, 7, 0, 0, 0, 60, 5],
                AnyReply::Known(Payload::from(5i64), Some(60)),
            ),
            (&[0x0b, 0, 7, 0, 0, 0, 60], AnyReply::Unknown(Some(60))),
        ];
        for (bytes, expected) in cases {
            match Incoming::decode(bytes).unwrap() {
                Incoming::Reply { id, reply } => {
                    assert_eq!(id, 7);
                    assert_eq!(&reply, expected);
                }
                other => panic!("unexpected decode: {other:?}"),
            }
        }
    }

    #[test]
    fn state_changed_known_and_unknown_map_correctly() {
        let known = [&[op::STATE_KNOWN][..], b"/s\0", &[5][..]].concat();
        assert_eq!(
            Incoming::decode(&known).unwrap(),
            Incoming::StateChanged {
                path: "/s".into(),
                value: StateValue::Known(Payload::from(5i64), None),
            }
        );

        let unknown = [&[op::STATE_UNKNOWN][..], b"/s\0"].concat();
        assert_eq!(
            Incoming::decode(&unknown).unwrap(),
            Incoming::StateChanged {
                path: "/s".into(),
                value: StateValue::Unknown(None),
            }
        );
    }

    #[test]
    fn action_call_round_trips() {
        let frame = Outgoing::ActionCall {
            id: 3,
            path: "/t/add".into(),
            args: Payload::from(vec![Payload::from(5i64)]),
        }
        .encode()
        .unwrap();
        // An action call looks identical in both directions.
        assert_eq!(
            Incoming::decode(body(&frame)).unwrap(),
            Incoming::ActionCall {
                id: 3,
                path: "/t/add".into(),
                args: Payload::from(vec![Payload::from(5i64)]),
            }
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        // 0x08 has an exact length; anything after the id is an error.
        assert_eq!(
            Incoming::decode(&[0x08, 0, 7, 0]),
            Err(ProtocolError::TrailingBytes)
        );
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert_eq!(
            Incoming::decode(&[0x7f]),
            Err(ProtocolError::UnknownOpcode(0x7f))
        );
    }
}
