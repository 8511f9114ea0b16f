//! A scripted stand-in for an ESHET server.
//!
//! Tests accept one connection at a time and drive the wire by hand:
//! `recv()` decodes the next client frame, the `reply_*`/`send_*` helpers
//! write server frames. Nothing here is automatic, so every test states
//! the exact exchange it expects.

use std::time::Duration;

use bytes::Bytes;
use eshet::{Payload, op};
use eshet_proto::{FrameBuilder, FrameReader, Unpacker};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A client-to-server message, decoded for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    Hello {
        version: u8,
        timeout_secs: u16,
        id: Option<Payload>,
    },
    Ping {
        id: u16,
    },
    Reply {
        id: u16,
        success: bool,
        value: Payload,
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
    StateChangedKnown {
        id: u16,
        path: String,
        value: Payload,
    },
    StateChangedUnknown {
        id: u16,
        path: String,
    },
    StateObserve {
        id: u16,
        path: String,
    },
}

fn decode_client(body: &[u8]) -> ClientMsg {
    let mut r = FrameReader::new(body);
    let opcode = r.read_u8().unwrap();
    match opcode {
        op::HELLO | op::HELLO_ID => {
            let version = r.read_u8().unwrap();
            let timeout_secs = r.read_u16().unwrap();
            let id = (opcode == op::HELLO_ID).then(|| r.read_value().unwrap());
            ClientMsg::Hello {
                version,
                timeout_secs,
                id,
            }
        }
        op::PING => ClientMsg::Ping {
            id: r.read_u16().unwrap(),
        },
        op::REPLY_SUCCESS | op::REPLY_ERROR => ClientMsg::Reply {
            id: r.read_u16().unwrap(),
            success: opcode == op::REPLY_SUCCESS,
            value: r.read_value().unwrap(),
        },
        op::ACTION_REGISTER => id_path(r, |id, path| ClientMsg::ActionRegister { id, path }),
        op::ACTION_CALL => id_path_value(r, |id, path, args| ClientMsg::ActionCall {
            id,
            path,
            args,
        }),
        op::PROPERTY_REGISTER => id_path(r, |id, path| ClientMsg::PropertyRegister { id, path }),
        op::PROPERTY_GET => id_path(r, |id, path| ClientMsg::PropertyGet { id, path }),
        op::PROPERTY_SET => id_path_value(r, |id, path, value| ClientMsg::PropertySet {
            id,
            path,
            value,
        }),
        op::EVENT_REGISTER => id_path(r, |id, path| ClientMsg::EventRegister { id, path }),
        op::EVENT_EMIT => id_path_value(r, |id, path, value| ClientMsg::EventEmit {
            id,
            path,
            value,
        }),
        op::EVENT_LISTEN => id_path(r, |id, path| ClientMsg::EventListen { id, path }),
        op::STATE_REGISTER => id_path(r, |id, path| ClientMsg::StateRegister { id, path }),
        op::STATE_CHANGED_KNOWN => id_path_value(r, |id, path, value| {
            ClientMsg::StateChangedKnown { id, path, value }
        }),
        op::STATE_CHANGED_UNKNOWN => {
            id_path(r, |id, path| ClientMsg::StateChangedUnknown { id, path })
        }
        op::STATE_OBSERVE | op::STATE_OBSERVE_LEGACY => {
            id_path(r, |id, path| ClientMsg::StateObserve { id, path })
        }
        other => panic!("unexpected client opcode {other:#04x}"),
    }
}

fn id_path(mut r: FrameReader<'_>, make: impl FnOnce(u16, String) -> ClientMsg) -> ClientMsg {
    let id = r.read_u16().unwrap();
    let path = r.read_path().unwrap().to_owned();
    r.finish().unwrap();
    make(id, path)
}

fn id_path_value(
    mut r: FrameReader<'_>,
    make: impl FnOnce(u16, String, Payload) -> ClientMsg,
) -> ClientMsg {
    let id = r.read_u16().unwrap();
    let path = r.read_path().unwrap().to_owned();
    let value = r.read_value().unwrap();
    r.finish().unwrap();
    make(id, path, value)
}

pub struct TestServer {
    listener: TcpListener,
}

impl TestServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(RECV_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .unwrap();
        Peer {
            stream,
            unpacker: Unpacker::new(),
        }
    }
}

pub struct Peer {
    stream: TcpStream,
    unpacker: Unpacker,
}

impl Peer {
    pub async fn recv(&mut self) -> ClientMsg {
        let body = self.recv_body().await;
        decode_client(&body)
    }

    async fn recv_body(&mut self) -> Bytes {
        loop {
            if let Some(body) = self.unpacker.read().unwrap() {
                return body;
            }
            let mut buf = [0u8; 4096];
            let n = timeout(RECV_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            self.unpacker.push(&buf[..n]);
        }
    }

    /// Assert that nothing arrives for `quiet`.
    pub async fn expect_quiet(&mut self, quiet: Duration) {
        assert_eq!(self.unpacker.read().unwrap(), None, "unconsumed frame");
        let mut buf = [0u8; 4096];
        match timeout(quiet, self.stream.read(&mut buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => panic!("client closed the connection"),
            Ok(Ok(n)) => panic!("expected quiet, got {n} bytes"),
            Ok(Err(error)) => panic!("read failed: {error}"),
        }
    }

    /// Read until the client closes the connection, asserting no further
    /// frames arrive.
    pub async fn expect_close(&mut self) {
        assert_eq!(self.unpacker.read().unwrap(), None, "unconsumed frame");
        let mut buf = [0u8; 4096];
        let n = timeout(RECV_TIMEOUT, self.stream.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(n, 0, "expected close, got {n} bytes");
    }

    async fn send_frame(&mut self, frame: Bytes) {
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Expect the client's hello and acknowledge it with 0x03.
    /// Returns the identity the client presented, if any.
    pub async fn handshake(&mut self) -> Option<Payload> {
        let id = self.expect_hello().await;
        self.send_frame(FrameBuilder::begin(op::HELLO_OK).finish().unwrap())
            .await;
        id
    }

    /// Expect the client's hello and assign it an identity with 0x04.
    pub async fn handshake_assign(&mut self, id: &Payload) {
        self.expect_hello().await;
        let mut b = FrameBuilder::begin(op::HELLO_NEW_ID);
        b.put_value(id);
        self.send_frame(b.finish().unwrap()).await;
    }

    async fn expect_hello(&mut self) -> Option<Payload> {
        match self.recv().await {
            ClientMsg::Hello { version, id, .. } => {
                assert_eq!(version, 1);
                id
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }

    pub async fn reply_success(&mut self, id: u16, value: &Payload) {
        let mut b = FrameBuilder::begin(op::REPLY_SUCCESS);
        b.put_u16(id).put_value(value);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn reply_error(&mut self, id: u16, value: &Payload) {
        let mut b = FrameBuilder::begin(op::REPLY_ERROR);
        b.put_u16(id).put_value(value);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn reply_state_known(&mut self, id: u16, value: &Payload, age: Option<u32>) {
        let frame = match age {
            Some(age) => {
                let mut b = FrameBuilder::begin(op::REPLY_STATE_KNOWN_AGE);
                b.put_u16(id).put_u32(age).put_value(value);
                b.finish().unwrap()
            }
            None => {
                let mut b = FrameBuilder::begin(op::REPLY_STATE_KNOWN);
                b.put_u16(id).put_value(value);
                b.finish().unwrap()
            }
        };
        self.send_frame(frame).await;
    }

    pub async fn reply_state_unknown(&mut self, id: u16, age: Option<u32>) {
        let frame = match age {
            Some(age) => {
                let mut b = FrameBuilder::begin(op::REPLY_STATE_UNKNOWN_AGE);
                b.put_u16(id).put_u32(age);
                b.finish().unwrap()
            }
            None => {
                let mut b = FrameBuilder::begin(op::REPLY_STATE_UNKNOWN);
                b.put_u16(id);
                b.finish().unwrap()
            }
        };
        self.send_frame(frame).await;
    }

    /// Call an action the client registered.
    pub async fn send_action_call(&mut self, id: u16, path: &str, args: &Payload) {
        let mut b = FrameBuilder::begin(op::ACTION_CALL);
        b.put_u16(id).put_path(path).put_value(args);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn send_property_get(&mut self, id: u16, path: &str) {
        let mut b = FrameBuilder::begin(op::PROPERTY_GET_CALL);
        b.put_u16(id).put_path(path);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn send_property_set(&mut self, id: u16, path: &str, value: &Payload) {
        let mut b = FrameBuilder::begin(op::PROPERTY_SET_CALL);
        b.put_u16(id).put_path(path).put_value(value);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn send_event(&mut self, path: &str, value: &Payload) {
        let mut b = FrameBuilder::begin(op::EVENT_NOTIFY);
        b.put_path(path).put_value(value);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn send_state_known(&mut self, path: &str, value: &Payload) {
        let mut b = FrameBuilder::begin(op::STATE_KNOWN);
        b.put_path(path).put_value(value);
        self.send_frame(b.finish().unwrap()).await;
    }

    pub async fn send_state_unknown(&mut self, path: &str) {
        let mut b = FrameBuilder::begin(op::STATE_UNKNOWN);
        b.put_path(path);
        self.send_frame(b.finish().unwrap()).await;
    }
}
