//! The session engine.
//!
//! One task owns the socket, the pending-request table, the registry, and
//! the liveness deadlines; nothing here is shared, so nothing here is
//! locked. A companion task does the blocking socket reads and forwards
//! byte chunks over a bounded channel.
//!
//! The engine runs an outer reconnect loop. Each successful connection goes
//! through hello, then replays every registration, then settles into a
//! steady-state multiplex over a fixed set of sources:
//!
//! - byte chunks from the receive task (closure of the channel means the
//!   socket closed)
//! - commands from the facade
//! - deferred replies from user action handlers
//! - results of engine-issued pings
//! - the exit signal
//! - the idle-ping / ping-timeout deadline

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use core::fmt;
use eshet_proto::{
    Incoming, Outcome, Outgoing, PROTOCOL_VERSION, Payload, ProtocolError, StateOutcome,
    StateUpdate, StateValue, Unpacker,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::ActionCall;
use crate::config::Config;
use crate::pending::{Pending, Waiter};
use crate::registry::{PropertyHandlers, Registry};

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
/// A connection that survives this long resets the backoff delay.
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(10);

const READ_BUF_LEN: usize = 4096;
const READ_QUEUE_DEPTH: usize = 32;

/// One facade call, with the sink its reply goes to.
pub(crate) enum Command {
    ActionCall {
        path: String,
        args: Payload,
        reply: oneshot::Sender<Outcome>,
    },
    ActionRegister {
        path: String,
        calls: mpsc::UnboundedSender<ActionCall>,
        reply: oneshot::Sender<Outcome>,
    },
    StateRegister {
        path: String,
        reply: oneshot::Sender<Outcome>,
    },
    StateChanged {
        path: String,
        value: StateUpdate,
        reply: oneshot::Sender<Outcome>,
    },
    StateObserve {
        path: String,
        updates: mpsc::UnboundedSender<StateValue>,
        reply: oneshot::Sender<StateOutcome>,
    },
    EventRegister {
        path: String,
        reply: oneshot::Sender<Outcome>,
    },
    EventEmit {
        path: String,
        value: Payload,
        reply: oneshot::Sender<Outcome>,
    },
    EventListen {
        path: String,
        events: mpsc::UnboundedSender<Payload>,
        reply: oneshot::Sender<Outcome>,
    },
    PropertyRegister {
        path: String,
        handlers: PropertyHandlers,
        reply: oneshot::Sender<Outcome>,
    },
    PropertyGet {
        path: String,
        reply: oneshot::Sender<Outcome>,
    },
    PropertySet {
        path: String,
        value: Payload,
        reply: oneshot::Sender<Outcome>,
    },
    Ping {
        reply: oneshot::Sender<Outcome>,
    },
    WaitConnected {
        reply: oneshot::Sender<()>,
    },
    /// Debug-only: drop the current connection as if the socket closed.
    TestDisconnect,
}

/// A reply produced by a user's action handler, tagged with the epoch of
/// the connection the call arrived on. Replies from before the latest
/// reconnect are silently dropped.
#[derive(Debug)]
pub(crate) struct CallReply {
    pub epoch: u64,
    pub id: u16,
    pub outcome: Outcome,
}

/// Why a connection attempt ended.
#[derive(Debug)]
enum ConnError {
    Connect(std::io::Error),
    Io(std::io::Error),
    Closed,
    Protocol(ProtocolError),
    PingTimeout,
    PingFailed(Payload),
    Register { path: String },
    TestDisconnect,
}

impl fmt::Display for ConnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Io(e) => write!(f, "socket error: {e}"),
            Self::Closed => write!(f, "connection closed"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::PingTimeout => write!(f, "ping timed out"),
            Self::PingFailed(payload) => write!(f, "ping failed: {payload}"),
            Self::Register { path } => write!(f, "registration failed for {path}"),
            Self::TestDisconnect => write!(f, "synthetic disconnect"),
        }
    }
}

pub(crate) struct Session {
    host: String,
    port: u16,
    config: Config,
    commands: mpsc::UnboundedReceiver<Command>,
    exit: watch::Receiver<bool>,
    /// Identity token from the server's hello reply, shared with the facade.
    identity: Arc<Mutex<Option<Payload>>>,
    registry: Registry,
    pending: Pending,
    /// Count of successful connections; tags incoming action calls.
    epoch: u64,
    call_replies_tx: mpsc::UnboundedSender<CallReply>,
    call_replies: mpsc::UnboundedReceiver<CallReply>,
}

impl Session {
    pub fn new(
        host: String,
        port: u16,
        config: Config,
        commands: mpsc::UnboundedReceiver<Command>,
        exit: watch::Receiver<bool>,
        identity: Arc<Mutex<Option<Payload>>>,
    ) -> Self {
        let (call_replies_tx, call_replies) = mpsc::unbounded_channel();
        Self {
            host,
            port,
            config,
            commands,
            exit,
            identity,
            registry: Registry::new(),
            pending: Pending::new(),
            epoch: 0,
            call_replies_tx,
            call_replies,
        }
    }

    /// The outer loop: connect, run, back off, repeat, until exit.
    pub async fn run(mut self) {
        let mut delay = BACKOFF_MIN;
        loop {
            let started = Instant::now();
            match self.run_connection().await {
                Ok(()) => break,
                Err(error) => {
                    tracing::warn!(%error, "connection lost");
                }
            }
            if started.elapsed() >= BACKOFF_RESET_AFTER {
                delay = BACKOFF_MIN;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.exit.changed() => break,
            }
            delay = (delay * 2).min(BACKOFF_MAX);
        }
        tracing::debug!("session exiting");
    }

    /// One connection attempt. `Ok(())` means exit was requested.
    async fn run_connection(&mut self) -> Result<(), ConnError> {
        if *self.exit.borrow() {
            return Ok(());
        }
        let stream = tokio::select! {
            result = TcpStream::connect((self.host.as_str(), self.port)) => {
                result.map_err(ConnError::Connect)?
            }
            _ = self.exit.changed() => return Ok(()),
        };
        tracing::debug!(host = %self.host, port = self.port, "connected");
        self.epoch += 1;

        let mut conn = Conn::new(stream, self.config.idle_ping);
        // The handshake phases block on server replies, so exit has to be
        // able to cut the whole connection short, not just the steady loop.
        let mut exit = self.exit.clone();
        let result = tokio::select! {
            result = self.drive(&mut conn) => result,
            _ = exit.changed() => Ok(()),
        };
        self.teardown();
        result
    }

    async fn drive(&mut self, conn: &mut Conn) -> Result<(), ConnError> {
        self.hello(conn).await?;
        self.reregister(conn).await?;
        tracing::debug!(epoch = self.epoch, "session ready");
        self.steady(conn).await
    }

    /// Exchange hello; exactly one ack frame is expected before anything
    /// else.
    async fn hello(&mut self, conn: &mut Conn) -> Result<(), ConnError> {
        let id = self.identity.lock().clone();
        conn.send_msg(&Outgoing::Hello {
            version: PROTOCOL_VERSION,
            timeout_secs: self.config.server_timeout_secs(),
            id,
        })
        .await?;

        let body = conn.next_frame().await?;
        match Incoming::decode(&body).map_err(ConnError::Protocol)? {
            Incoming::HelloOk { id: None } => Ok(()),
            Incoming::HelloOk { id: Some(id) } => {
                tracing::debug!("server assigned an identity");
                *self.identity.lock() = Some(id);
                Ok(())
            }
            _ => Err(ConnError::Protocol(ProtocolError::UnexpectedMessage(
                "expected a hello reply",
            ))),
        }
    }

    /// Replay the whole registry on a fresh connection. Any error reply
    /// abandons the attempt.
    async fn reregister(&mut self, conn: &mut Conn) -> Result<(), ConnError> {
        for path in self.registry.action_paths() {
            let outcome = self
                .request(conn, |id| Outgoing::ActionRegister {
                    id,
                    path: path.clone(),
                })
                .await?;
            check_registered(&path, outcome)?;
        }

        // States come back in two steps: re-register, then publish the last
        // value so observers converge on it (invariant: a Known value
        // survives reconnects).
        for (path, value) in self.registry.state_values() {
            let outcome = self
                .request(conn, |id| Outgoing::StateRegister {
                    id,
                    path: path.clone(),
                })
                .await?;
            check_registered(&path, outcome)?;
            let outcome = self
                .request(conn, |id| Outgoing::StateChanged {
                    id,
                    path: path.clone(),
                    value: value.clone(),
                })
                .await?;
            check_registered(&path, outcome)?;
        }

        for path in self.registry.observed_paths() {
            let opcode = self.config.state_observe_op;
            let state = self
                .state_request(conn, |id| Outgoing::StateObserve {
                    id,
                    path: path.clone(),
                    opcode,
                })
                .await?;
            let value = match state {
                StateOutcome::Known(payload, age) => StateValue::Known(payload, age),
                StateOutcome::Unknown(age) => StateValue::Unknown(age),
                StateOutcome::Error(error) => {
                    tracing::error!("error while adding {path}: {error}");
                    return Err(ConnError::Register { path });
                }
            };
            if let Some(sink) = self.registry.observed(&path) {
                let _ = sink.send(value);
            }
        }

        for path in self.registry.event_paths() {
            let outcome = self
                .request(conn, |id| Outgoing::EventRegister {
                    id,
                    path: path.clone(),
                })
                .await?;
            check_registered(&path, outcome)?;
        }

        for path in self.registry.listened_paths() {
            let outcome = self
                .request(conn, |id| Outgoing::EventListen {
                    id,
                    path: path.clone(),
                })
                .await?;
            check_registered(&path, outcome)?;
        }

        for path in self.registry.property_paths() {
            let outcome = self
                .request(conn, |id| Outgoing::PropertyRegister {
                    id,
                    path: path.clone(),
                })
                .await?;
            check_registered(&path, outcome)?;
        }

        Ok(())
    }

    /// Send a request and pump incoming frames until its reply arrives.
    /// Used during the handshake phases, where user commands stay queued.
    async fn request(
        &mut self,
        conn: &mut Conn,
        make: impl FnOnce(u16) -> Outgoing,
    ) -> Result<Outcome, ConnError> {
        let (tx, mut rx) = oneshot::channel();
        let id = self.pending.insert(Waiter::Call(tx));
        conn.send_msg(&make(id)).await?;
        loop {
            match rx.try_recv() {
                Ok(outcome) => return Ok(outcome),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => return Err(ConnError::Closed),
            }
            let body = conn.next_frame().await?;
            self.handle_frame(conn, &body).await?;
        }
    }

    /// As [`Session::request`], for a state-reply waiter.
    async fn state_request(
        &mut self,
        conn: &mut Conn,
        make: impl FnOnce(u16) -> Outgoing,
    ) -> Result<StateOutcome, ConnError> {
        let (tx, mut rx) = oneshot::channel();
        let id = self.pending.insert(Waiter::State(tx));
        conn.send_msg(&make(id)).await?;
        loop {
            match rx.try_recv() {
                Ok(state) => return Ok(state),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => return Err(ConnError::Closed),
            }
            let body = conn.next_frame().await?;
            self.handle_frame(conn, &body).await?;
        }
    }

    /// The steady-state multiplex loop.
    async fn steady(&mut self, conn: &mut Conn) -> Result<(), ConnError> {
        conn.idle_deadline = Instant::now() + self.config.idle_ping;
        loop {
            // A watch notification consumed by a cancelled select arm would
            // otherwise be lost; the flag itself is authoritative.
            if *self.exit.borrow() {
                return Ok(());
            }
            let deadline = match conn.ping_deadline {
                Some(ping) => ping.min(conn.idle_deadline),
                None => conn.idle_deadline,
            };
            tokio::select! {
                chunk = conn.bytes.recv() => {
                    let chunk = chunk.ok_or(ConnError::Closed)?;
                    conn.unpacker.push(&chunk);
                    while let Some(body) = conn.unpacker.read().map_err(ConnError::Protocol)? {
                        self.handle_frame(conn, &body).await?;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(conn, command).await?,
                    // Every facade handle is gone; shut down.
                    None => return Ok(()),
                },
                Some(reply) = self.call_replies.recv() => {
                    self.handle_call_reply(conn, reply).await?;
                }
                Some(outcome) = conn.ping_results.recv() => match outcome {
                    Outcome::Success(_) => conn.ping_deadline = None,
                    Outcome::Error(error) => return Err(ConnError::PingFailed(error)),
                },
                _ = self.exit.changed() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => {
                    let now = Instant::now();
                    if conn.ping_deadline.is_some_and(|ping| now >= ping) {
                        return Err(ConnError::PingTimeout);
                    }
                    if now >= conn.idle_deadline {
                        let id = self.pending.insert(Waiter::Ping(conn.ping_results_tx.clone()));
                        conn.send_msg(&Outgoing::Ping { id }).await?;
                        conn.ping_deadline = Some(Instant::now() + self.config.ping_timeout);
                        tracing::trace!(id, "idle ping");
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, conn: &mut Conn, body: &[u8]) -> Result<(), ConnError> {
        let message = Incoming::decode(body).map_err(ConnError::Protocol)?;
        tracing::trace!(?message, "received");
        match message {
            Incoming::HelloOk { .. } => Err(ConnError::Protocol(
                ProtocolError::UnexpectedMessage("hello reply after handshake"),
            )),
            Incoming::Reply { id, reply } => self
                .pending
                .deliver(id, reply)
                .map_err(ConnError::Protocol),
            Incoming::ActionCall { id, path, args } => {
                let sink = self
                    .registry
                    .action(&path)
                    .ok_or_else(|| ConnError::Protocol(ProtocolError::UnknownPath(path.clone())))?;
                let call = ActionCall::new(self.epoch, id, args, self.call_replies_tx.clone());
                if sink.send(call).is_err() {
                    // The handler receiver is gone; fail the call rather
                    // than leave the remote caller waiting.
                    tracing::warn!(%path, "action handler dropped, failing call");
                    conn.send_msg(&Outgoing::Reply {
                        id,
                        outcome: Outcome::Error(Payload::from(format!("no handler for {path}"))),
                    })
                    .await?;
                }
                Ok(())
            }
            Incoming::PropertyGet { id, path } => {
                let handlers = self
                    .registry
                    .property(&path)
                    .ok_or_else(|| ConnError::Protocol(ProtocolError::UnknownPath(path.clone())))?;
                let outcome = match (handlers.get)() {
                    Ok(value) => Outcome::Success(value),
                    Err(error) => Outcome::Error(error),
                };
                conn.send_msg(&Outgoing::Reply { id, outcome }).await
            }
            Incoming::PropertySet { id, path, value } => {
                let handlers = self
                    .registry
                    .property(&path)
                    .ok_or_else(|| ConnError::Protocol(ProtocolError::UnknownPath(path.clone())))?;
                let outcome = match (handlers.set)(value) {
                    Ok(()) => Outcome::Success(Payload::nil()),
                    Err(error) => Outcome::Error(error),
                };
                conn.send_msg(&Outgoing::Reply { id, outcome }).await
            }
            Incoming::Event { path, value } => {
                let sink = self
                    .registry
                    .listened(&path)
                    .ok_or_else(|| ConnError::Protocol(ProtocolError::UnknownPath(path.clone())))?;
                let _ = sink.send(value);
                Ok(())
            }
            Incoming::StateChanged { path, value } => {
                let sink = self
                    .registry
                    .observed(&path)
                    .ok_or_else(|| ConnError::Protocol(ProtocolError::UnknownPath(path.clone())))?;
                let _ = sink.send(value);
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, conn: &mut Conn, command: Command) -> Result<(), ConnError> {
        match command {
            Command::ActionCall { path, args, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::ActionCall { id, path, args })
                    .await
            }
            Command::ActionRegister { path, calls, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                if self.registry.add_action(&path, calls).is_err() {
                    let _ = reply.send(Outcome::Error(already_registered(&path)));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::ActionRegister { id, path })
                    .await
            }
            Command::StateRegister { path, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                if self.registry.add_state(&path).is_err() {
                    let _ = reply.send(Outcome::Error(already_registered(&path)));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::StateRegister { id, path })
                    .await
            }
            Command::StateChanged { path, value, reply } => {
                if !self.registry.set_state(&path, value.clone()) {
                    let _ = reply.send(Outcome::Error(Payload::from(format!(
                        "not a registered state: {path}"
                    ))));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::StateChanged { id, path, value })
                    .await
            }
            Command::StateObserve {
                path,
                updates,
                reply,
            } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(StateOutcome::Error(error));
                    return Ok(());
                }
                if self.registry.add_observed(&path, updates).is_err() {
                    let _ = reply.send(StateOutcome::Error(already_registered(&path)));
                    return Ok(());
                }
                let opcode = self.config.state_observe_op;
                let id = self.pending.insert(Waiter::State(reply));
                conn.send_msg(&Outgoing::StateObserve { id, path, opcode }).await
            }
            Command::EventRegister { path, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                if self.registry.add_event(&path).is_err() {
                    let _ = reply.send(Outcome::Error(already_registered(&path)));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::EventRegister { id, path })
                    .await
            }
            Command::EventEmit { path, value, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::EventEmit { id, path, value })
                    .await
            }
            Command::EventListen {
                path,
                events,
                reply,
            } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                if self.registry.add_listened(&path, events).is_err() {
                    let _ = reply.send(Outcome::Error(already_registered(&path)));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::EventListen { id, path })
                    .await
            }
            Command::PropertyRegister {
                path,
                handlers,
                reply,
            } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                if self.registry.add_property(&path, handlers).is_err() {
                    let _ = reply.send(Outcome::Error(already_registered(&path)));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::PropertyRegister { id, path })
                    .await
            }
            Command::PropertyGet { path, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::PropertyGet { id, path })
                    .await
            }
            Command::PropertySet { path, value, reply } => {
                if let Err(error) = check_path(&path) {
                    let _ = reply.send(Outcome::Error(error));
                    return Ok(());
                }
                self.submit(conn, reply, |id| Outgoing::PropertySet { id, path, value })
                    .await
            }
            Command::Ping { reply } => self.submit(conn, reply, |id| Outgoing::Ping { id }).await,
            Command::WaitConnected { reply } => {
                // Commands are only drained once a connection is up, so
                // reaching here means connected.
                let _ = reply.send(());
                Ok(())
            }
            Command::TestDisconnect => {
                tracing::debug!("synthetic disconnect requested");
                Err(ConnError::TestDisconnect)
            }
        }
    }

    /// Record a pending waiter, then send the request carrying its id.
    async fn submit(
        &mut self,
        conn: &mut Conn,
        reply: oneshot::Sender<Outcome>,
        make: impl FnOnce(u16) -> Outgoing,
    ) -> Result<(), ConnError> {
        let id = self.pending.insert(Waiter::Call(reply));
        conn.send_msg(&make(id)).await
    }

    async fn handle_call_reply(
        &mut self,
        conn: &mut Conn,
        reply: CallReply,
    ) -> Result<(), ConnError> {
        if reply.epoch != self.epoch {
            tracing::trace!(
                reply_epoch = reply.epoch,
                epoch = self.epoch,
                "dropping action reply from a previous connection"
            );
            return Ok(());
        }
        conn.send_msg(&Outgoing::Reply {
            id: reply.id,
            outcome: reply.outcome,
        })
        .await
    }

    /// After a connection ends for any reason: fail every in-flight
    /// request, and tell every observer the state is unknown until the
    /// next connection re-observes it.
    fn teardown(&mut self) {
        if self.pending.len() > 0 {
            tracing::debug!(pending = self.pending.len(), "failing in-flight requests");
        }
        self.pending.drain_disconnected();
        for (path, sink) in self.registry.observed_sinks() {
            tracing::trace!(%path, "observed state unknown until reconnect");
            let _ = sink.send(StateValue::unknown());
        }
    }
}

fn check_path(path: &str) -> Result<(), Payload> {
    if path.contains('\0') {
        return Err(Payload::from(format!("invalid path: {path:?}")));
    }
    Ok(())
}

fn already_registered(path: &str) -> Payload {
    Payload::from(format!("already registered: {path}"))
}

fn check_registered(path: &str, outcome: Outcome) -> Result<(), ConnError> {
    match outcome {
        Outcome::Success(_) => Ok(()),
        Outcome::Error(error) => {
            tracing::error!("error while adding {path}: {error}");
            Err(ConnError::Register {
                path: path.to_owned(),
            })
        }
    }
}

/// Per-connection resources: the write half, the receive task and its
/// channel, the unpacker, and the liveness deadlines.
struct Conn {
    write: OwnedWriteHalf,
    bytes: mpsc::Receiver<Bytes>,
    reader: JoinHandle<()>,
    unpacker: Unpacker,
    idle_ping: Duration,
    idle_deadline: Instant,
    ping_deadline: Option<Instant>,
    ping_results_tx: mpsc::UnboundedSender<Outcome>,
    ping_results: mpsc::UnboundedReceiver<Outcome>,
}

impl Conn {
    fn new(stream: TcpStream, idle_ping: Duration) -> Self {
        let (read, write) = stream.into_split();
        let (bytes_tx, bytes) = mpsc::channel(READ_QUEUE_DEPTH);
        let reader = tokio::spawn(read_task(read, bytes_tx));
        let (ping_results_tx, ping_results) = mpsc::unbounded_channel();
        Self {
            write,
            bytes,
            reader,
            unpacker: Unpacker::new(),
            idle_ping,
            idle_deadline: Instant::now() + idle_ping,
            ping_deadline: None,
            ping_results_tx,
            ping_results,
        }
    }

    /// Single-writer socket send; every send pushes the idle deadline out.
    async fn send_msg(&mut self, message: &Outgoing) -> Result<(), ConnError> {
        let frame = message.encode().map_err(ConnError::Protocol)?;
        self.write.write_all(&frame).await.map_err(ConnError::Io)?;
        self.idle_deadline = Instant::now() + self.idle_ping;
        Ok(())
    }

    /// Next whole frame body; used during the handshake phases.
    async fn next_frame(&mut self) -> Result<Bytes, ConnError> {
        loop {
            if let Some(body) = self.unpacker.read().map_err(ConnError::Protocol)? {
                return Ok(body);
            }
            match self.bytes.recv().await {
                Some(chunk) => self.unpacker.push(&chunk),
                None => return Err(ConnError::Closed),
            }
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_task(mut read: OwnedReadHalf, tx: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        match read.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::trace!(%error, "socket read failed");
                break;
            }
        }
    }
    // Dropping tx closes the channel; the session sees that as the socket
    // closing.
}
