//! Thread-safe client facade.
//!
//! A [`Client`] is a handle onto the session engine task. Every method
//! builds a command carrying its reply sink and enqueues it; nothing here
//! touches the network, so calls return as soon as the command is queued
//! and the await completes when the engine delivers the reply.

use core::fmt;
use std::sync::Arc;

use eshet_proto::{Outcome, Payload, StateOutcome, StateUpdate, StateValue};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{Config, ConfigError};
use crate::registry::PropertyHandlers;
use crate::session::{CallReply, Command, Session};

/// A failed client operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An Error reply, carrying its payload. Server-supplied for remote
    /// failures; synthesised (for example `"disconnected"`) for failures
    /// the client detects itself.
    Reply(Payload),
    /// The session engine is gone, so the command could not be delivered.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply(payload) => write!(f, "Error({payload})"),
            Self::Closed => write!(f, "client closed"),
        }
    }
}

impl std::error::Error for Error {}

/// An incoming call on an action this client registered.
///
/// The holder must eventually [`respond`](ActionCall::respond). Responses
/// produced after the connection that delivered the call has gone are
/// silently dropped.
#[derive(Debug)]
pub struct ActionCall {
    /// The caller's arguments, usually a MessagePack array.
    pub args: Payload,
    epoch: u64,
    id: u16,
    reply: mpsc::UnboundedSender<CallReply>,
}

impl ActionCall {
    pub(crate) fn new(
        epoch: u64,
        id: u16,
        args: Payload,
        reply: mpsc::UnboundedSender<CallReply>,
    ) -> Self {
        Self {
            args,
            epoch,
            id,
            reply,
        }
    }

    /// Send the result back to the caller.
    pub fn respond(self, result: Result<Payload, Payload>) {
        let _ = self.reply.send(CallReply {
            epoch: self.epoch,
            id: self.id,
            outcome: Outcome::from(result),
        });
    }
}

struct Shared {
    exit: watch::Sender<bool>,
    identity: Arc<Mutex<Option<Payload>>>,
}

/// Handle to an ESHET client session.
///
/// Cheap to clone; all clones talk to the same session. Dropping the last
/// clone shuts the session down, as does [`Client::exit`].
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Client {
    /// Connect to a server with default [`Config`] and no prior identity.
    ///
    /// Spawns the session engine onto the current tokio runtime; the
    /// connection is made (and remade) in the background.
    pub fn connect(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(host, port, Config::default(), None).expect("default config is valid")
    }

    /// Connect presenting an identity token from an earlier session, so the
    /// server can hand back ownership of this client's registrations.
    pub fn with_identity(host: impl Into<String>, port: u16, identity: Payload) -> Self {
        Self::with_config(host, port, Config::default(), Some(identity))
            .expect("default config is valid")
    }

    pub fn with_config(
        host: impl Into<String>,
        port: u16,
        config: Config,
        identity: Option<Payload>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (exit, exit_rx) = watch::channel(false);
        let identity = Arc::new(Mutex::new(identity));
        let session = Session::new(
            host.into(),
            port,
            config,
            commands_rx,
            exit_rx,
            identity.clone(),
        );
        tokio::spawn(session.run());
        Ok(Self {
            commands,
            shared: Arc::new(Shared { exit, identity }),
        })
    }

    /// The identity token in use, once the server has assigned one.
    pub fn identity(&self) -> Option<Payload> {
        self.shared.identity.lock().clone()
    }

    /// Completes once the session is connected, hello has been exchanged,
    /// and all registrations have been replayed.
    pub async fn wait_connected(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::WaitConnected { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Call an action registered by another client.
    pub async fn action_call(
        &self,
        path: impl Into<String>,
        args: impl Into<Payload>,
    ) -> Result<Payload, Error> {
        let path = path.into();
        let args = args.into();
        self.call(|reply| Command::ActionCall { path, args, reply })
            .await
    }

    /// Register an action; incoming calls arrive on the returned receiver.
    pub async fn action_register(
        &self,
        path: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<ActionCall>, Error> {
        let path = path.into();
        let (calls, calls_rx) = mpsc::unbounded_channel();
        self.call(|reply| Command::ActionRegister { path, calls, reply })
            .await?;
        Ok(calls_rx)
    }

    /// Register a state. The state starts Unknown; publish with
    /// [`Client::state_changed`] / [`Client::state_unknown`].
    pub async fn state_register(&self, path: impl Into<String>) -> Result<(), Error> {
        let path = path.into();
        self.call(|reply| Command::StateRegister { path, reply })
            .await
            .map(drop)
    }

    /// Publish a new value for an owned state. The value is also re-sent
    /// after every reconnect.
    pub async fn state_changed(
        &self,
        path: impl Into<String>,
        value: impl Into<Payload>,
    ) -> Result<(), Error> {
        let path = path.into();
        let value = StateUpdate::Known(value.into());
        self.call(|reply| Command::StateChanged { path, value, reply })
            .await
            .map(drop)
    }

    /// Mark an owned state unknown.
    pub async fn state_unknown(&self, path: impl Into<String>) -> Result<(), Error> {
        let path = path.into();
        let value = StateUpdate::Unknown;
        self.call(|reply| Command::StateChanged { path, value, reply })
            .await
            .map(drop)
    }

    /// Observe a state. Returns the current value (with its age, if the
    /// server reports one) and a receiver for subsequent updates. After a
    /// disconnect the receiver yields one synthetic Unknown, then the
    /// value re-observed on the next connection.
    pub async fn state_observe(
        &self,
        path: impl Into<String>,
    ) -> Result<(StateValue, mpsc::UnboundedReceiver<StateValue>), Error> {
        let path = path.into();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.send(Command::StateObserve {
            path,
            updates,
            reply,
        })?;
        match rx.await.map_err(|_| Error::Closed)? {
            StateOutcome::Known(payload, age) => Ok((StateValue::Known(payload, age), updates_rx)),
            StateOutcome::Unknown(age) => Ok((StateValue::Unknown(age), updates_rx)),
            StateOutcome::Error(payload) => Err(Error::Reply(payload)),
        }
    }

    pub async fn event_register(&self, path: impl Into<String>) -> Result<(), Error> {
        let path = path.into();
        self.call(|reply| Command::EventRegister { path, reply })
            .await
            .map(drop)
    }

    pub async fn event_emit(
        &self,
        path: impl Into<String>,
        value: impl Into<Payload>,
    ) -> Result<(), Error> {
        let path = path.into();
        let value = value.into();
        self.call(|reply| Command::EventEmit { path, value, reply })
            .await
            .map(drop)
    }

    /// Listen to an event; notifications arrive on the returned receiver.
    pub async fn event_listen(
        &self,
        path: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<Payload>, Error> {
        let path = path.into();
        let (events, events_rx) = mpsc::unbounded_channel();
        self.call(|reply| Command::EventListen {
            path,
            events,
            reply,
        })
        .await?;
        Ok(events_rx)
    }

    /// Register a property. The handlers run inline on the session task,
    /// so they must not block.
    pub async fn property_register<G, S>(
        &self,
        path: impl Into<String>,
        get: G,
        set: S,
    ) -> Result<(), Error>
    where
        G: Fn() -> Result<Payload, Payload> + Send + 'static,
        S: Fn(Payload) -> Result<(), Payload> + Send + 'static,
    {
        let path = path.into();
        let handlers = PropertyHandlers {
            get: Box::new(get),
            set: Box::new(set),
        };
        self.call(|reply| Command::PropertyRegister {
            path,
            handlers,
            reply,
        })
        .await
        .map(drop)
    }

    /// Get a remote property.
    pub async fn get(&self, path: impl Into<String>) -> Result<Payload, Error> {
        let path = path.into();
        self.call(|reply| Command::PropertyGet { path, reply }).await
    }

    /// Set a remote property.
    pub async fn set(
        &self,
        path: impl Into<String>,
        value: impl Into<Payload>,
    ) -> Result<(), Error> {
        let path = path.into();
        let value = value.into();
        self.call(|reply| Command::PropertySet { path, value, reply })
            .await
            .map(drop)
    }

    /// Application-level ping round-trip.
    pub async fn ping(&self) -> Result<(), Error> {
        self.call(|reply| Command::Ping { reply }).await.map(drop)
    }

    /// Debug-only: drop the current connection as if the socket closed,
    /// exercising the reconnect path.
    pub fn test_disconnect(&self) {
        let _ = self.commands.send(Command::TestDisconnect);
    }

    /// Ask the engine to terminate. In-flight requests fail with
    /// `Error("disconnected")`.
    pub fn exit(&self) {
        let _ = self.shared.exit.send(true);
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<Outcome>) -> Command,
    ) -> Result<Payload, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        match rx.await.map_err(|_| Error::Closed)? {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Error(payload) => Err(Error::Reply(payload)),
        }
    }
}
