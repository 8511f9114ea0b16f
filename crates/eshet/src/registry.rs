//! The client's declarative registration set.
//!
//! Registrations are created by facade commands and outlive any single
//! connection: the session replays the whole set after every reconnect.
//! There is no unregister operation; sinks live until the client is
//! destroyed.

use std::collections::{HashMap, HashSet};

use eshet_proto::{Payload, StateUpdate, StateValue};
use tokio::sync::mpsc;

use crate::client::ActionCall;

/// Handlers for a property this client owns. Both run inline on the session
/// task, so they must be quick.
pub(crate) struct PropertyHandlers {
    pub get: Box<dyn Fn() -> Result<Payload, Payload> + Send>,
    pub set: Box<dyn Fn(Payload) -> Result<(), Payload> + Send>,
}

impl std::fmt::Debug for PropertyHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyHandlers").finish_non_exhaustive()
    }
}

/// A path was already registered under the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Duplicate(pub String);

#[derive(Debug, Default)]
pub(crate) struct Registry {
    actions: HashMap<String, mpsc::UnboundedSender<ActionCall>>,
    /// Owned states, with the last published value (initially Unknown).
    states: HashMap<String, StateUpdate>,
    events: HashSet<String>,
    observed: HashMap<String, mpsc::UnboundedSender<StateValue>>,
    listened: HashMap<String, mpsc::UnboundedSender<Payload>>,
    properties: HashMap<String, PropertyHandlers>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(
        &mut self,
        path: &str,
        sink: mpsc::UnboundedSender<ActionCall>,
    ) -> Result<(), Duplicate> {
        insert_unique(&mut self.actions, path, sink)
    }

    pub fn action(&self, path: &str) -> Option<&mpsc::UnboundedSender<ActionCall>> {
        self.actions.get(path)
    }

    pub fn add_state(&mut self, path: &str) -> Result<(), Duplicate> {
        insert_unique(&mut self.states, path, StateUpdate::Unknown)
    }

    /// Record the owner-published value so it can be replayed on reconnect.
    /// Returns false if the path is not a registered state.
    pub fn set_state(&mut self, path: &str, value: StateUpdate) -> bool {
        match self.states.get_mut(path) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn add_event(&mut self, path: &str) -> Result<(), Duplicate> {
        if !self.events.insert(path.to_owned()) {
            return Err(Duplicate(path.to_owned()));
        }
        Ok(())
    }

    pub fn add_observed(
        &mut self,
        path: &str,
        sink: mpsc::UnboundedSender<StateValue>,
    ) -> Result<(), Duplicate> {
        insert_unique(&mut self.observed, path, sink)
    }

    pub fn observed(&self, path: &str) -> Option<&mpsc::UnboundedSender<StateValue>> {
        self.observed.get(path)
    }

    pub fn add_listened(
        &mut self,
        path: &str,
        sink: mpsc::UnboundedSender<Payload>,
    ) -> Result<(), Duplicate> {
        insert_unique(&mut self.listened, path, sink)
    }

    pub fn listened(&self, path: &str) -> Option<&mpsc::UnboundedSender<Payload>> {
        self.listened.get(path)
    }

    pub fn add_property(&mut self, path: &str, handlers: PropertyHandlers) -> Result<(), Duplicate> {
        insert_unique(&mut self.properties, path, handlers)
    }

    pub fn property(&self, path: &str) -> Option<&PropertyHandlers> {
        self.properties.get(path)
    }

    // Replay accessors. Paths are cloned so the session can interleave
    // requests with registry lookups while iterating.

    pub fn action_paths(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn state_values(&self) -> Vec<(String, StateUpdate)> {
        self.states
            .iter()
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }

    pub fn observed_paths(&self) -> Vec<String> {
        self.observed.keys().cloned().collect()
    }

    pub fn event_paths(&self) -> Vec<String> {
        self.events.iter().cloned().collect()
    }

    pub fn listened_paths(&self) -> Vec<String> {
        self.listened.keys().cloned().collect()
    }

    pub fn property_paths(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    /// Every observed-state sink, for the synthetic Unknown on disconnect.
    pub fn observed_sinks(
        &self,
    ) -> impl Iterator<Item = (&String, &mpsc::UnboundedSender<StateValue>)> {
        self.observed.iter()
    }
}

fn insert_unique<V>(map: &mut HashMap<String, V>, path: &str, value: V) -> Result<(), Duplicate> {
    if map.contains_key(path) {
        return Err(Duplicate(path.to_owned()));
    }
    map.insert(path.to_owned(), value);
    Ok(())
}
