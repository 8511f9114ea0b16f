//! In-flight request table, keyed by 16-bit correlation id.

use std::collections::HashMap;

use eshet_proto::{AnyReply, Outcome, Payload, ProtocolError, StateOutcome};
use tokio::sync::{mpsc, oneshot};

/// Where a reply for one correlation id goes, and which variants it accepts.
#[derive(Debug)]
pub(crate) enum Waiter {
    /// Accepts Success | Error.
    Call(oneshot::Sender<Outcome>),
    /// Accepts Known | Unknown | Error.
    State(oneshot::Sender<StateOutcome>),
    /// An engine-issued ping; routed to the session's ping-result sink.
    Ping(mpsc::UnboundedSender<Outcome>),
}

/// Maps correlation ids to waiters. Ids are unique for the lifetime of one
/// connection; the table is cleared on disconnect, so the id counter may
/// wrap and reuse freed ids.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    waiters: HashMap<u16, Waiter>,
    next_id: u16,
}

impl Pending {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Pick a free id and insert the waiter under it.
    pub fn insert(&mut self, waiter: Waiter) -> u16 {
        // With 2^16 ids and the table cleared every reconnect this loop all
        // but never skips; it only matters if a caller floods the wire.
        let mut id = self.next_id;
        while self.waiters.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);
        self.waiters.insert(id, waiter);
        id
    }

    /// Remove the waiter for `id` and hand it the reply, narrowed to the
    /// kind it expects.
    pub fn deliver(&mut self, id: u16, reply: AnyReply) -> Result<(), ProtocolError> {
        let mismatch = |expected, got: AnyReply| ProtocolError::ReplyKindMismatch {
            id,
            expected,
            got: got.kind(),
        };
        match self
            .waiters
            .remove(&id)
            .ok_or(ProtocolError::UnknownId(id))?
        {
            Waiter::Call(tx) => {
                let outcome = reply
                    .into_outcome()
                    .map_err(|got| mismatch("Success or Error", got))?;
                let _ = tx.send(outcome);
            }
            Waiter::Ping(tx) => {
                let outcome = reply
                    .into_outcome()
                    .map_err(|got| mismatch("Success or Error", got))?;
                let _ = tx.send(outcome);
            }
            Waiter::State(tx) => {
                let state = reply
                    .into_state()
                    .map_err(|got| mismatch("a state reply or Error", got))?;
                let _ = tx.send(state);
            }
        }
        Ok(())
    }

    /// Kill every waiter with `Error("disconnected")` and clear the table.
    pub fn drain_disconnected(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            let error = Payload::from("disconnected");
            match waiter {
                Waiter::Call(tx) => {
                    let _ = tx.send(Outcome::Error(error));
                }
                Waiter::State(tx) => {
                    let _ = tx.send(StateOutcome::Error(error));
                }
                Waiter::Ping(tx) => {
                    let _ = tx.send(Outcome::Error(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_matching_waiter() {
        let mut pending = Pending::new();
        let (tx, mut rx) = oneshot::channel();
        let id = pending.insert(Waiter::Call(tx));
        pending
            .deliver(id, AnyReply::Success(Payload::from(5i64)))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outcome::Success(Payload::from(5i64)));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn unknown_id_is_a_protocol_error() {
        let mut pending = Pending::new();
        assert_eq!(
            pending.deliver(3, AnyReply::Unknown(None)),
            Err(ProtocolError::UnknownId(3))
        );
    }

    #[test]
    fn kind_mismatch_is_a_protocol_error() {
        let mut pending = Pending::new();
        let (tx, _rx) = oneshot::channel();
        let id = pending.insert(Waiter::Call(tx));
        assert!(matches!(
            pending.deliver(id, AnyReply::Unknown(None)),
            Err(ProtocolError::ReplyKindMismatch { .. })
        ));

        let (tx, _rx) = oneshot::channel();
        let id = pending.insert(Waiter::State(tx));
        assert!(matches!(
            pending.deliver(id, AnyReply::Success(Payload::nil())),
            Err(ProtocolError::ReplyKindMismatch { .. })
        ));
    }

    #[test]
    fn errors_narrow_to_either_kind() {
        let mut pending = Pending::new();
        let (tx, mut rx) = oneshot::channel();
        let id = pending.insert(Waiter::State(tx));
        pending
            .deliver(id, AnyReply::Error(Payload::from("nope")))
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StateOutcome::Error(Payload::from("nope"))
        );
    }

    #[test]
    fn ids_are_reused_only_after_extraction() {
        let mut pending = Pending::new();
        pending.next_id = u16::MAX;
        let (tx, _rx) = oneshot::channel();
        let id = pending.insert(Waiter::Call(tx));
        assert_eq!(id, u16::MAX);
        // Wraps to 0 for the next insert.
        let (tx, _rx) = oneshot::channel();
        assert_eq!(pending.insert(Waiter::Call(tx)), 0);
        // A still-pending id is skipped once the counter comes back around.
        pending.next_id = u16::MAX;
        let (tx, _rx) = oneshot::channel();
        assert_eq!(pending.insert(Waiter::Call(tx)), 1);
    }

    #[test]
    fn drain_reports_disconnected_exactly_once() {
        let mut pending = Pending::new();
        let (tx, mut rx) = oneshot::channel();
        pending.insert(Waiter::Call(tx));
        let (stx, mut srx) = oneshot::channel();
        pending.insert(Waiter::State(stx));

        pending.drain_disconnected();
        assert_eq!(
            rx.try_recv().unwrap(),
            Outcome::Error(Payload::from("disconnected"))
        );
        assert_eq!(
            srx.try_recv().unwrap(),
            StateOutcome::Error(Payload::from("disconnected"))
        );
        assert_eq!(pending.len(), 0);
    }
}
