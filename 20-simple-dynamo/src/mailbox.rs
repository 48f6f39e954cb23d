//! Reply routing for operations that wait on peers.
//!
//! A read miss, a global dump and a recovery each fan a request out and then
//! wait for replies that arrive on unrelated inbound connections. Each kind of
//! operation owns a [`Mailbox`]: opening it takes an async gate (so at most one
//! operation of that kind is in flight per node) and installs a fresh channel
//! that the inbound handlers deliver into. Dropping the [`Session`] tears the
//! channel down, so late replies for a finished operation are dropped instead
//! of leaking into the next one.
//!
//! That only covers replies arriving between sessions. A `globalQuery` reply
//! names no responder, so one that straggles in after the next dump has opened
//! is counted by that dump like any fresh reply.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout_at};

/// Outcome of waiting for the next reply.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Wait<T> {
    Item(T),
    Deadline,
    Shutdown,
}

pub(crate) struct Mailbox<T> {
    gate: tokio::sync::Mutex<()>,
    route: Mutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            route: Mutex::new(None),
        }
    }

    /// Waits for any earlier operation of this kind to finish, then starts
    /// accepting replies.
    pub(crate) async fn open(&self) -> Session<'_, T> {
        let gate = self.gate.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.route() = Some(tx);
        Session {
            mailbox: self,
            rx,
            _gate: gate,
        }
    }

    /// Hands a reply to the open operation. Returns `false` when nothing is
    /// waiting and the reply was dropped.
    pub(crate) fn deliver(&self, item: T) -> bool {
        match self.route().as_ref() {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    fn route(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<T>>> {
        self.route.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct Session<'a, T> {
    mailbox: &'a Mailbox<T>,
    rx: mpsc::UnboundedReceiver<T>,
    _gate: tokio::sync::MutexGuard<'a, ()>,
}

impl<T> Session<'_, T> {
    /// Next reply, unless `deadline` passes or the node starts shutting down.
    pub(crate) async fn recv_until(
        &mut self,
        deadline: Instant,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Wait<T> {
        tokio::select! {
            item = timeout_at(deadline, self.rx.recv()) => match item {
                Ok(Some(item)) => Wait::Item(item),
                Ok(None) | Err(_) => Wait::Deadline,
            },
            _ = shutdown.wait_for(|stopping| *stopping) => Wait::Shutdown,
        }
    }
}

impl<T> Drop for Session<'_, T> {
    fn drop(&mut self) {
        *self.mailbox.route() = None;
    }
}
