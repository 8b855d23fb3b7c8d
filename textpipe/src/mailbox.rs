//! Mailbox actor engine
//!
//! Every stream owns exactly one actor. The actor's state lives inside a
//! tokio task and is only touched by the dispatch loop, so the state itself
//! needs no locking: all coordination is expressed as message order.
//!
//! # Workflow
//!
//! 10. Caller: `mailbox.post(message)` (never blocks, the queue is unbounded)
//! 20. Loop: receive the next message in global FIFO order
//! 30. Loop: `actor.handle(message)` mutates the state
//! 40. Loop: repeat until `handle` returns [`Flow::Stop`] or every
//!     [`Mailbox`] handle is dropped
//! 50. Loop: call `actor.stopped()`, drop the actor, close the queue and
//!     drop leftover messages
//!
//! After step 50, `post` returns `false` and `closed()` resolves. The caller
//! is never panicked at.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

/// What the dispatch loop should do after a message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Sequential owner of a stream's state
pub trait Actor: Send + 'static {
    type Message: fmt::Debug + Send + 'static;

    fn handle(&mut self, message: Self::Message) -> Flow;

    /// Called once when the loop exits, whatever the reason.
    fn stopped(&mut self) {}
}

/// Sending side of an actor's mailbox
///
/// Cloning gives another handle to the same queue. The loop keeps running
/// while at least one handle is alive.
pub struct Mailbox<M> {
    tx: mpsc::UnboundedSender<M>,
    name: Arc<str>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: Arc::clone(&self.name),
        }
    }
}

impl<M: fmt::Debug> Mailbox<M> {
    /// Enqueue a message.
    ///
    /// Returns `false` if the actor has already stopped. The message is
    /// then dropped.
    pub fn post(&self, message: M) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(mpsc::error::SendError(message)) => {
                trace!(mailbox = %self.name, ?message, "actor stopped, message dropped");
                false
            }
        }
    }
}

impl<M> Mailbox<M> {
    /// Whether the dispatch loop has terminated
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the dispatch loop has terminated
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle that does not keep the loop alive
    #[must_use]
    pub fn downgrade(&self) -> WeakMailbox<M> {
        WeakMailbox {
            tx: self.tx.downgrade(),
            name: Arc::clone(&self.name),
        }
    }
}

impl<M> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mailbox(name={}, closed={})",
            self.name,
            self.tx.is_closed()
        )
    }
}

/// Non-owning mailbox handle, used by background helpers such as timers
pub struct WeakMailbox<M> {
    tx: mpsc::WeakUnboundedSender<M>,
    name: Arc<str>,
}

impl<M> WeakMailbox<M> {
    /// Returns `None` once every strong handle is gone
    #[must_use]
    pub fn upgrade(&self) -> Option<Mailbox<M>> {
        self.tx.upgrade().map(|tx| Mailbox {
            tx,
            name: Arc::clone(&self.name),
        })
    }
}

/// Start the dispatch loop for `actor` on the current tokio runtime.
///
/// # Panics
///
/// Panics if called outside of a tokio runtime.
pub fn spawn<A: Actor>(name: &str, actor: A) -> Mailbox<A::Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    let name: Arc<str> = Arc::from(name);
    tokio::spawn(run(Arc::clone(&name), actor, rx));
    Mailbox { tx, name }
}

async fn run<A: Actor>(name: Arc<str>, mut actor: A, mut rx: mpsc::UnboundedReceiver<A::Message>) {
    debug!(mailbox = %name, "actor started");

    while let Some(message) = rx.recv().await {
        trace!(mailbox = %name, ?message, "dispatch");
        if actor.handle(message) == Flow::Stop {
            break;
        }
    }

    actor.stopped();
    // Release the actor's resources before `closed()` waiters wake up
    drop(actor);
    rx.close();

    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    debug!(mailbox = %name, dropped, "actor stopped");
}
