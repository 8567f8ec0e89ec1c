//! Mailbox: the FIFO of messages waiting for one worker thread
//!
//! Posting links the message into the queue under the global lock and
//! wakes the owning thread outside it. The owner drains one message per
//! [`Mailbox::process_messages`] call so other loop duties keep running.
//! The queue owns only the linkage; message storage belongs to whoever
//! posted it. Dropping a mailbox leaves queued messages tagged as
//! linked, so drain it ([`Mailbox::clear`] or
//! [`Mailbox::process_messages`]) before it goes away.
//!
//! Author: Moroya Sakamoto

use crate::event_loop::{EventLoop, RunStats};
use crate::list::DList;
use crate::message::{Message, SyncMessage};
use crate::signal::{DefaultWaiter, Signable, Waiter};

/// Thread-owned message queue
pub struct Mailbox<'a> {
    /// Pending messages, oldest first
    queue: DList<'a, dyn Message<'a> + 'a>,
    /// Woken on every post
    owner: &'a dyn Signable,
}

impl<'a> Mailbox<'a> {
    /// Mailbox that wakes `owner` on every post
    pub const fn new(owner: &'a dyn Signable) -> Self {
        Self {
            queue: DList::zeroed(),
            owner,
        }
    }

    /// Queue `msg` and wake the owner. Halts if `msg` is already queued
    /// anywhere.
    #[track_caller]
    pub fn post(&self, msg: &'a dyn Message<'a>) {
        self.queue.put_last(msg);
        tracing::trace!(mailbox = %self.queue.id(), "message posted");
        self.owner.signal();
    }

    /// Post `msg` and block until its service returns it.
    ///
    /// # Safety
    ///
    /// `msg` may live shorter than the mailbox. The caller guarantees
    /// that the waiter of `msg` is signaled by nothing but the completion
    /// of `msg` itself, that no other thread holds a reference to `msg`
    /// until this call returns, and that a service keeping `msg` past its
    /// handler drops every reference to it before returning it.
    /// [`Sap::call`](crate::sap::Sap::call) upholds all three by keeping
    /// the message in its own frame and by only accepting services that
    /// cannot keep it.
    pub unsafe fn post_sync<'m, M>(&self, msg: &'m M)
    where
        M: SyncMessage<'m> + 'm,
    {
        let waiter = msg.waiter();
        let msg: &'m (dyn Message<'m> + 'm) = msg;
        // SAFETY: we block below until the message completes. Completion
        // happens after it was unlinked from the queue and after the
        // service handler returned, so nothing reaches the message
        // through the extended lifetime once this frame resumes.
        let msg: &'a (dyn Message<'a> + 'a) = unsafe { core::mem::transmute(msg) };
        self.post(msg);
        waiter.wait();
    }

    /// Dispatch at most one message. Returns true if one was processed.
    pub fn process_messages(&self) -> bool {
        match self.queue.get_first() {
            Some(msg) => {
                tracing::trace!(mailbox = %self.queue.id(), "dispatching message");
                msg.process();
                true
            }
            None => false,
        }
    }

    /// True while at least one message is queued
    pub fn is_pending_message(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Unlink every queued message without processing it. Returns how
    /// many were dropped from the queue.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.get_first().is_some() {
            dropped += 1;
        }
        if dropped != 0 {
            tracing::debug!(mailbox = %self.queue.id(), dropped, "mailbox cleared");
        }
        dropped
    }

    /// Messages still queued
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// An event loop paired with the mailbox it drains
pub struct MailboxServer<'a, W = DefaultWaiter> {
    /// Loop the server thread parks in
    event_loop: &'a EventLoop<'a, W>,
    /// Mailbox wired to wake that loop
    mailbox: Mailbox<'a>,
}

impl<'a, W: Waiter + 'a> MailboxServer<'a, W> {
    /// Server whose mailbox wakes `event_loop`
    pub fn new(event_loop: &'a EventLoop<'a, W>) -> Self {
        Self {
            event_loop,
            mailbox: Mailbox::new(event_loop),
        }
    }

    /// Mailbox to bind services to
    pub fn mailbox(&self) -> &Mailbox<'a> {
        &self.mailbox
    }

    /// Loop driving this server
    pub fn event_loop(&self) -> &'a EventLoop<'a, W> {
        self.event_loop
    }

    /// Ask [`run`](Self::run) to return; callable from any thread
    pub fn please_stop(&self) {
        self.event_loop.please_stop();
    }

    /// Serve until stopped: event flags first, then one message per
    /// iteration, skipping the wait while messages remain queued.
    pub fn run(&self) -> RunStats {
        tracing::debug!(mailbox = %self.mailbox.queue.id(), "mailbox server started");
        let mut stats = RunStats::default();
        let mut skip_wait = false;
        loop {
            let (running, events) = self.event_loop.step(skip_wait);
            if !running {
                break;
            }
            stats.wakeups += 1;
            if events != 0 {
                stats.event_batches += 1;
            }
            if self.mailbox.process_messages() {
                stats.messages += 1;
            }
            skip_wait = self.mailbox.is_pending_message();
        }
        tracing::debug!(
            messages = stats.messages,
            left = self.mailbox.pending(),
            "mailbox server stopped"
        );
        stats
    }
}
