//! Return handlers: what happens when a service is done with a message
//!
//! - [`SyncReturnHandler`] wakes the thread blocked in `post_sync`
//! - [`AsyncReturnHandler`] posts a response onto the client's mailbox
//! - [`NullReturnHandler`] does nothing (fire and forget)
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{fatal, Fault};
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::signal::{DefaultWaiter, Waiter};

/// Completion strategy bound to a message for its whole life
pub trait ReturnHandler: Sync {
    /// Return to sender
    fn rts(&self);
}

impl<R: ReturnHandler + ?Sized> ReturnHandler for &R {
    fn rts(&self) {
        (**self).rts();
    }
}

/// Wakes the caller of a blocking post. Owns the waiter, so nothing
/// else can release the caller early.
#[derive(Debug, Default)]
pub struct SyncReturnHandler<W = DefaultWaiter> {
    /// The blocked caller parks here
    waiter: W,
    /// Set by the one permitted return
    returned: AtomicBool,
}

impl<W: Waiter> SyncReturnHandler<W> {
    /// Handler that releases whoever waits on `waiter`
    pub const fn new(waiter: W) -> Self {
        Self {
            waiter,
            returned: AtomicBool::new(false),
        }
    }

    /// Waiter the caller parks on
    pub fn waiter(&self) -> &W {
        &self.waiter
    }

    /// True once the message has come back
    pub fn is_returned(&self) -> bool {
        self.returned.load(Ordering::Acquire)
    }
}

impl<W: Waiter> ReturnHandler for SyncReturnHandler<W> {
    fn rts(&self) {
        if self.returned.swap(true, Ordering::AcqRel) {
            fatal(Fault::MisusedReturnHandler);
        }
        // Last touch: the woken caller may drop the handler right away.
        self.waiter.signal();
    }
}

/// Delivers a response message to the client's mailbox
pub struct AsyncReturnHandler<'a> {
    /// Client mailbox
    mailbox: &'a Mailbox<'a>,
    /// Message posted there on every return
    response: &'a dyn Message<'a>,
}

impl<'a> AsyncReturnHandler<'a> {
    /// Post `response` to `mailbox` on return
    pub const fn new(mailbox: &'a Mailbox<'a>, response: &'a dyn Message<'a>) -> Self {
        Self { mailbox, response }
    }

    /// Mailbox the response is posted to
    pub fn mailbox(&self) -> &'a Mailbox<'a> {
        self.mailbox
    }
}

impl ReturnHandler for AsyncReturnHandler<'_> {
    fn rts(&self) {
        self.mailbox.post(self.response);
    }
}

/// Return handler of fire-and-forget submissions
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReturnHandler;

impl ReturnHandler for NullReturnHandler {
    fn rts(&self) {
        tracing::trace!("returned to null handler");
    }
}
