//! Messages and the service/client dispatch contract
//!
//! A message is a list node with a `process` step. The thread draining
//! the mailbox that holds it calls [`Message::process`] exactly once per
//! submission; the service finishes with exactly one
//! [`ServerMessage::return_to_sender`], either inside its handler or at
//! any later point from any thread.
//!
//! Services implement [`RequestHandler`] once per payload type they
//! accept, clients implement [`ResponseHandler`] once per payload type
//! they wait for. Dispatch is selected by the payload type at compile
//! time.
//!
//! Author: Moroya Sakamoto

use crate::list::{Linked, Links};
use crate::signal::Waiter;

/// Link fields of a queued message
pub type MessageLinks<'a> = Links<'a, dyn Message<'a> + 'a>;

/// Exclusive access to an exchange payload
pub type PayloadGuard<'g, P> = spin::MutexGuard<'g, P>;

/// Unit of work queued in a mailbox
pub trait Message<'a>: Sync {
    fn links(&self) -> &MessageLinks<'a>;

    /// Run the unit of work on the draining thread
    fn process(&'a self);
}

impl<'a> Linked<'a> for dyn Message<'a> + 'a {
    fn links(&self) -> &Links<'a, Self> {
        Message::links(self)
    }
}

/// Server-side view of a request
pub trait ServerMessage<'m, P>: Sync {
    /// IN fields to read, OUT fields to write
    fn payload(&self) -> PayloadGuard<'_, P>;

    /// Hand the message back, exactly once per submission.
    ///
    /// Called inside [`RequestHandler::request`], completion fires as soon
    /// as the handler returns. Called later, it fires right here. Either
    /// way the sender may reuse or drop the message afterwards, so this is
    /// the service's last touch.
    fn return_to_sender(&'m self);
}

/// Client-side view of a completed exchange
pub trait ClientMessage<'m, P> {
    fn payload(&self) -> PayloadGuard<'_, P>;

    /// Start the next exchange on the same message
    fn post_request(&'m self);

    /// Drop interest in any response still to come
    fn abandon(&self);

    fn is_abandoned(&self) -> bool;
}

/// Service operation for one payload type.
///
/// The service may keep `msg` for all of `'a` and return it once the
/// work it waits on is done; until then the message is simply pending.
/// Implement it for every `'a` (`impl<'a> RequestHandler<'a, P>`) when
/// the service always answers in place; that is what blocking calls
/// through [`Sap::call`](crate::sap::Sap::call) require.
pub trait RequestHandler<'a, P> {
    fn request(&self, msg: &'a dyn ServerMessage<'a, P>);
}

/// Client continuation for one payload type
pub trait ResponseHandler<P> {
    fn response<'m>(&self, msg: &'m dyn ClientMessage<'m, P>);
}

/// A message whose completion wakes the thread that posted it.
///
/// Only these can go through `post_sync`, so a blocking post always has
/// something that will wake it.
pub trait SyncMessage<'m>: Message<'m> {
    fn waiter(&self) -> &dyn Waiter;
}
