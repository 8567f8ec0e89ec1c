//! kit-core: heap-free inter-thread messaging
//!
//! Lets code on one thread call a service running on another thread,
//! blocking or not, without allocating:
//! - Intrusive single-owner lists, doubly and singly linked (a node
//!   sits in at most one list)
//! - Mailboxes draining one message per loop iteration
//! - Synchronous calls emulated on top of the asynchronous queue
//! - Confirmed round trips that reuse one response message
//! - Open/close lifecycle helpers built from the above
//!
//! Every list splice happens inside one short `critical-section`, so
//! posting is safe from any thread and from interrupt context.
//! Misuse (double insert, double return) is fatal; see [`error`].
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod error;
pub mod list;
pub mod slist;
pub mod signal;
pub mod event_loop;
pub mod message;
pub mod return_handler;
pub mod request;
pub mod mailbox;
pub mod sap;
pub mod response;
pub mod lifecycle;

#[cfg(test)]
mod testing;

pub use error::{fatal, Fault, ListId};
pub use list::{DList, Linked, Links};
pub use slist::{SLinked, SLinks, SList};
pub use signal::{DefaultWaiter, Signable, SpinSemaphore, Waiter};
#[cfg(any(test, feature = "std"))]
pub use signal::Semaphore;
pub use event_loop::{EventFlag, EventFlags, EventLoop, RunStats};
pub use message::{
    ClientMessage, Message, MessageLinks, RequestHandler, ResponseHandler, ServerMessage,
    SyncMessage,
};
pub use return_handler::{AsyncReturnHandler, NullReturnHandler, ReturnHandler, SyncReturnHandler};
pub use request::{Request, SyncRequest};
pub use mailbox::{Mailbox, MailboxServer};
pub use sap::Sap;
pub use response::Response;
pub use lifecycle::{Close, ClosePayload, Open, OpenCloseSync, OpenPayload, OpenSync};
