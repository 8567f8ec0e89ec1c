//! Service access point: a service bound to the mailbox that serves it
//!
//! Author: Moroya Sakamoto

use crate::mailbox::Mailbox;
use crate::message::{Message, RequestHandler, SyncMessage};
use crate::request::Request;
use crate::return_handler::SyncReturnHandler;
use crate::signal::{DefaultWaiter, Waiter};

/// {service, mailbox} handle. Copy it freely; every copy posts to the
/// same thread.
pub struct Sap<'a, S: ?Sized> {
    /// Handlers run against this
    service: &'a S,
    /// Mailbox of the thread the service runs on
    mailbox: &'a Mailbox<'a>,
}

impl<S: ?Sized> Clone for Sap<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for Sap<'_, S> {}

impl<'a, S: ?Sized> Sap<'a, S> {
    /// Bind `service` to the mailbox of the thread that runs it
    pub const fn new(service: &'a S, mailbox: &'a Mailbox<'a>) -> Self {
        Self { service, mailbox }
    }

    /// The bound service
    pub fn service(&self) -> &'a S {
        self.service
    }

    /// The serving mailbox
    pub fn mailbox(&self) -> &'a Mailbox<'a> {
        self.mailbox
    }

    /// Queue `msg` for the service thread. Halts if it is already queued.
    #[track_caller]
    pub fn post(&self, msg: &'a dyn Message<'a>) {
        self.mailbox.post(msg);
    }

    /// Forward to [`Mailbox::post_sync`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Mailbox::post_sync`].
    pub unsafe fn post_sync<'m, M>(&self, msg: &'m M)
    where
        M: SyncMessage<'m> + 'm,
    {
        // SAFETY: forwarded contract.
        unsafe { self.mailbox.post_sync(msg) }
    }

    /// Run one request on the service thread and hand back the payload
    /// the service left behind. Blocks the caller until then.
    ///
    /// The service must answer for any lifetime, so it cannot keep the
    /// request past its handler; a handler that returns without
    /// `return_to_sender` leaves the caller blocked.
    pub fn call<P>(&self, payload: P) -> P
    where
        S: for<'m> RequestHandler<'m, P> + Sync,
        P: Send + Default,
    {
        self.call_with::<DefaultWaiter, P>(payload)
    }

    /// [`call`](Self::call) parking the caller on a fresh `W`
    pub fn call_with<W, P>(&self, payload: P) -> P
    where
        S: for<'m> RequestHandler<'m, P> + Sync,
        P: Send + Default,
        W: Waiter + Default,
    {
        let msg = Request::new(self.service, payload, SyncReturnHandler::new(W::default()));
        // SAFETY: the request and the waiter it owns live in this frame
        // and are handed to no one but the service mailbox. The service
        // handles every lifetime, so it cannot hold the request past its
        // handler, and an in-handler return fires only after the handler.
        unsafe { self.mailbox.post_sync(&msg) };
        let payload = core::mem::take(&mut *msg.payload());
        payload
    }
}
