//! Request: service + payload + return handler, posted as one message
//!
//! Processing dispatches to the service's [`RequestHandler`] for the
//! payload type. The service returns the message with
//! [`ServerMessage::return_to_sender`], in its handler or later. A return
//! made inside the handler fires the return handler once the handler has
//! finished, so the service never touches a message whose sender may
//! already have moved on. A later return fires it on the spot.
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::{fatal, Fault};
use crate::list::Links;
use crate::message::{
    Message, MessageLinks, PayloadGuard, RequestHandler, ServerMessage, SyncMessage,
};
use crate::return_handler::{NullReturnHandler, ReturnHandler, SyncReturnHandler};
use crate::sap::Sap;
use crate::signal::{DefaultWaiter, Waiter};

const IDLE: u8 = 0;
/// Service handler running
const SERVICING: u8 = 1;
/// Returned from inside the handler, completion pending on its exit
const RETURNED: u8 = 2;
/// Handler exited, service still holds the message
const HELD: u8 = 3;

/// Request message carrying its payload by value
pub struct Request<'a, S: ?Sized, P, R = NullReturnHandler> {
    /// Mailbox linkage
    links: MessageLinks<'a>,
    /// Service the request is dispatched to
    service: &'a S,
    /// IN/OUT data, locked while either side works on it
    payload: spin::Mutex<P>,
    /// Fired once per submission when the service returns the request
    rh: R,
    /// One of the phase constants above
    state: AtomicU8,
}

/// Request that wakes its poster, usable with `post_sync`
pub type SyncRequest<'a, S, P, W = DefaultWaiter> = Request<'a, S, P, SyncReturnHandler<W>>;

impl<'a, S: ?Sized, P, R> Request<'a, S, P, R> {
    /// Idle request for `service`, completed through `rh`
    pub const fn new(service: &'a S, payload: P, rh: R) -> Self {
        Self {
            links: Links::new(),
            service,
            payload: spin::Mutex::new(payload),
            rh,
            state: AtomicU8::new(IDLE),
        }
    }

    /// Request for the service behind `sap`
    pub fn with_sap(sap: &Sap<'a, S>, payload: P, rh: R) -> Self {
        Self::new(sap.service(), payload, rh)
    }

    /// Lock the payload
    pub fn payload(&self) -> PayloadGuard<'_, P> {
        self.payload.lock()
    }

    /// Consume the request and hand back its payload
    pub fn into_payload(self) -> P {
        self.payload.into_inner()
    }

    /// Service the request is dispatched to
    pub fn service(&self) -> &'a S {
        self.service
    }

    /// Completion strategy of this request
    pub fn return_handler(&self) -> &R {
        &self.rh
    }

    /// True from dispatch until the service returns the request
    pub fn is_in_service(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }
}

impl<S: ?Sized, P, R: ReturnHandler> Request<'_, S, P, R> {
    /// Back to idle, then hand over to the return handler. Nothing may
    /// touch `self` after `rts`.
    fn complete(&self) {
        self.state.store(IDLE, Ordering::Release);
        tracing::trace!("request returned to sender");
        self.rh.rts();
    }
}

impl<'a, S, P, R> Message<'a> for Request<'a, S, P, R>
where
    S: RequestHandler<'a, P> + Sync + ?Sized,
    P: Send + 'a,
    R: ReturnHandler + 'a,
{
    fn links(&self) -> &MessageLinks<'a> {
        &self.links
    }

    fn process(&'a self) {
        if self
            .state
            .compare_exchange(IDLE, SERVICING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            fatal(Fault::DuplicateProcess);
        }
        self.service.request(self);
        match self
            .state
            .compare_exchange(SERVICING, HELD, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => tracing::trace!("request held by service"),
            Err(_) => self.complete(),
        }
    }
}

impl<'a, S, P, R> ServerMessage<'a, P> for Request<'a, S, P, R>
where
    S: Sync + ?Sized,
    P: Send,
    R: ReturnHandler,
{
    fn payload(&self) -> PayloadGuard<'_, P> {
        self.payload.lock()
    }

    fn return_to_sender(&'a self) {
        let returned = self.state.compare_exchange(
            SERVICING,
            RETURNED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match returned {
            Ok(_) => {}
            Err(HELD)
                if self
                    .state
                    .compare_exchange(HELD, RETURNED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok() =>
            {
                self.complete()
            }
            Err(_) => fatal(Fault::MisusedReturnHandler),
        }
    }
}

impl<'a, S, P, W> SyncMessage<'a> for SyncRequest<'a, S, P, W>
where
    S: RequestHandler<'a, P> + Sync + ?Sized,
    P: Send + 'a,
    W: Waiter + 'a,
{
    fn waiter(&self) -> &dyn Waiter {
        self.rh.waiter()
    }
}
