//! Response: one message object for a whole confirmed round trip
//!
//! A [`Response`] travels to the server mailbox as a request, is handed
//! to the service's [`RequestHandler`], and once returned posts itself
//! onto the client mailbox, where it is handed to the client's
//! [`ResponseHandler`]. The same instance is then idle and can start the
//! next exchange. Nothing is allocated per exchange.
//!
//! Phases of one exchange:
//!
//! ```text
//! IDLE -> REQUESTED -> SERVICING -> RETURNED -> DELIVERING -> IDLE
//!           post        process   |   rts        (post)       process
//!                                 +-> HELD --rts--^
//! ```
//!
//! A service that keeps the message past its handler parks it in `HELD`;
//! the later return delivers it from whichever thread makes it.
//!
//! [`abandon`](Response::abandon) is permanent. An abandoned response is
//! still serviced but never handed to the client again, whatever phase
//! the exchange was in when it was abandoned.
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::{fatal, Fault};
use crate::list::Links;
use crate::mailbox::Mailbox;
use crate::message::{
    ClientMessage, Message, MessageLinks, PayloadGuard, RequestHandler, ResponseHandler,
    ServerMessage,
};
use crate::sap::Sap;

const IDLE: u8 = 0;
const REQUESTED: u8 = 1;
const SERVICING: u8 = 2;
const RETURNED: u8 = 3;
const DELIVERING: u8 = 4;
const HELD: u8 = 5;

/// Request/response composite owned by the client
pub struct Response<'a, C: ?Sized, S: ?Sized, P> {
    /// Linkage into the server mailbox, then the client mailbox
    links: MessageLinks<'a>,
    /// Receives the returned exchange
    client: &'a C,
    /// Service and the mailbox serving it
    server: Sap<'a, S>,
    /// Client mailbox the returned exchange is posted to
    reply_to: &'a Mailbox<'a>,
    /// IN/OUT data shared by both sides
    payload: spin::Mutex<P>,
    /// Exchange phase, one of the constants above
    phase: AtomicU8,
    /// Sticky: set once, never cleared
    abandoned: AtomicBool,
}

impl<'a, C: ?Sized, S: ?Sized, P> Response<'a, C, S, P> {
    /// Exchange between `client`, answered on `reply_to`, and `server`
    pub const fn new(
        client: &'a C,
        reply_to: &'a Mailbox<'a>,
        server: Sap<'a, S>,
        payload: P,
    ) -> Self {
        Self {
            links: Links::new(),
            client,
            server,
            reply_to,
            payload: spin::Mutex::new(payload),
            phase: AtomicU8::new(IDLE),
            abandoned: AtomicBool::new(false),
        }
    }

    /// Same as [`new`](Self::new) from a raw service and mailbox pair
    pub const fn with_service(
        client: &'a C,
        reply_to: &'a Mailbox<'a>,
        service: &'a S,
        server_mailbox: &'a Mailbox<'a>,
        payload: P,
    ) -> Self {
        Self::new(client, reply_to, Sap::new(service, server_mailbox), payload)
    }

    /// Lock the payload
    pub fn payload(&self) -> PayloadGuard<'_, P> {
        self.payload.lock()
    }

    /// Client handed the returned exchange
    pub fn client(&self) -> &'a C {
        self.client
    }

    /// Where requests go
    pub fn server(&self) -> Sap<'a, S> {
        self.server
    }

    /// Stop delivering to the client, now and for every later exchange
    pub fn abandon(&self) {
        if !self.abandoned.swap(true, Ordering::AcqRel) {
            tracing::debug!("response abandoned");
        }
    }

    /// True once [`abandon`](Self::abandon) has been called
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// True from [`post_request`](Self::post_request) until the client
    /// side has run (or an abandoned exchange has been returned)
    pub fn is_in_flight(&self) -> bool {
        self.phase.load(Ordering::Acquire) != IDLE || self.links.is_linked()
    }

    fn advance(&self, from: u8, to: u8) -> bool {
        self.phase
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<'a, C, S, P> Response<'a, C, S, P>
where
    C: ResponseHandler<P> + Sync + ?Sized,
    S: RequestHandler<'a, P> + Sync + ?Sized,
    P: Send + 'a,
{
    /// The composite seen as the request to post on the server mailbox
    pub fn request_msg(&'a self) -> &'a dyn Message<'a> {
        self
    }

    /// Start an exchange. Halts if the previous one is still in flight.
    #[track_caller]
    pub fn post_request(&'a self) {
        if !self.advance(IDLE, REQUESTED) {
            fatal(Fault::ExchangeInFlight);
        }
        self.server.post(self);
    }

    fn serve(&'a self) {
        self.server.service().request(self);
        if self.advance(SERVICING, HELD) {
            tracing::trace!("response held by service");
        } else {
            self.finish();
        }
    }

    /// Server side is done: deliver to the client unless abandoned
    fn finish(&'a self) {
        if self.is_abandoned() {
            self.phase.store(IDLE, Ordering::Release);
            tracing::debug!("abandoned response returned, not delivered");
            return;
        }
        self.phase.store(DELIVERING, Ordering::Release);
        self.reply_to.post(self);
    }

    fn complete(&'a self) {
        if self.is_abandoned() {
            tracing::debug!("abandoned response dropped on client side");
            return;
        }
        self.client.response(self);
    }
}

impl<'a, C, S, P> Message<'a> for Response<'a, C, S, P>
where
    C: ResponseHandler<P> + Sync + ?Sized,
    S: RequestHandler<'a, P> + Sync + ?Sized,
    P: Send + 'a,
{
    fn links(&self) -> &MessageLinks<'a> {
        &self.links
    }

    fn process(&'a self) {
        if self.advance(REQUESTED, SERVICING) || self.advance(IDLE, SERVICING) {
            self.serve();
        } else if self.advance(DELIVERING, IDLE) {
            self.complete();
        } else {
            fatal(Fault::DuplicateProcess);
        }
    }
}

impl<'a, C, S, P> ServerMessage<'a, P> for Response<'a, C, S, P>
where
    C: ResponseHandler<P> + Sync + ?Sized,
    S: RequestHandler<'a, P> + Sync + ?Sized,
    P: Send + 'a,
{
    fn payload(&self) -> PayloadGuard<'_, P> {
        self.payload.lock()
    }

    fn return_to_sender(&'a self) {
        if self.advance(SERVICING, RETURNED) {
            return;
        }
        if self.advance(HELD, RETURNED) {
            self.finish();
        } else {
            fatal(Fault::MisusedReturnHandler);
        }
    }
}

impl<'a, C, S, P> ClientMessage<'a, P> for Response<'a, C, S, P>
where
    C: ResponseHandler<P> + Sync + ?Sized,
    S: RequestHandler<'a, P> + Sync + ?Sized,
    P: Send + 'a,
{
    fn payload(&self) -> PayloadGuard<'_, P> {
        self.payload.lock()
    }

    fn post_request(&'a self) {
        Response::post_request(self);
    }

    fn abandon(&self) {
        Response::abandon(self);
    }

    fn is_abandoned(&self) -> bool {
        Response::is_abandoned(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SpinSemaphore;
    use crate::testing::trace_init;
    use core::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    struct Incrementer;

    impl<'a> RequestHandler<'a, Counter> for Incrementer {
        fn request(&self, msg: &'a dyn ServerMessage<'a, Counter>) {
            msg.payload().value += 1;
            msg.return_to_sender();
        }
    }

    /// Keeps the exchange until `release` is called
    struct Holding<'a> {
        held: critical_section::Mutex<core::cell::Cell<Option<&'a dyn ServerMessage<'a, Counter>>>>,
    }

    impl<'a> Holding<'a> {
        fn new() -> Self {
            Self {
                held: critical_section::Mutex::new(core::cell::Cell::new(None)),
            }
        }

        fn release(&self) -> bool {
            let held = critical_section::with(|cs| self.held.borrow(cs).take());
            match held {
                Some(msg) => {
                    msg.payload().value += 100;
                    msg.return_to_sender();
                    true
                }
                None => false,
            }
        }
    }

    impl<'a> RequestHandler<'a, Counter> for Holding<'a> {
        fn request(&self, msg: &'a dyn ServerMessage<'a, Counter>) {
            critical_section::with(|cs| self.held.borrow(cs).set(Some(msg)));
        }
    }

    #[derive(Default)]
    struct Tally {
        calls: AtomicU32,
        last: AtomicU32,
    }

    impl Tally {
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl ResponseHandler<Counter> for Tally {
        fn response<'m>(&self, msg: &'m dyn ClientMessage<'m, Counter>) {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.last.store(msg.payload().value, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_round_trips_reuse_one_message() {
        trace_init();
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let rsp = Response::with_service(&tally, &client_mb, &Incrementer, &server_mb, Counter::default());
        for round in 1..=5 {
            rsp.post_request();
            assert!(rsp.is_in_flight());
            assert!(server_mb.process_messages());
            assert!(!server_mb.is_pending_message());
            assert!(client_mb.process_messages());
            assert_eq!(tally.calls(), round);
            assert_eq!(tally.last.load(Ordering::Relaxed), round);
            assert!(!rsp.is_in_flight());
        }
    }

    #[test]
    fn test_request_msg_posted_through_sap() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let sap = Sap::new(&Incrementer, &server_mb);
        let rsp = Response::new(&tally, &client_mb, sap, Counter { value: 41 });
        sap.post(rsp.request_msg());
        assert!(server_mb.process_messages());
        assert!(client_mb.process_messages());
        assert_eq!(tally.last.load(Ordering::Relaxed), 42);
        assert_eq!(rsp.payload().value, 42);
    }

    #[test]
    fn test_abandon_after_return_suppresses_delivery() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let rsp = Response::with_service(&tally, &client_mb, &Incrementer, &server_mb, Counter::default());

        rsp.post_request();
        assert!(server_mb.process_messages());
        assert!(client_mb.is_pending_message());
        rsp.abandon();
        assert!(rsp.is_abandoned());
        assert!(client_mb.process_messages());
        assert_eq!(tally.calls(), 0);
        assert!(!rsp.is_in_flight());
        assert_eq!(rsp.payload().value, 1);
    }

    #[test]
    fn test_abandon_before_service_is_never_delivered() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let rsp = Response::with_service(&tally, &client_mb, &Incrementer, &server_mb, Counter::default());

        rsp.post_request();
        rsp.abandon();
        assert!(server_mb.process_messages());
        assert!(!client_mb.is_pending_message());
        assert!(!rsp.is_in_flight());

        // Abandon sticks for later exchanges too
        rsp.post_request();
        assert!(server_mb.process_messages());
        assert!(!client_mb.is_pending_message());
        assert_eq!(tally.calls(), 0);
        assert_eq!(rsp.payload().value, 2);
    }

    #[test]
    #[should_panic(expected = "fatal fault")]
    fn test_repost_in_flight_halts() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let rsp = Response::with_service(&tally, &client_mb, &Incrementer, &server_mb, Counter::default());
        rsp.post_request();
        rsp.post_request();
    }

    #[test]
    fn test_held_exchange_delivered_on_late_return() {
        trace_init();
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let holding = Holding::new();
        let rsp = Response::with_service(&tally, &client_mb, &holding, &server_mb, Counter::default());

        rsp.post_request();
        assert!(server_mb.process_messages());
        assert!(rsp.is_in_flight());
        assert!(!client_mb.is_pending_message());

        assert!(holding.release());
        assert!(!holding.release());
        assert!(client_mb.process_messages());
        assert_eq!(tally.calls(), 1);
        assert_eq!(tally.last.load(Ordering::Relaxed), 100);
        assert!(!rsp.is_in_flight());
    }

    #[test]
    fn test_held_exchange_abandoned_before_return() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let holding = Holding::new();
        let rsp = Response::with_service(&tally, &client_mb, &holding, &server_mb, Counter::default());

        rsp.post_request();
        assert!(server_mb.process_messages());
        rsp.abandon();
        assert!(holding.release());
        assert!(!client_mb.is_pending_message());
        assert!(!rsp.is_in_flight());
        assert_eq!(tally.calls(), 0);
    }

    #[test]
    #[should_panic(expected = "fatal fault")]
    fn test_return_outside_exchange_halts() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let tally = Tally::default();
        let rsp = Response::with_service(&tally, &client_mb, &Incrementer, &server_mb, Counter::default());
        ServerMessage::return_to_sender(&rsp);
    }
}
