//! Open/close lifecycle requests and their synchronous helpers
//!
//! Open and close are independent capabilities ([`Open`], [`Close`]).
//! [`OpenCloseSync`] gets its open half by holding an [`OpenSync`], not
//! by stacking interfaces, so a service that handles both payloads is
//! reached through exactly one path per operation.
//!
//! Author: Moroya Sakamoto

use core::marker::PhantomData;

use crate::message::RequestHandler;
use crate::request::Request;
use crate::response::Response;
use crate::return_handler::NullReturnHandler;
use crate::sap::Sap;
use crate::signal::{DefaultWaiter, Waiter};

/// Open request payload
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpenPayload {
    /// IN: optional service-defined argument
    pub args: Option<usize>,
    /// OUT: pass/fail
    pub success: bool,
}

impl OpenPayload {
    /// Payload carrying `args`, not yet successful
    pub const fn new(args: Option<usize>) -> Self {
        Self {
            args,
            success: false,
        }
    }
}

/// Close request payload
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClosePayload {
    /// IN: optional service-defined argument
    pub args: Option<usize>,
    /// OUT: pass/fail
    pub success: bool,
}

impl ClosePayload {
    /// Payload carrying `args`, not yet successful
    pub const fn new(args: Option<usize>) -> Self {
        Self {
            args,
            success: false,
        }
    }
}

/// Open request posted without blocking
pub type OpenRequest<'a, S, R = NullReturnHandler> = Request<'a, S, OpenPayload, R>;
/// Close request posted without blocking
pub type CloseRequest<'a, S, R = NullReturnHandler> = Request<'a, S, ClosePayload, R>;

/// Asynchronous open, for clients that cannot block
pub type OpenResponse<'a, C, S> = Response<'a, C, S, OpenPayload>;
/// Asynchronous close, for clients that cannot block
pub type CloseResponse<'a, C, S> = Response<'a, C, S, ClosePayload>;

/// Capability: open a service
pub trait Open {
    fn open(&self, args: Option<usize>) -> bool;
}

/// Capability: close a service
pub trait Close {
    fn close(&self, args: Option<usize>) -> bool;
}

/// Blocking open against a service running on another thread
pub struct OpenSync<'a, S: ?Sized, W = DefaultWaiter> {
    server: Sap<'a, S>,
    _waiter: PhantomData<fn() -> W>,
}

impl<'a, S: ?Sized> OpenSync<'a, S> {
    /// Open through `server`, parking on the default waiter
    pub const fn new(server: Sap<'a, S>) -> Self {
        Self::with_waiter(server)
    }
}

impl<'a, S: ?Sized, W> OpenSync<'a, S, W> {
    /// Caller parks on a fresh `W` for each request
    pub const fn with_waiter(server: Sap<'a, S>) -> Self {
        Self {
            server,
            _waiter: PhantomData,
        }
    }

    /// Where open requests go
    pub fn server(&self) -> Sap<'a, S> {
        self.server
    }
}

impl<S, W> Open for OpenSync<'_, S, W>
where
    S: for<'m> RequestHandler<'m, OpenPayload> + Sync + ?Sized,
    W: Waiter + Default,
{
    fn open(&self, args: Option<usize>) -> bool {
        let done = self.server.call_with::<W, _>(OpenPayload::new(args));
        tracing::debug!(success = done.success, "open");
        done.success
    }
}

/// Blocking open and close against one service
pub struct OpenCloseSync<'a, S: ?Sized, W = DefaultWaiter> {
    opener: OpenSync<'a, S, W>,
}

impl<'a, S: ?Sized> OpenCloseSync<'a, S> {
    /// Open and close through `server`, parking on the default waiter
    pub const fn new(server: Sap<'a, S>) -> Self {
        Self::with_waiter(server)
    }
}

impl<'a, S: ?Sized, W> OpenCloseSync<'a, S, W> {
    /// Caller parks on a fresh `W` for each request
    pub const fn with_waiter(server: Sap<'a, S>) -> Self {
        Self {
            opener: OpenSync::with_waiter(server),
        }
    }

    /// Where open and close requests go
    pub fn server(&self) -> Sap<'a, S> {
        self.opener.server()
    }
}

impl<S, W> Open for OpenCloseSync<'_, S, W>
where
    S: for<'m> RequestHandler<'m, OpenPayload> + Sync + ?Sized,
    W: Waiter + Default,
{
    fn open(&self, args: Option<usize>) -> bool {
        self.opener.open(args)
    }
}

impl<S, W> Close for OpenCloseSync<'_, S, W>
where
    S: for<'m> RequestHandler<'m, ClosePayload> + Sync + ?Sized,
    W: Waiter + Default,
{
    fn close(&self, args: Option<usize>) -> bool {
        let done = self.server().call_with::<W, _>(ClosePayload::new(args));
        tracing::debug!(success = done.success, "close");
        done.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::mailbox::{Mailbox, MailboxServer};
    use crate::message::{ClientMessage, ResponseHandler, ServerMessage};
    use crate::signal::{Semaphore, Signable, SpinSemaphore};
    use crate::testing::trace_init;
    use core::cell::Cell;
    use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
    use critical_section::Mutex;
    use std::thread;
    use std::time::Duration;

    /// Service whose open/close flip `opened` and report `!fail`
    #[derive(Default)]
    struct Device {
        opened: AtomicBool,
        fail: bool,
        last_args: AtomicUsize,
    }

    impl Device {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn is_opened(&self) -> bool {
            self.opened.load(Ordering::Acquire)
        }
    }

    impl<'a> RequestHandler<'a, OpenPayload> for Device {
        fn request(&self, msg: &'a dyn ServerMessage<'a, OpenPayload>) {
            let mut p = msg.payload();
            self.opened.store(true, Ordering::Release);
            self.last_args.store(p.args.unwrap_or(0), Ordering::Relaxed);
            p.success = !self.fail;
            drop(p);
            msg.return_to_sender();
        }
    }

    impl<'a> RequestHandler<'a, ClosePayload> for Device {
        fn request(&self, msg: &'a dyn ServerMessage<'a, ClosePayload>) {
            let mut p = msg.payload();
            self.opened.store(false, Ordering::Release);
            p.success = !self.fail;
            drop(p);
            msg.return_to_sender();
        }
    }

    /// Open, read the flag, close, read the flag, on a served device
    fn cycle(device: &Device) -> (bool, bool, bool, bool) {
        let el = EventLoop::new();
        let server = MailboxServer::new(&el);
        let oc = OpenCloseSync::new(Sap::new(device, server.mailbox()));
        thread::scope(|s| {
            s.spawn(|| server.run());
            let opened = oc.open(Some(7));
            let flag_after_open = device.is_opened();
            let closed = oc.close(None);
            let flag_after_close = device.is_opened();
            server.please_stop();
            (opened, flag_after_open, closed, flag_after_close)
        })
    }

    #[test]
    fn test_open_close_happy_path() {
        trace_init();
        let device = Device::default();
        assert_eq!(cycle(&device), (true, true, true, false));
        assert_eq!(device.last_args.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_open_close_failure_still_transitions() {
        let device = Device::failing();
        assert_eq!(cycle(&device), (false, true, false, false));
    }

    #[test]
    fn test_open_sync_with_spin_waiter() {
        let el = EventLoop::with_waiter(SpinSemaphore::new());
        let server = MailboxServer::new(&el);
        let device = Device::default();
        let opener: OpenSync<'_, Device, SpinSemaphore> =
            OpenSync::with_waiter(Sap::new(&device, server.mailbox()));
        let opened = thread::scope(|s| {
            s.spawn(|| server.run());
            let opened = opener.open(None);
            server.please_stop();
            opened
        });
        assert!(opened);
        assert!(device.is_opened());
    }

    struct OpenWatcher {
        result: Mutex<Cell<Option<bool>>>,
    }

    impl ResponseHandler<OpenPayload> for OpenWatcher {
        fn response<'m>(&self, msg: &'m dyn ClientMessage<'m, OpenPayload>) {
            let success = msg.payload().success;
            critical_section::with(|cs| self.result.borrow(cs).set(Some(success)));
        }
    }

    #[test]
    fn test_async_open_response() {
        let sema = SpinSemaphore::new();
        let server_mb = Mailbox::new(&sema);
        let client_mb = Mailbox::new(&sema);
        let device = Device::default();
        let watcher = OpenWatcher {
            result: Mutex::new(Cell::new(None)),
        };
        let rsp: OpenResponse<'_, OpenWatcher, Device> = Response::with_service(
            &watcher,
            &client_mb,
            &device,
            &server_mb,
            OpenPayload::new(Some(3)),
        );
        rsp.post_request();
        assert!(server_mb.process_messages());
        assert!(device.is_opened());
        assert!(client_mb.process_messages());
        let result = critical_section::with(|cs| watcher.result.borrow(cs).get());
        assert_eq!(result, Some(true));
    }

    // Byte store: open seeds the value, write stores src + 1, read reports it

    #[derive(Default)]
    struct WritePayload {
        src: u8,
    }

    #[derive(Default)]
    struct ReadPayload {
        dst: u8,
    }

    #[derive(Default)]
    struct ByteStore {
        value: AtomicU8,
    }

    impl<'a> RequestHandler<'a, OpenPayload> for ByteStore {
        fn request(&self, msg: &'a dyn ServerMessage<'a, OpenPayload>) {
            let mut p = msg.payload();
            let seed = p.args.map_or(0, |a| a as u8);
            self.value.store(seed, Ordering::Release);
            p.success = true;
            drop(p);
            msg.return_to_sender();
        }
    }

    impl<'a> RequestHandler<'a, WritePayload> for ByteStore {
        fn request(&self, msg: &'a dyn ServerMessage<'a, WritePayload>) {
            let src = msg.payload().src;
            self.value.store(src.wrapping_add(1), Ordering::Release);
            msg.return_to_sender();
        }
    }

    impl<'a> RequestHandler<'a, ReadPayload> for ByteStore {
        fn request(&self, msg: &'a dyn ServerMessage<'a, ReadPayload>) {
            msg.payload().dst = self.value.load(Ordering::Acquire);
            msg.return_to_sender();
        }
    }

    type ReadResponse<'a> = Response<'a, ByteClient<'a>, ByteStore, ReadPayload>;

    /// Client that chains a read after its write completes
    struct ByteClient<'a> {
        read: Mutex<Cell<Option<&'a ReadResponse<'a>>>>,
        abandon_read: bool,
        writes: AtomicU32,
        reads: AtomicU32,
        dst: AtomicU8,
        done: Semaphore,
    }

    impl<'a> ByteClient<'a> {
        fn new(abandon_read: bool) -> Self {
            Self {
                read: Mutex::new(Cell::new(None)),
                abandon_read,
                writes: AtomicU32::new(0),
                reads: AtomicU32::new(0),
                dst: AtomicU8::new(0),
                done: Semaphore::new(),
            }
        }

        fn bind_read(&self, read: &'a ReadResponse<'a>) {
            critical_section::with(|cs| self.read.borrow(cs).set(Some(read)));
        }
    }

    impl ResponseHandler<WritePayload> for ByteClient<'_> {
        fn response<'m>(&self, _msg: &'m dyn ClientMessage<'m, WritePayload>) {
            self.writes.fetch_add(1, Ordering::Relaxed);
            let read = critical_section::with(|cs| self.read.borrow(cs).get());
            if let Some(read) = read {
                if self.abandon_read {
                    read.abandon();
                }
                read.post_request();
            }
            if self.abandon_read {
                self.done.signal();
            }
        }
    }

    impl ResponseHandler<ReadPayload> for ByteClient<'_> {
        fn response<'m>(&self, msg: &'m dyn ClientMessage<'m, ReadPayload>) {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.dst.store(msg.payload().dst, Ordering::Release);
            self.done.signal();
        }
    }

    struct Outcome {
        opened: bool,
        seeded: u8,
        finished: bool,
        writes: u32,
        reads: u32,
        client_dst: u8,
        served_dst: u8,
        stored: u8,
    }

    fn write_then_read(abandon_read: bool) -> Outcome {
        let server_el = EventLoop::new();
        let client_el = EventLoop::new();
        let server = MailboxServer::new(&server_el);
        let client_side = MailboxServer::new(&client_el);
        let store = ByteStore::default();
        let sap = Sap::new(&store, server.mailbox());
        let client = ByteClient::new(abandon_read);
        let write = Response::new(&client, client_side.mailbox(), sap, WritePayload { src: 42 });
        let read: ReadResponse<'_> =
            Response::new(&client, client_side.mailbox(), sap, ReadPayload::default());
        client.bind_read(&read);
        let opener = OpenSync::new(sap);

        let (opened, seeded, finished) = thread::scope(|s| {
            s.spawn(|| server.run());
            s.spawn(|| client_side.run());
            let opened = opener.open(Some(42));
            let seeded = store.value.load(Ordering::Acquire);
            write.post_request();
            let mut finished = client.done.timed_wait(Duration::from_secs(5));
            if abandon_read {
                for _ in 0..5_000 {
                    if !read.is_in_flight() {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                finished &= !read.is_in_flight();
            }
            server.please_stop();
            client_side.please_stop();
            (opened, seeded, finished)
        });
        let served_dst = read.payload().dst;
        Outcome {
            opened,
            seeded,
            finished,
            writes: client.writes.load(Ordering::Relaxed),
            reads: client.reads.load(Ordering::Relaxed),
            client_dst: client.dst.load(Ordering::Acquire),
            served_dst,
            stored: store.value.load(Ordering::Acquire),
        }
    }

    #[test]
    fn test_write_then_read_reports_incremented_byte() {
        trace_init();
        let out = write_then_read(false);
        assert!(out.opened);
        assert_eq!(out.seeded, 42);
        assert!(out.finished);
        assert_eq!(out.writes, 1);
        assert_eq!(out.reads, 1);
        assert_eq!(out.client_dst, 43);
        assert_eq!(out.stored, 43);
    }

    #[test]
    fn test_abandoned_read_is_serviced_but_not_delivered() {
        let out = write_then_read(true);
        assert!(out.opened);
        assert!(out.finished);
        assert_eq!(out.writes, 1);
        assert_eq!(out.reads, 0);
        assert_eq!(out.client_dst, 0);
        assert_eq!(out.served_dst, 43);
    }
}
