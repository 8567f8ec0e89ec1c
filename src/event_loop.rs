//! Event loop: the run loop a worker thread sleeps in
//!
//! Owns the thread's wait primitive and a run flag. Besides plain
//! wake-ups it carries up to 32 event flags; flags raised from any
//! thread (or an interrupt) are accumulated under the global lock and
//! handed to registered [`EventFlag`] handlers on the loop thread.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;

use critical_section::Mutex;

use crate::list::{DList, Linked, Links};
use crate::signal::{DefaultWaiter, Signable, Waiter};

/// Link fields of an event flag handler
pub type FlagLinks<'a> = Links<'a, dyn EventFlag<'a> + 'a>;

/// Registry of event flag handlers
pub type EventFlags<'a> = DList<'a, dyn EventFlag<'a> + 'a>;

/// Handler notified on the loop thread when one of its flags fires
pub trait EventFlag<'a>: Sync {
    fn links(&self) -> &FlagLinks<'a>;
    /// Event bits this handler listens to
    fn event_mask(&self) -> u32;
    /// Called with the raised bits intersected with [`event_mask`](Self::event_mask)
    fn notified(&self, events: u32);
}

impl<'a> Linked<'a> for dyn EventFlag<'a> + 'a {
    fn links(&self) -> &Links<'a, Self> {
        EventFlag::links(self)
    }
}

/// Loop execution statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Loop iterations
    pub wakeups: u64,
    /// Iterations that delivered event flags
    pub event_batches: u64,
    /// ITC messages dispatched
    pub messages: u64,
}

/// Wait/dispatch loop of one worker thread
pub struct EventLoop<'a, W = DefaultWaiter> {
    sema: W,
    running: Mutex<Cell<bool>>,
    events: Mutex<Cell<u32>>,
    flags: Option<&'a EventFlags<'a>>,
}

impl<'a> EventLoop<'a> {
    /// Event loop on the default waiter
    pub fn new() -> Self {
        Self::with_waiter(DefaultWaiter::new())
    }
}

impl Default for EventLoop<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, W: Waiter> EventLoop<'a, W> {
    /// Loop parking on `sema`
    pub const fn with_waiter(sema: W) -> Self {
        Self {
            sema,
            running: Mutex::new(Cell::new(true)),
            events: Mutex::new(Cell::new(0)),
            flags: None,
        }
    }

    /// Deliver event flags to the handlers linked in `flags`
    pub fn with_event_flags(mut self, flags: &'a EventFlags<'a>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// One loop step: sleep unless `skip_wait`, then hand pending event
    /// flags to their handlers. Returns false once a stop was requested.
    pub fn wait_and_process_events(&self, skip_wait: bool) -> bool {
        self.step(skip_wait).0
    }

    /// Loop step returning the run flag and the bits it delivered
    pub(crate) fn step(&self, skip_wait: bool) -> (bool, u32) {
        if !skip_wait {
            self.sema.wait();
        }
        let (running, events) = critical_section::with(|cs| {
            (
                self.running.borrow(cs).get(),
                self.events.borrow(cs).replace(0),
            )
        });
        if events != 0 {
            self.dispatch(events);
        }
        (running, events)
    }

    fn dispatch(&self, events: u32) {
        let Some(flags) = self.flags else {
            tracing::trace!(events, "event flags raised with no handlers");
            return;
        };
        for flag in flags.iter() {
            let hit = events & flag.event_mask();
            if hit != 0 {
                flag.notified(hit);
            }
        }
    }

    /// Raise event number `event` (0..32)
    pub fn signal_event(&self, event: u8) {
        match 1u32.checked_shl(u32::from(event)) {
            Some(bit) => self.signal_multiple_events(bit),
            None => tracing::warn!(event, "event number out of range, ignored"),
        }
    }

    /// Raise every event whose bit is set in `mask`
    pub fn signal_multiple_events(&self, mask: u32) {
        critical_section::with(|cs| {
            let events = self.events.borrow(cs);
            events.set(events.get() | mask);
        });
        self.sema.signal();
    }

    /// Ask the loop to return after its current iteration
    pub fn please_stop(&self) {
        critical_section::with(|cs| self.running.borrow(cs).set(false));
        self.sema.signal();
    }

    /// False once [`please_stop`](Self::please_stop) has been called
    pub fn is_running(&self) -> bool {
        critical_section::with(|cs| self.running.borrow(cs).get())
    }

    /// Loop until [`please_stop`](Self::please_stop)
    pub fn run(&self) -> RunStats {
        tracing::debug!("event loop started");
        let mut stats = RunStats::default();
        loop {
            let (running, events) = self.step(false);
            if !running {
                break;
            }
            stats.wakeups += 1;
            if events != 0 {
                stats.event_batches += 1;
            }
        }
        tracing::debug!(wakeups = stats.wakeups, "event loop stopped");
        stats
    }
}

impl<W: Waiter> Signable for EventLoop<'_, W> {
    fn signal(&self) {
        self.sema.signal();
    }
}
