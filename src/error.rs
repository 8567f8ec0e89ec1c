//! Faults: programmer errors that halt the program
//!
//! Every misuse of the messaging core (double insert, double return,
//! stray process call) is corrupted program state, never a business
//! outcome. Detection produces a [`Fault`]; [`fatal`] logs it and panics.
//! The release profile builds with `panic = "abort"`, so on target a
//! fault stops the firmware on the spot.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;
use core::fmt;
use core::num::NonZeroU32;

use critical_section::{CriticalSection, Mutex};

/// Identity of one intrusive list, stored in the owner tag of its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(NonZeroU32);

static NEXT_LIST_ID: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

impl ListId {
    /// Hand out the next identity. Must run under the global lock.
    pub(crate) fn next(cs: CriticalSection<'_>) -> Self {
        let counter = NEXT_LIST_ID.borrow(cs);
        let n = counter.get();
        counter.set(n.wrapping_add(1));
        Self(NonZeroU32::MIN.saturating_add(n))
    }

    /// Raw identity value
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "list#{}", self.0)
    }
}

/// Unrecoverable misuse of a list, message or return handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Node inserted while it is still a member of a list
    #[error("node is already linked into {owner}")]
    OwnershipViolation { owner: ListId },
    /// Navigation from a node that does not belong to the list
    #[error("node is not a member of {list}")]
    NotAMember { list: ListId },
    /// Return-to-sender called twice, or on a message not in service
    #[error("return handler invoked more than once")]
    MisusedReturnHandler,
    /// A message was processed while it was already being processed
    #[error("message processed twice for one submission")]
    DuplicateProcess,
    /// A response exchange was restarted before the previous one finished
    #[error("request posted while its exchange is still in flight")]
    ExchangeInFlight,
}

/// Halt on a fault. Never call this while holding the global lock.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(fault: Fault) -> ! {
    tracing::error!(%fault, "fatal fault");
    panic!("fatal fault: {fault}")
}
