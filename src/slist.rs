//! Intrusive singly linked single-owner list
//!
//! Same ownership rules as [`DList`](crate::list::DList): one owner tag
//! per node, inserting an owned node is a [`Fault::OwnershipViolation`],
//! and every operation is one short critical section. Members carry one
//! link only, so anything that needs the predecessor (`remove`,
//! `previous`, `insert_before`, `get_last`) walks from the head.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;
use core::ptr;

use critical_section::{CriticalSection, Mutex};

use crate::error::{fatal, Fault, ListId};

type Slot<'a, T> = Mutex<Cell<Option<&'a T>>>;

/// Link fields embedded in a singly linked list member
pub struct SLinks<'a, T: ?Sized> {
    /// Successor, `None` at the tail
    next: Slot<'a, T>,
    /// List currently holding the node
    owner: Mutex<Cell<Option<ListId>>>,
}

impl<'a, T: ?Sized> SLinks<'a, T> {
    /// Unlinked, unowned node
    pub const fn new() -> Self {
        Self {
            next: Mutex::new(Cell::new(None)),
            owner: Mutex::new(Cell::new(None)),
        }
    }

    /// List currently holding the node
    pub fn owner(&self) -> Option<ListId> {
        critical_section::with(|cs| self.owner.borrow(cs).get())
    }

    /// True while the node belongs to a list
    pub fn is_linked(&self) -> bool {
        self.owner().is_some()
    }
}

impl<T: ?Sized> Default for SLinks<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type that embeds [`SLinks`] and can therefore sit in an [`SList`]
pub trait SLinked<'a> {
    fn slinks(&self) -> &SLinks<'a, Self>;
}

fn same<T: ?Sized>(a: &T, b: &T) -> bool {
    ptr::addr_eq(a as *const T, b as *const T)
}

/// Singly linked intrusive list of borrowed nodes.
///
/// Like [`DList`](crate::list::DList), dropping it leaves members tagged
/// with its id; drain it before it goes away.
pub struct SList<'a, T: ?Sized> {
    /// First member, `None` when empty
    head: Slot<'a, T>,
    /// Last member, `None` when empty
    tail: Slot<'a, T>,
    /// Owner tag stamped into members; claimed lazily by `zeroed`
    id: Mutex<Cell<Option<ListId>>>,
}

impl<'a, T: ?Sized + SLinked<'a>> SList<'a, T> {
    /// Empty list with its identity assigned up front
    pub fn new() -> Self {
        let id = critical_section::with(ListId::next);
        Self {
            head: Mutex::new(Cell::new(None)),
            tail: Mutex::new(Cell::new(None)),
            id: Mutex::new(Cell::new(Some(id))),
        }
    }

    /// Empty list for `static` storage; the identity is claimed on the
    /// first insertion.
    pub const fn zeroed() -> Self {
        Self {
            head: Mutex::new(Cell::new(None)),
            tail: Mutex::new(Cell::new(None)),
            id: Mutex::new(Cell::new(None)),
        }
    }

    /// Identity stamped into the owner tag of every member
    pub fn id(&self) -> ListId {
        critical_section::with(|cs| self.claim_id(cs))
    }

    fn claim_id(&self, cs: CriticalSection<'_>) -> ListId {
        let cell = self.id.borrow(cs);
        match cell.get() {
            Some(id) => id,
            None => {
                let id = ListId::next(cs);
                cell.set(Some(id));
                id
            }
        }
    }

    fn is_member(&self, cs: CriticalSection<'_>, node: &T) -> bool {
        let owner = node.slinks().owner.borrow(cs).get();
        owner.is_some() && owner == self.id.borrow(cs).get()
    }

    fn claim(&self, cs: CriticalSection<'_>, node: &T) -> Result<(), Fault> {
        let id = self.claim_id(cs);
        let owner = node.slinks().owner.borrow(cs);
        if let Some(owner) = owner.get() {
            return Err(Fault::OwnershipViolation { owner });
        }
        owner.set(Some(id));
        Ok(())
    }

    /// Member right before `node`, found by walking from the head.
    /// `Some(None)` means `node` is the head, `None` that it is absent.
    fn predecessor(&self, cs: CriticalSection<'_>, node: &T) -> Option<Option<&'a T>> {
        let mut prev = None;
        let mut cursor = self.head.borrow(cs).get();
        while let Some(cur) = cursor {
            if same(cur, node) {
                return Some(prev);
            }
            prev = Some(cur);
            cursor = cur.slinks().next.borrow(cs).get();
        }
        None
    }

    /// Link `node` after `prev` (`None` means at the head).
    fn splice(&self, cs: CriticalSection<'_>, node: &'a T, prev: Option<&T>) {
        let next = match prev {
            Some(p) => p.slinks().next.borrow(cs).replace(Some(node)),
            None => self.head.borrow(cs).replace(Some(node)),
        };
        node.slinks().next.borrow(cs).set(next);
        if next.is_none() {
            self.tail.borrow(cs).set(Some(node));
        }
    }

    /// Cut out the member following `prev` (`None` means the head).
    fn unlink(&self, cs: CriticalSection<'_>, node: &T, prev: Option<&'a T>) {
        let links = node.slinks();
        let next = links.next.borrow(cs).replace(None);
        links.owner.borrow(cs).set(None);
        match prev {
            Some(p) => p.slinks().next.borrow(cs).set(next),
            None => self.head.borrow(cs).set(next),
        }
        if next.is_none() {
            self.tail.borrow(cs).set(prev);
        }
    }

    /// Insert at the head, or report the list that already owns `node`
    pub fn try_put_first(&self, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            self.claim(cs, node)?;
            self.splice(cs, node, None);
            Ok(())
        })
    }

    /// Insert at the tail, or report the list that already owns `node`
    pub fn try_put_last(&self, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            self.claim(cs, node)?;
            let tail = self.tail.borrow(cs).get();
            self.splice(cs, node, tail);
            Ok(())
        })
    }

    /// Insert at the head. Halts if `node` is already linked.
    #[track_caller]
    pub fn put_first(&self, node: &'a T) {
        if let Err(fault) = self.try_put_first(node) {
            fatal(fault);
        }
    }

    /// Insert at the tail. Halts if `node` is already linked.
    #[track_caller]
    pub fn put_last(&self, node: &'a T) {
        if let Err(fault) = self.try_put_last(node) {
            fatal(fault);
        }
    }

    /// Insert `node` right after member `pos`
    pub fn try_insert_after(&self, pos: &T, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            if !self.is_member(cs, pos) {
                return Err(Fault::NotAMember { list: self.claim_id(cs) });
            }
            self.claim(cs, node)?;
            self.splice(cs, node, Some(pos));
            Ok(())
        })
    }

    /// Insert `node` right before member `pos`. O(n).
    pub fn try_insert_before(&self, pos: &T, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            let prev = if self.is_member(cs, pos) {
                self.predecessor(cs, pos)
            } else {
                None
            };
            let Some(prev) = prev else {
                return Err(Fault::NotAMember { list: self.claim_id(cs) });
            };
            self.claim(cs, node)?;
            self.splice(cs, node, prev);
            Ok(())
        })
    }

    /// Insert `node` right after member `pos`. Halts if `pos` is not a
    /// member or `node` is already linked.
    #[track_caller]
    pub fn insert_after(&self, pos: &T, node: &'a T) {
        if let Err(fault) = self.try_insert_after(pos, node) {
            fatal(fault);
        }
    }

    /// Insert `node` right before member `pos`. Halts if `pos` is not a
    /// member or `node` is already linked.
    #[track_caller]
    pub fn insert_before(&self, pos: &T, node: &'a T) {
        if let Err(fault) = self.try_insert_before(pos, node) {
            fatal(fault);
        }
    }

    /// Unlink and return the head
    pub fn get_first(&self) -> Option<&'a T> {
        critical_section::with(|cs| {
            let head = self.head.borrow(cs).get()?;
            self.unlink(cs, head, None);
            Some(head)
        })
    }

    /// Unlink and return the tail. O(n).
    pub fn get_last(&self) -> Option<&'a T> {
        critical_section::with(|cs| {
            let tail = self.tail.borrow(cs).get()?;
            let prev = self.predecessor(cs, tail)?;
            self.unlink(cs, tail, prev);
            Some(tail)
        })
    }

    /// Peek at the head
    pub fn first(&self) -> Option<&'a T> {
        critical_section::with(|cs| self.head.borrow(cs).get())
    }

    /// Peek at the tail
    pub fn last(&self) -> Option<&'a T> {
        critical_section::with(|cs| self.tail.borrow(cs).get())
    }

    /// Unlink `node` if this list owns it; otherwise a no-op returning
    /// false. O(n).
    pub fn remove(&self, node: &T) -> bool {
        critical_section::with(|cs| {
            if !self.is_member(cs, node) {
                return false;
            }
            match self.predecessor(cs, node) {
                Some(prev) => {
                    self.unlink(cs, node, prev);
                    true
                }
                None => false,
            }
        })
    }

    /// Walk the list looking for `node`. O(n).
    pub fn find(&self, node: &T) -> bool {
        critical_section::with(|cs| self.predecessor(cs, node).is_some())
    }

    /// Successor of member `node`. Halts if `node` is not in this list.
    #[track_caller]
    pub fn next(&self, node: &T) -> Option<&'a T> {
        let step = critical_section::with(|cs| {
            if self.is_member(cs, node) {
                Ok(node.slinks().next.borrow(cs).get())
            } else {
                Err(Fault::NotAMember { list: self.claim_id(cs) })
            }
        });
        step.unwrap_or_else(|fault| fatal(fault))
    }

    /// Predecessor of member `node`, found by search. O(n). Halts if
    /// `node` is not in this list.
    #[track_caller]
    pub fn previous(&self, node: &T) -> Option<&'a T> {
        let step = critical_section::with(|cs| {
            let prev = if self.is_member(cs, node) {
                self.predecessor(cs, node)
            } else {
                None
            };
            prev.ok_or_else(|| Fault::NotAMember { list: self.claim_id(cs) })
        });
        step.unwrap_or_else(|fault| fatal(fault))
    }

    /// Replace the content of `dst` with every node of this list,
    /// preserving order. `dst` is cleared first.
    pub fn move_to(&self, dst: &SList<'a, T>) {
        if same(self, dst) {
            return;
        }
        dst.clear();
        while let Some(node) = self.get_first() {
            dst.put_last(node);
        }
    }

    /// Unlink every node
    pub fn clear(&self) {
        while self.get_first().is_some() {}
    }

    /// True when the list holds no node
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    /// Member count. O(n).
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Queue alias of [`put_last`](Self::put_last)
    #[track_caller]
    pub fn put(&self, node: &'a T) {
        self.put_last(node);
    }

    /// Queue alias of [`get_first`](Self::get_first)
    pub fn get(&self) -> Option<&'a T> {
        self.get_first()
    }

    /// Queue alias of [`first`](Self::first)
    pub fn head(&self) -> Option<&'a T> {
        self.first()
    }

    /// Queue alias of [`last`](Self::last)
    pub fn tail(&self) -> Option<&'a T> {
        self.last()
    }

    /// Stack alias of [`put_first`](Self::put_first)
    #[track_caller]
    pub fn push(&self, node: &'a T) {
        self.put_first(node);
    }

    /// Stack alias of [`get_first`](Self::get_first)
    pub fn pop(&self) -> Option<&'a T> {
        self.get_first()
    }

    /// Stack alias of [`first`](Self::first)
    pub fn top(&self) -> Option<&'a T> {
        self.first()
    }

    /// Head-to-tail walk, one lock per step
    pub fn iter(&self) -> SIter<'a, T> {
        SIter { next: self.first() }
    }
}

impl<'a, T: ?Sized + SLinked<'a>> Default for SList<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`SList::iter`]
pub struct SIter<'a, T: ?Sized> {
    next: Option<&'a T>,
}

impl<'a, T: ?Sized + SLinked<'a>> Iterator for SIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let cur = self.next?;
        self.next = critical_section::with(|cs| cur.slinks().next.borrow(cs).get());
        Some(cur)
    }
}
