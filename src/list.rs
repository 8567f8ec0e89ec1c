//! Intrusive single-owner list
//!
//! Link fields live inside the stored objects ([`Links`]), so queuing a
//! message never allocates. Each node carries the [`ListId`] of the one
//! list that holds it; inserting a node that is already owned by any
//! list is a [`Fault::OwnershipViolation`].
//!
//! Every operation is one short critical section doing pointer splices
//! only. Faults are detected inside the section but raised after it
//! has been released.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;
use core::ptr;

use critical_section::{CriticalSection, Mutex};

use crate::error::{fatal, Fault, ListId};

type Slot<'a, T> = Mutex<Cell<Option<&'a T>>>;

/// Link fields embedded in a list member
pub struct Links<'a, T: ?Sized> {
    next: Slot<'a, T>,
    prev: Slot<'a, T>,
    owner: Mutex<Cell<Option<ListId>>>,
}

impl<'a, T: ?Sized> Links<'a, T> {
    /// Unlinked, unowned node
    pub const fn new() -> Self {
        Self {
            next: Mutex::new(Cell::new(None)),
            prev: Mutex::new(Cell::new(None)),
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

impl<T: ?Sized> Default for Links<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type that embeds [`Links`] and can therefore sit in a [`DList`]
pub trait Linked<'a> {
    fn links(&self) -> &Links<'a, Self>;
}

fn same<T: ?Sized>(a: &T, b: &T) -> bool {
    ptr::addr_eq(a as *const T, b as *const T)
}

/// Doubly linked intrusive list of borrowed nodes.
///
/// Dropping a list does not touch its members: drain it first (for
/// example with [`clear`](DList::clear)), or the nodes keep the dead
/// list's owner tag and every later insert of them is a fault.
pub struct DList<'a, T: ?Sized> {
    /// First member, `None` when empty
    head: Slot<'a, T>,
    /// Last member, `None` when empty
    tail: Slot<'a, T>,
    /// Owner tag stamped into members; claimed lazily by `zeroed`
    id: Mutex<Cell<Option<ListId>>>,
}

impl<'a, T: ?Sized + Linked<'a>> DList<'a, T> {
    /// Empty list with its identity assigned up front
    pub fn new() -> Self {
        let id = critical_section::with(ListId::next);
        Self {
            head: Mutex::new(Cell::new(None)),
            tail: Mutex::new(Cell::new(None)),
            id: Mutex::new(Cell::new(Some(id))),
        }
    }

    /// Empty list for `static` storage.
    ///
    /// Nothing runs at construction; the identity is claimed on the
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
        let owner = node.links().owner.borrow(cs).get();
        owner.is_some() && owner == self.id.borrow(cs).get()
    }

    fn claim(&self, cs: CriticalSection<'_>, node: &T) -> Result<(), Fault> {
        let id = self.claim_id(cs);
        let owner = node.links().owner.borrow(cs);
        if let Some(owner) = owner.get() {
            return Err(Fault::OwnershipViolation { owner });
        }
        owner.set(Some(id));
        Ok(())
    }

    /// Splice `node` between `prev` and `next`; `None` means list end.
    fn splice(
        &self,
        cs: CriticalSection<'_>,
        node: &'a T,
        prev: Option<&'a T>,
        next: Option<&'a T>,
    ) {
        let links = node.links();
        links.prev.borrow(cs).set(prev);
        links.next.borrow(cs).set(next);
        match prev {
            Some(p) => p.links().next.borrow(cs).set(Some(node)),
            None => self.head.borrow(cs).set(Some(node)),
        }
        match next {
            Some(n) => n.links().prev.borrow(cs).set(Some(node)),
            None => self.tail.borrow(cs).set(Some(node)),
        }
    }

    /// Cut a member out and clear its links and owner tag.
    fn unlink(&self, cs: CriticalSection<'_>, node: &T) {
        let links = node.links();
        let prev = links.prev.borrow(cs).replace(None);
        let next = links.next.borrow(cs).replace(None);
        links.owner.borrow(cs).set(None);
        match prev {
            Some(p) => p.links().next.borrow(cs).set(next),
            None => self.head.borrow(cs).set(next),
        }
        match next {
            Some(n) => n.links().prev.borrow(cs).set(prev),
            None => self.tail.borrow(cs).set(prev),
        }
    }

    /// Insert at the head, or report the list that already owns `node`
    pub fn try_put_first(&self, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            self.claim(cs, node)?;
            let head = self.head.borrow(cs).get();
            self.splice(cs, node, None, head);
            Ok(())
        })
    }

    /// Insert at the tail, or report the list that already owns `node`
    pub fn try_put_last(&self, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            self.claim(cs, node)?;
            let tail = self.tail.borrow(cs).get();
            self.splice(cs, node, tail, None);
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
            let next = pos.links().next.borrow(cs).get();
            let prev = match next {
                Some(n) => n.links().prev.borrow(cs).get(),
                None => self.tail.borrow(cs).get(),
            };
            self.splice(cs, node, prev, next);
            Ok(())
        })
    }

    /// Insert `node` right before member `pos`
    pub fn try_insert_before(&self, pos: &T, node: &'a T) -> Result<(), Fault> {
        critical_section::with(|cs| {
            if !self.is_member(cs, pos) {
                return Err(Fault::NotAMember { list: self.claim_id(cs) });
            }
            self.claim(cs, node)?;
            let prev = pos.links().prev.borrow(cs).get();
            let next = match prev {
                Some(p) => p.links().next.borrow(cs).get(),
                None => self.head.borrow(cs).get(),
            };
            self.splice(cs, node, prev, next);
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
            self.unlink(cs, head);
            Some(head)
        })
    }

    /// Unlink and return the tail
    pub fn get_last(&self) -> Option<&'a T> {
        critical_section::with(|cs| {
            let tail = self.tail.borrow(cs).get()?;
            self.unlink(cs, tail);
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

    /// Unlink `node` if this list owns it; otherwise a no-op returning false.
    pub fn remove(&self, node: &T) -> bool {
        critical_section::with(|cs| {
            if !self.is_member(cs, node) {
                return false;
            }
            self.unlink(cs, node);
            true
        })
    }

    /// Walk the list looking for `node`. O(n).
    pub fn find(&self, node: &T) -> bool {
        critical_section::with(|cs| {
            let mut cursor = self.head.borrow(cs).get();
            while let Some(cur) = cursor {
                if same(cur, node) {
                    return true;
                }
                cursor = cur.links().next.borrow(cs).get();
            }
            false
        })
    }

    /// Successor of member `node`. Halts if `node` is not in this list.
    #[track_caller]
    pub fn next(&self, node: &T) -> Option<&'a T> {
        let step = critical_section::with(|cs| {
            if self.is_member(cs, node) {
                Ok(node.links().next.borrow(cs).get())
            } else {
                Err(Fault::NotAMember { list: self.claim_id(cs) })
            }
        });
        step.unwrap_or_else(|fault| fatal(fault))
    }

    /// Predecessor of member `node`. Halts if `node` is not in this list.
    #[track_caller]
    pub fn previous(&self, node: &T) -> Option<&'a T> {
        let step = critical_section::with(|cs| {
            if self.is_member(cs, node) {
                Ok(node.links().prev.borrow(cs).get())
            } else {
                Err(Fault::NotAMember { list: self.claim_id(cs) })
            }
        });
        step.unwrap_or_else(|fault| fatal(fault))
    }

    /// Replace the content of `dst` with every node of this list,
    /// preserving order.
    ///
    /// `dst` is cleared first; its old members end up unlinked. Nodes
    /// move one at a time, so each one is owned by exactly one of the two
    /// lists at every instant.
    pub fn move_to(&self, dst: &DList<'a, T>) {
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

    /// Head-to-tail walk. Each step takes the lock on its own, so the
    /// iterator sees concurrent splices; it stops early if the current
    /// node is removed under it.
    pub fn iter(&self) -> Iter<'a, T> {
        Iter { next: self.first() }
    }
}

impl<'a, T: ?Sized + Linked<'a>> Default for DList<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`DList::iter`]
pub struct Iter<'a, T: ?Sized> {
    next: Option<&'a T>,
}

impl<'a, T: ?Sized + Linked<'a>> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let cur = self.next?;
        self.next = critical_section::with(|cs| cur.links().next.borrow(cs).get());
        Some(cur)
    }
}
