use super::slot_table::HazardSlotTable;
use log::trace;
use std::fmt;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Frees a retired record given its type-erased address.
pub type Destructor = unsafe fn(*mut ());

struct Retired {
    address: *mut (),
    destroy: Destructor,
    next: *mut Retired,
}

/// Unlinked records that may still be watched by a hazard slot.
///
/// The list is itself a small lock-free stack: appends are compare-and-swap pushes
/// and a drain detaches the whole chain with one exchange. Records are type-erased
/// so structures with different element types can share one list.
pub struct RetireList {
    head: AtomicPtr<Retired>,
    pending: AtomicUsize,
}

// Only raw pointers to records that are unreachable from any live structure are held
// here, and whoever detaches a record is its only owner until it re-appends it.
unsafe impl Send for RetireList {}
unsafe impl Sync for RetireList {}

impl RetireList {
    pub fn new() -> Self {
        RetireList {
            head: AtomicPtr::default(),
            pending: AtomicUsize::new(0),
        }
    }

    /// Hand `address` over for deferred destruction.
    ///
    /// # Safety
    ///
    /// `address` must be unreachable from every shared structure, must not be retired
    /// twice, and `destroy` must be the matching destructor for it. The record may be
    /// destroyed from any thread. Dropping the list destroys every record still
    /// pending, so a list that may be dropped while a slot watches one of its records
    /// must be emptied with [`RetireList::release_remaining`] first.
    pub unsafe fn append(&self, address: *mut (), destroy: Destructor) {
        let entry = Box::into_raw(Box::new(Retired {
            address,
            destroy,
            next: ptr::null_mut(),
        }));
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.push_entry(entry);
    }

    fn push_entry(&self, entry: *mut Retired) {
        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe {
                (*entry).next = head;
            }
            if self
                .head
                .compare_exchange_weak(head, entry, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Detach every pending record and destroy those no slot of `table` watches.
    ///
    /// Watched records go back on the list for a later sweep. Returns how many records
    /// were destroyed. Concurrent drains each work on the chain they detached, so no
    /// record is seen by two of them at once.
    pub fn drain_and_reclaim(&self, table: &HazardSlotTable) -> usize {
        let mut current = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut reclaimed = 0;
        let mut survivors = 0;
        while !current.is_null() {
            let entry = current;
            unsafe {
                current = (*entry).next;
                if table.is_watched((*entry).address) {
                    self.push_entry(entry);
                    survivors += 1;
                } else {
                    let retired = Box::from_raw(entry);
                    (retired.destroy)(retired.address);
                    reclaimed += 1;
                }
            }
        }
        if reclaimed > 0 {
            self.pending.fetch_sub(reclaimed, Ordering::Relaxed);
        }
        if reclaimed + survivors > 0 {
            trace!(
                "retire sweep: {} reclaimed, {} still watched",
                reclaimed,
                survivors
            );
        }
        reclaimed
    }

    /// Empty the list for good: destroy the records no slot of `table` watches and
    /// forget the watched ones, which stay allocated. Returns how many were forgotten.
    pub fn release_remaining(&mut self, table: &HazardSlotTable) -> usize {
        let mut current = mem::replace(self.head.get_mut(), ptr::null_mut());
        let mut leaked = 0;
        while !current.is_null() {
            unsafe {
                let retired = Box::from_raw(current);
                current = retired.next;
                if table.is_watched(retired.address) {
                    leaked += 1;
                } else {
                    (retired.destroy)(retired.address);
                }
            }
        }
        *self.pending.get_mut() = 0;
        leaked
    }

    /// Records retired but not yet destroyed. Exact once concurrent sweeps finish.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl Default for RetireList {
    fn default() -> Self {
        RetireList::new()
    }
}

impl Drop for RetireList {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            unsafe {
                let retired = Box::from_raw(current);
                current = retired.next;
                (retired.destroy)(retired.address);
            }
        }
    }
}

impl fmt::Debug for RetireList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RetireList")
            .field("pending", &self.pending())
            .finish()
    }
}
