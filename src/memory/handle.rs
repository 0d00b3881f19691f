use super::error::HazardError;
use super::slot_table::{HazardSlotTable, ThreadIdentity};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// A lease on exactly one slot of a [`HazardSlotTable`].
///
/// Acquire one per thread and reuse it for every operation; dropping the handle
/// releases the slot. The handle can be moved to another thread but not shared,
/// since two threads publishing through one slot would overwrite each other's hazard.
pub struct HazardHandle {
    table: Arc<HazardSlotTable>,
    index: usize,
    owner: ThreadIdentity,
    _not_sync: PhantomData<Cell<()>>,
}

impl HazardHandle {
    /// Lease a free slot of `table` for the calling thread.
    pub fn acquire(table: &Arc<HazardSlotTable>) -> Result<Self, HazardError> {
        let owner = ThreadIdentity::current();
        let index = table.acquire_slot(owner)?;
        Ok(HazardHandle {
            table: Arc::clone(table),
            index,
            owner,
            _not_sync: PhantomData,
        })
    }

    pub fn slot(&self) -> usize {
        self.index
    }

    pub fn owner(&self) -> ThreadIdentity {
        self.owner
    }

    pub fn table(&self) -> &Arc<HazardSlotTable> {
        &self.table
    }

    /// Announce that `address` is about to be dereferenced.
    pub fn publish<T>(&self, address: *mut T) {
        self.table.publish(self.index, address as *mut ());
    }

    /// End protection of whatever was published.
    pub fn clear(&self) {
        self.table.publish(self.index, ptr::null_mut());
    }

    /// Load `source` and protect the loaded pointer.
    ///
    /// Publishes the loaded value, then reloads `source`; if it moved, the new value is
    /// published and checked again. The returned pointer is the one currently
    /// published, and it was still stored in `source` after publication, so it cannot
    /// have been freed by a reclaimer that scans after unlinking it.
    pub fn protect<T>(&self, source: &AtomicPtr<T>) -> *mut T {
        let mut candidate = source.load(Ordering::SeqCst);
        loop {
            self.publish(candidate);
            let current = source.load(Ordering::SeqCst);
            if current == candidate {
                return candidate;
            }
            candidate = current;
        }
    }
}

impl Drop for HazardHandle {
    fn drop(&mut self) {
        self.table.release_slot(self.index);
    }
}

impl fmt::Debug for HazardHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardHandle")
            .field("slot", &self.index)
            .field("owner", &self.owner)
            .finish()
    }
}
