use super::error::HazardError;
use log::{debug, warn};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Owner value of a slot nobody is leasing.
const EMPTY_OWNER: usize = 0;

static NEXT_THREAD_IDENTITY: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_IDENTITY: usize = NEXT_THREAD_IDENTITY.fetch_add(1, Ordering::Relaxed);
}

/// A process-unique, non-zero token naming a thread.
///
/// Assigned from a global counter the first time a thread asks for it, so it is never
/// equal to the empty owner sentinel of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadIdentity(usize);

impl ThreadIdentity {
    /// The identity of the calling thread.
    pub fn current() -> Self {
        ThreadIdentity(THREAD_IDENTITY.with(|id| *id))
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

struct HazardSlot {
    owner: AtomicUsize,
    watched: AtomicPtr<()>,
}

impl HazardSlot {
    fn new() -> Self {
        HazardSlot {
            owner: AtomicUsize::new(EMPTY_OWNER),
            watched: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A fixed-capacity table of (owner, watched address) pairs.
///
/// Threads lease one slot each and publish in it the address they are about to
/// dereference. Reclaimers scan every slot before freeing anything, which makes the
/// scan the dominant cost of reclamation: keep the capacity in the tens.
///
/// Slots are only leased and released through [`HazardHandle`](super::HazardHandle),
/// so a slot cannot be handed to a second holder while its lease is alive:
///
/// ```compile_fail
/// use hazard_stack::memory::Domain;
///
/// let domain = Domain::with_capacity(1);
/// let handle = domain.acquire_handle().unwrap();
/// domain.slots().release_slot(handle.slot());
/// ```
pub struct HazardSlotTable {
    slots: Box<[HazardSlot]>,
}

impl HazardSlotTable {
    pub fn new(capacity: usize) -> Self {
        HazardSlotTable {
            slots: (0..capacity).map(|_| HazardSlot::new()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot for `owner`.
    ///
    /// The claim is a compare-and-swap of the owner field from empty to `owner`, so two
    /// threads racing for the same slot cannot both win it. Fails once every slot has
    /// been tried.
    pub(crate) fn acquire_slot(&self, owner: ThreadIdentity) -> Result<usize, HazardError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.owner.load(Ordering::Relaxed) != EMPTY_OWNER {
                continue;
            }
            if slot
                .owner
                .compare_exchange(EMPTY_OWNER, owner.0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.watched.store(ptr::null_mut(), Ordering::SeqCst);
                debug!("hazard slot {} leased by thread {}", index, owner.0);
                return Ok(index);
            }
        }
        warn!(
            "thread {} found no free hazard slot ({} slots)",
            owner.0,
            self.capacity()
        );
        Err(HazardError::ResourceExhausted {
            capacity: self.capacity(),
        })
    }

    /// Clear the watched address, then give the slot back. Only the lease holder calls
    /// this, once.
    pub(crate) fn release_slot(&self, index: usize) {
        let slot = &self.slots[index];
        slot.watched.store(ptr::null_mut(), Ordering::SeqCst);
        let owner = slot.owner.swap(EMPTY_OWNER, Ordering::Release);
        debug!("hazard slot {} released by thread {}", index, owner);
    }

    /// Publish `address` in slot `index`. Only the slot's lease holder calls this.
    pub(crate) fn publish(&self, index: usize, address: *mut ()) {
        // SeqCst: the store must be ordered before the holder's re-read of the source
        // pointer, and before any reclaimer's scan that follows its unlink.
        self.slots[index].watched.store(address, Ordering::SeqCst);
    }

    /// Whether any slot currently watches `address`. Null is never watched.
    pub fn is_watched(&self, address: *const ()) -> bool {
        if address.is_null() {
            return false;
        }
        self.slots
            .iter()
            .any(|slot| slot.watched.load(Ordering::SeqCst) as *const () == address)
    }

    /// Number of leased slots.
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.owner.load(Ordering::Acquire) != EMPTY_OWNER)
            .count()
    }

    pub fn owner_of(&self, index: usize) -> Option<ThreadIdentity> {
        match self.slots.get(index)?.owner.load(Ordering::Acquire) {
            EMPTY_OWNER => None,
            owner => Some(ThreadIdentity(owner)),
        }
    }
}

impl fmt::Debug for HazardSlotTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardSlotTable")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}
