use super::error::HazardError;
use super::handle::HazardHandle;
use super::retire_list::{Destructor, RetireList};
use super::slot_table::HazardSlotTable;
use lazy_static::lazy_static;
use log::{debug, warn};
use std::cell::RefCell;
use std::env;
use std::fmt;
use std::sync::Arc;

/// Slot count of a default-configured domain.
pub const DEFAULT_CAPACITY: usize = 100;

/// Environment variable overriding the slot count of the global domain.
pub const CAPACITY_ENV_VAR: &str = "HAZARD_STACK_SLOTS";

/// Settings of a reclamation [`Domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of hazard slots. Must cover the peak number of concurrently popping threads.
    pub capacity: usize,
    /// A pop only sweeps the retire list when more than this many records are pending.
    /// Zero sweeps whenever anything is pending.
    pub drain_threshold: usize,
}

impl Config {
    pub fn new(capacity: usize) -> Self {
        Config {
            capacity,
            drain_threshold: 0,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_drain_threshold(mut self, drain_threshold: usize) -> Self {
        self.drain_threshold = drain_threshold;
        self
    }

    /// The default configuration, with the capacity taken from `HAZARD_STACK_SLOTS`
    /// when it holds a positive integer.
    pub fn from_env() -> Self {
        let config = Config::default();
        match env::var(CAPACITY_ENV_VAR) {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.with_capacity(capacity),
                _ => {
                    warn!(
                        "ignoring {}={:?}: expected a positive slot count, using {}",
                        CAPACITY_ENV_VAR, raw, config.capacity
                    );
                    config
                }
            },
            Err(_) => config,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_CAPACITY)
    }
}

lazy_static! {
    static ref GLOBAL_DOMAIN: Arc<Domain> = Arc::new(Domain::new(Config::from_env()));
}

thread_local! {
    // At most one cached lease per domain. Dropped at thread exit, which gives the
    // slots back.
    static LEASES: RefCell<Vec<HazardHandle>> = RefCell::new(Vec::new());
}

/// A hazard slot table together with the retire list whose records it guards.
///
/// Every structure built on the same domain shares its slots and its garbage, so a
/// pop on one stack may free nodes retired by another. Domains are created once and
/// never resized. Tests build small private ones; everything else can use
/// [`Domain::global`].
pub struct Domain {
    slots: Arc<HazardSlotTable>,
    retired: RetireList,
    config: Config,
}

impl Domain {
    pub fn new(config: Config) -> Self {
        debug!(
            "creating hazard domain with {} slots (drain threshold {})",
            config.capacity, config.drain_threshold
        );
        Domain {
            slots: Arc::new(HazardSlotTable::new(config.capacity)),
            retired: RetireList::new(),
            config,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Domain::new(Config::new(capacity))
    }

    /// The process-wide domain, created on first use from [`Config::from_env`].
    pub fn global() -> Arc<Domain> {
        Arc::clone(&GLOBAL_DOMAIN)
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn slots(&self) -> &Arc<HazardSlotTable> {
        &self.slots
    }

    /// Lease a slot for an explicitly managed handle.
    pub fn acquire_handle(&self) -> Result<HazardHandle, HazardError> {
        HazardHandle::acquire(&self.slots)
    }

    /// Run `f` with the calling thread's cached lease, leasing a slot on first use.
    ///
    /// The lease stays cached until [`Domain::release_local_handle`] or until the
    /// thread exits, whichever comes first. A nested call on the same domain leases a
    /// second slot for its duration.
    pub fn with_local_handle<R, F>(&self, f: F) -> Result<R, HazardError>
    where
        F: FnOnce(&HazardHandle) -> R,
    {
        // No cache once the thread's locals are being torn down: lease for this call only.
        let cached = LEASES
            .try_with(|leases| self.take_lease(&mut leases.borrow_mut()))
            .ok()
            .flatten();
        let handle = match cached {
            Some(handle) => handle,
            None => {
                let handle = self.acquire_handle()?;
                debug!("thread lease created on hazard slot {}", handle.slot());
                handle
            }
        };
        // The cache is not borrowed while `f` runs, and a panic in `f` drops the lease.
        let result = f(&handle);
        self.return_lease(handle);
        Ok(result)
    }

    /// Give back the calling thread's cached lease, if it has one.
    pub fn release_local_handle(&self) {
        let _ = LEASES.try_with(|leases| self.take_lease(&mut leases.borrow_mut()));
    }

    fn owns(&self, handle: &HazardHandle) -> bool {
        Arc::ptr_eq(handle.table(), &self.slots)
    }

    fn take_lease(&self, leases: &mut Vec<HazardHandle>) -> Option<HazardHandle> {
        // A table only the cached handle still points at belongs to a dropped domain.
        leases.retain(|handle| Arc::strong_count(handle.table()) > 1);
        let position = leases.iter().position(|handle| self.owns(handle))?;
        Some(leases.swap_remove(position))
    }

    fn return_lease(&self, handle: HazardHandle) {
        // If the cache is gone the closure is dropped unrun, releasing the handle.
        let _ = LEASES.try_with(move |leases| {
            let mut leases = leases.borrow_mut();
            if !leases.iter().any(|cached| self.owns(cached)) {
                leases.push(handle);
            }
        });
    }

    pub fn is_watched(&self, address: *const ()) -> bool {
        self.slots.is_watched(address)
    }

    /// Queue `address` for destruction once no slot watches it.
    ///
    /// # Safety
    ///
    /// Same contract as [`RetireList::append`].
    pub unsafe fn retire(&self, address: *mut (), destroy: Destructor) {
        self.retired.append(address, destroy);
    }

    /// Sweep the retire list now. Returns the number of records destroyed.
    pub fn reclaim(&self) -> usize {
        self.retired.drain_and_reclaim(&self.slots)
    }

    /// Sweep the retire list if more than the configured threshold is pending.
    pub fn reclaim_if_due(&self) -> usize {
        if self.retired.pending() > self.config.drain_threshold {
            self.reclaim()
        } else {
            0
        }
    }

    pub fn pending(&self) -> usize {
        self.retired.pending()
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        let leaked = self.retired.release_remaining(&self.slots);
        if leaked > 0 {
            warn!(
                "hazard domain dropped with {} retired records still watched, leaking them",
                leaked
            );
        }
    }
}

impl Default for Domain {
    fn default() -> Self {
        Domain::new(Config::default())
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Domain")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .field("retired", &self.retired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Domain, DEFAULT_CAPACITY};
    use crate::memory::HazardError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    struct Counted(u32);

    impl Drop for Counted {
        fn drop(&mut self) {
            DROPPED.fetch_add(1, Ordering::SeqCst);
        }
    }

    unsafe fn destroy_counted(address: *mut ()) {
        drop(Box::from_raw(address as *mut Counted));
    }

    unsafe fn destroy_u32(address: *mut ()) {
        drop(Box::from_raw(address as *mut u32));
    }

    #[test]
    fn test_config_builders() {
        let config = Config::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.drain_threshold, 0);
        let config = config.with_capacity(4).with_drain_threshold(16);
        assert_eq!(config, Config { capacity: 4, drain_threshold: 16 });
    }

    #[test]
    fn test_global_domain_is_shared() {
        let a = Domain::global();
        let b = Domain::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.slots().capacity() > 0);
    }

    #[test]
    fn test_local_handle_is_reused() {
        let domain = Domain::with_capacity(2);
        let first = domain.with_local_handle(|handle| handle.slot()).unwrap();
        let second = domain.with_local_handle(|handle| handle.slot()).unwrap();
        assert_eq!(first, second);
        assert_eq!(domain.slots().in_use(), 1);
        domain.release_local_handle();
        assert_eq!(domain.slots().in_use(), 0);
    }

    #[test]
    fn test_nested_local_handle_leases_second_slot() {
        let domain = Domain::with_capacity(2);
        let slots = domain
            .with_local_handle(|outer| {
                let inner = domain.with_local_handle(|inner| inner.slot()).unwrap();
                (outer.slot(), inner)
            })
            .unwrap();
        assert_ne!(slots.0, slots.1);
    }

    #[test]
    fn test_exited_threads_release_their_leases() {
        let domain = Domain::with_capacity(3);
        let shared = Arc::new(Barrier::new(3));
        let domain_ref = &domain;
        crossbeam::scope(|scope| {
            for _ in 0..3 {
                let shared = shared.clone();
                scope.spawn(move |_| {
                    domain_ref.with_local_handle(|_| ()).unwrap();
                    shared.wait();
                    assert_eq!(domain_ref.slots().in_use(), 3);
                });
            }
        })
        .unwrap();
        assert_eq!(domain.slots().in_use(), 0);
        assert_eq!(domain.with_local_handle(|handle| handle.slot()), Ok(0));
    }

    #[test]
    fn test_lease_released_while_unrelated_thread_lives() {
        let domain = Arc::new(Domain::with_capacity(1));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let bystander = thread::spawn(move || {
            let elsewhere = Domain::with_capacity(1);
            elsewhere.with_local_handle(|_| ()).unwrap();
            ready_tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });
        ready_rx.recv().unwrap();

        let first = domain.clone();
        thread::spawn(move || first.with_local_handle(|_| ()).unwrap())
            .join()
            .unwrap();
        assert_eq!(domain.slots().in_use(), 0);

        done_tx.send(()).unwrap();
        bystander.join().unwrap();
        let second = domain.clone();
        let served = thread::spawn(move || second.with_local_handle(|handle| handle.slot()))
            .join()
            .unwrap();
        assert_eq!(served, Ok(0));
    }

    #[test]
    fn test_lease_of_dropped_domain_is_pruned() {
        let first = Domain::with_capacity(1);
        first.with_local_handle(|_| ()).unwrap();
        let table = Arc::downgrade(first.slots());
        drop(first);
        assert!(table.upgrade().is_some());
        let second = Domain::with_capacity(1);
        second.with_local_handle(|_| ()).unwrap();
        assert!(table.upgrade().is_none());
        second.release_local_handle();
    }

    #[test]
    fn test_local_handle_exhaustion() {
        let domain = Arc::new(Domain::with_capacity(1));
        let _held = domain.acquire_handle().unwrap();
        let other = domain.clone();
        let result = thread::spawn(move || other.with_local_handle(|_| ()))
            .join()
            .unwrap();
        assert_eq!(result, Err(HazardError::ResourceExhausted { capacity: 1 }));
    }

    #[test]
    fn test_reclaim_if_due_respects_threshold() {
        let domain = Domain::new(Config::new(2).with_drain_threshold(2));
        for n in 0..2u32 {
            unsafe { domain.retire(Box::into_raw(Box::new(n)) as *mut (), destroy_u32) };
        }
        assert_eq!(domain.reclaim_if_due(), 0);
        assert_eq!(domain.pending(), 2);
        unsafe { domain.retire(Box::into_raw(Box::new(2u32)) as *mut (), destroy_u32) };
        assert_eq!(domain.reclaim_if_due(), 3);
        assert_eq!(domain.pending(), 0);
    }

    #[test]
    fn test_drop_leaks_records_still_watched() {
        let domain = Domain::with_capacity(2);
        let handle = domain.acquire_handle().unwrap();
        let watched = Box::into_raw(Box::new(Counted(1)));
        let unwatched = Box::into_raw(Box::new(Counted(2)));
        unsafe {
            domain.retire(watched as *mut (), destroy_counted);
            domain.retire(unwatched as *mut (), destroy_counted);
        }
        handle.publish(watched);
        drop(domain);
        assert_eq!(DROPPED.load(Ordering::SeqCst), 1);
        // The handle keeps the table alive, and the record it watches with it.
        assert_eq!(unsafe { (*watched).0 }, 1);
        drop(handle);
        drop(unsafe { Box::from_raw(watched) });
        assert_eq!(DROPPED.load(Ordering::SeqCst), 2);
    }
}
