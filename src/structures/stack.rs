use crate::memory::{Domain, HazardError, HazardHandle};
use rand::Rng;
use std::fmt;
use std::hint;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

const MAX_BACKOFF: u32 = 1024;

/// A lock-free Treiber stack whose nodes are reclaimed with hazard pointers.
///
/// `push` and `pop` never block. A popped node is freed at once when no other thread
/// has published its address; otherwise it is retired to the stack's [`Domain`] and
/// freed by whichever pop later finds it unwatched.
pub struct Stack<T: Send> {
    head: AtomicPtr<Node<T>>,
    domain: Arc<Domain>,
    _marker: PhantomData<T>,
}

// Values only ever move between threads, they are never shared.
unsafe impl<T: Send> Sync for Stack<T> {}

struct Node<T> {
    // Moved out by the pop that unlinks the node, never dropped in place after that.
    payload: ManuallyDrop<T>,
    // Written before the node is published, immutable afterwards.
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn new_as_pointer(val: T) -> *mut Self {
        Box::into_raw(Box::new(Node {
            payload: ManuallyDrop::new(val),
            next: ptr::null_mut(),
        }))
    }
}

/// Frees a node whose payload has already been moved out.
unsafe fn destroy_node<T>(address: *mut ()) {
    drop(Box::from_raw(address as *mut Node<T>));
}

/// Randomized exponential spin between failed compare-and-swap attempts.
struct Backoff {
    limit: u32,
}

impl Backoff {
    fn new() -> Self {
        Backoff { limit: 1 }
    }

    fn spin(&mut self) {
        let spins = rand::thread_rng().gen_range(0..self.limit);
        for _ in 0..spins {
            hint::spin_loop();
        }
        self.limit = (self.limit * 2).min(MAX_BACKOFF);
    }
}

impl<T: Send> Stack<T> {
    /// Create a stack reclaiming through the process-wide domain.
    /// # Examples
    /// ```
    /// use hazard_stack::structures::Stack;
    ///
    /// let stack: Stack<String> = Stack::new();
    /// assert!(stack.is_empty());
    /// ```
    pub fn new() -> Self {
        Stack::with_domain(Domain::global())
    }

    /// Create a stack reclaiming through `domain`.
    pub fn with_domain(domain: Arc<Domain>) -> Self {
        Stack {
            head: AtomicPtr::default(),
            domain,
            _marker: PhantomData,
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Add a value to the top of the stack.
    /// # Examples
    /// ```
    /// use hazard_stack::structures::Stack;
    ///
    /// let stack = Stack::new();
    /// stack.push("hello".to_owned());
    /// assert_eq!(stack.pop().unwrap(), Some("hello".to_owned()));
    /// ```
    pub fn push(&self, val: T) {
        let node = Node::new_as_pointer(val);
        let mut backoff = Backoff::new();
        while !self.try_push(node) {
            backoff.spin();
        }
    }

    fn try_push(&self, node: *mut Node<T>) -> bool {
        let old_head = self.head.load(Ordering::Acquire);
        // The node is still private to this thread, so `next` can be rewritten freely.
        unsafe {
            (*node).next = old_head;
        }
        // Linearization point of a push.
        self.head
            .compare_exchange_weak(old_head, node, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Take the top value, protecting the read with the calling thread's lease from
    /// the domain's registry.
    ///
    /// Returns `Ok(None)` if the stack was empty, and an error only if the thread
    /// holds no lease yet and every hazard slot is taken.
    pub fn pop(&self) -> Result<Option<T>, HazardError> {
        self.domain.with_local_handle(|handle| self.pop_with(handle))
    }

    /// Take the top value, protecting the read with `handle`.
    ///
    /// # Panics
    ///
    /// If `handle` leases a slot of another domain's table, since publishing there
    /// would not protect anything from this stack's reclaimers.
    pub fn pop_with(&self, handle: &HazardHandle) -> Option<T> {
        assert!(
            Arc::ptr_eq(handle.table(), self.domain.slots()),
            "hazard handle belongs to a different domain"
        );
        let mut backoff = Backoff::new();
        let node = loop {
            match self.try_pop(handle) {
                Ok(node) => break node,
                Err(_) => backoff.spin(),
            }
        };
        handle.clear();
        if node.is_null() {
            return None;
        }
        // This thread won the unlink, so it alone takes the payload. Other threads may
        // still read `next` through a stale hazard, never the payload.
        let val = unsafe { ManuallyDrop::into_inner(ptr::read(&(*node).payload)) };
        unsafe {
            self.retire_or_destroy(node);
        }
        self.domain.reclaim_if_due();
        Some(val)
    }

    /// One unlink attempt. `Ok` carries the removed node, or null if the stack was
    /// empty; `Err` carries the head that was lost to a concurrent update.
    fn try_pop(&self, handle: &HazardHandle) -> Result<*mut Node<T>, *mut Node<T>> {
        let old_head = handle.protect(&self.head);
        if old_head.is_null() {
            return Ok(old_head);
        }
        // `old_head` is published and was still the head afterwards, so it is alive.
        let new_head = unsafe { (*old_head).next };
        // Linearization point of a successful pop.
        self.head
            .compare_exchange(old_head, new_head, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| old_head)
    }

    /// Free an unlinked node, or retire it if some slot still watches it.
    unsafe fn retire_or_destroy(&self, node: *mut Node<T>) {
        let address = node as *mut ();
        if self.domain.is_watched(address) {
            self.domain.retire(address, destroy_node::<T>);
        } else {
            destroy_node::<T>(address);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T: Send> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

impl<T: Send> Drop for Stack<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let node = unsafe { Box::from_raw(current) };
            current = node.next;
            drop(ManuallyDrop::into_inner(node.payload));
        }
    }
}

impl<T: Send> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stack")
            .field("head", &self.head)
            .field("domain", &self.domain)
            .finish()
    }
}
