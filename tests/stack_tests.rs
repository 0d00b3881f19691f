use hazard_stack::memory::{Config, Domain, HazardError};
use hazard_stack::structures::Stack;
use hazard_stack::testing::run_conservation;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn lifo_order_single_thread() {
    let stack = Stack::with_domain(Arc::new(Domain::with_capacity(1)));
    stack.push(1);
    stack.push(2);
    stack.push(3);
    assert_eq!(stack.pop(), Ok(Some(3)));
    assert_eq!(stack.pop(), Ok(Some(2)));
    assert_eq!(stack.pop(), Ok(Some(1)));
}

#[test]
fn empty_pop_is_repeatable() {
    let stack: Stack<u8> = Stack::new();
    for _ in 0..10 {
        assert_eq!(stack.pop(), Ok(None));
    }
    assert!(stack.is_empty());
}

#[test]
fn conservation_under_concurrency() {
    let stack = Stack::with_domain(Arc::new(Domain::with_capacity(16)));
    let report = run_conservation(&stack, 8, 10_000, |worker, n| (worker, n)).unwrap();
    assert_eq!(report.pushed_total(), 80_000);
    assert!(report.lost().is_empty());
    assert!(report.duplicated().is_empty());
    assert!(report.is_conserved());
    stack.domain().reclaim();
    assert_eq!(stack.domain().pending(), 0);
}

#[test]
fn conservation_with_lazy_sweeps() {
    let domain = Arc::new(Domain::new(Config::new(16).with_drain_threshold(64)));
    let stack = Stack::with_domain(domain.clone());
    let report = run_conservation(&stack, 6, 5_000, |worker, n| worker * 5_000 + n).unwrap();
    assert!(report.is_conserved());
    domain.reclaim();
    assert_eq!(domain.pending(), 0);
}

#[test]
fn slot_capacity_boundary() {
    let capacity = 4;
    let stack: Arc<Stack<usize>> = Arc::new(Stack::with_domain(Arc::new(Domain::with_capacity(capacity))));
    for n in 0..100 {
        stack.push(n);
    }
    let barrier = Arc::new(Barrier::new(capacity + 1));
    let handles: Vec<_> = (0..capacity + 1)
        .map(|_| {
            let stack = stack.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let result = stack.pop();
                // Keep every thread alive until all of them have popped.
                barrier.wait();
                result
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let exhausted = results
        .iter()
        .filter(|r| **r == Err(HazardError::ResourceExhausted { capacity }))
        .count();
    let served = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
    assert_eq!(exhausted, 1);
    assert_eq!(served, capacity);
}

#[test]
fn explicit_handles_per_thread() {
    let domain = Arc::new(Domain::with_capacity(4));
    let stack: Arc<Stack<u32>> = Arc::new(Stack::with_domain(domain.clone()));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let stack = stack.clone();
            thread::spawn(move || {
                let handle = stack.domain().acquire_handle().unwrap();
                let mut popped = 0;
                for n in 0..1000 {
                    stack.push(t * 1000 + n);
                    if stack.pop_with(&handle).is_some() {
                        popped += 1;
                    }
                }
                popped
            })
        })
        .collect();
    let popped: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(popped, 4000);
    assert!(stack.is_empty());
    assert_eq!(domain.slots().in_use(), 0);
}

#[test]
fn exited_popper_frees_its_slot() {
    let domain = Arc::new(Domain::with_capacity(1));
    let stack: Arc<Stack<u32>> = Arc::new(Stack::with_domain(domain.clone()));
    stack.push(1);
    stack.push(2);

    // Keeps another thread alive, popping on a different domain, for the whole run.
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let bystander = thread::spawn(move || {
        let elsewhere: Stack<u32> = Stack::with_domain(Arc::new(Domain::with_capacity(1)));
        elsewhere.push(0);
        assert_eq!(elsewhere.pop(), Ok(Some(0)));
        ready_tx.send(()).unwrap();
        done_rx.recv().unwrap();
    });
    ready_rx.recv().unwrap();

    let s = stack.clone();
    assert_eq!(thread::spawn(move || s.pop()).join().unwrap(), Ok(Some(2)));
    assert_eq!(domain.slots().in_use(), 0);

    done_tx.send(()).unwrap();
    bystander.join().unwrap();

    let s = stack.clone();
    assert_eq!(thread::spawn(move || s.pop()).join().unwrap(), Ok(Some(1)));
    assert_eq!(domain.slots().in_use(), 0);
}
