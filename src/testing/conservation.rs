use crate::memory::HazardError;
use crate::structures::Stack;
use rayon::prelude::*;
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::hash::Hash;

/// Failure to run a harness, as opposed to a property violation.
#[derive(Debug)]
pub enum HarnessError {
    /// A worker could not lease a hazard slot.
    Hazard(HazardError),
    /// The worker pool could not be built.
    Pool(ThreadPoolBuildError),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HarnessError::Hazard(err) => write!(f, "worker failed: {}", err),
            HarnessError::Pool(err) => write!(f, "could not build worker pool: {}", err),
        }
    }
}

impl Error for HarnessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HarnessError::Hazard(err) => Some(err),
            HarnessError::Pool(err) => Some(err),
        }
    }
}

impl From<HazardError> for HarnessError {
    fn from(err: HazardError) -> Self {
        HarnessError::Hazard(err)
    }
}

impl From<ThreadPoolBuildError> for HarnessError {
    fn from(err: ThreadPoolBuildError) -> Self {
        HarnessError::Pool(err)
    }
}

/// Multisets of the values pushed and popped during a run.
#[derive(Debug, Clone)]
pub struct ConservationReport<T: Hash + Eq> {
    pushed: HashMap<T, usize>,
    popped: HashMap<T, usize>,
}

impl<T: Hash + Eq + Clone> ConservationReport<T> {
    pub fn new() -> Self {
        ConservationReport {
            pushed: HashMap::new(),
            popped: HashMap::new(),
        }
    }

    pub fn record_push(&mut self, val: T) {
        *self.pushed.entry(val).or_insert(0) += 1;
    }

    pub fn record_pop(&mut self, val: T) {
        *self.popped.entry(val).or_insert(0) += 1;
    }

    pub fn merge(mut self, other: Self) -> Self {
        for (val, count) in other.pushed {
            *self.pushed.entry(val).or_insert(0) += count;
        }
        for (val, count) in other.popped {
            *self.popped.entry(val).or_insert(0) += count;
        }
        self
    }

    pub fn pushed_total(&self) -> usize {
        self.pushed.values().sum()
    }

    pub fn popped_total(&self) -> usize {
        self.popped.values().sum()
    }

    /// Whether the popped multiset equals the pushed one.
    pub fn is_conserved(&self) -> bool {
        self.pushed == self.popped
    }

    /// Values pushed more often than they were popped.
    pub fn lost(&self) -> Vec<T> {
        self.pushed
            .iter()
            .filter(|&(val, &count)| self.popped.get(val).cloned().unwrap_or(0) < count)
            .map(|(val, _)| val.clone())
            .collect()
    }

    /// Values popped more often than they were pushed, including fabricated ones.
    pub fn duplicated(&self) -> Vec<T> {
        self.popped
            .iter()
            .filter(|&(val, &count)| self.pushed.get(val).cloned().unwrap_or(0) < count)
            .map(|(val, _)| val.clone())
            .collect()
    }
}

impl<T: Hash + Eq + Clone> Default for ConservationReport<T> {
    fn default() -> Self {
        ConservationReport::new()
    }
}

/// Push `per_thread` values from each of `threads` workers, let every worker pop until
/// it sees the stack empty, then drain whatever is left from the calling thread.
///
/// Workers run on a dedicated pool of `threads` threads; together with the caller that
/// needs `threads + 1` free slots in the stack's domain.
pub fn run_conservation<T, F>(
    stack: &Stack<T>,
    threads: usize,
    per_thread: usize,
    value_for: F,
) -> Result<ConservationReport<T>, HarnessError>
where
    T: Send + Hash + Eq + Clone,
    F: Fn(usize, usize) -> T + Sync,
{
    let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
    let reports: Vec<ConservationReport<T>> = pool.install(|| {
        (0..threads)
            .into_par_iter()
            .map(|worker| -> Result<ConservationReport<T>, HazardError> {
                let mut report = ConservationReport::new();
                for n in 0..per_thread {
                    let val = value_for(worker, n);
                    report.record_push(val.clone());
                    stack.push(val);
                }
                while let Some(val) = stack.pop()? {
                    report.record_pop(val);
                }
                Ok(report)
            })
            .collect::<Result<Vec<_>, HazardError>>()
    })?;

    let mut report = reports
        .into_iter()
        .fold(ConservationReport::new(), ConservationReport::merge);
    while let Some(val) = stack.pop()? {
        report.record_pop(val);
    }
    Ok(report)
}
