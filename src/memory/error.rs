use std::error::Error;
use std::fmt;

/// Errors raised by the hazard pointer machinery.
///
/// Contention is never reported through this type: compare-and-swap failures are
/// retried internally. Only capacity problems cross the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardError {
    /// Every slot of the hazard table is leased. The table has to be sized for
    /// the maximum number of threads that pop concurrently, so this is a
    /// configuration error rather than a transient condition.
    ResourceExhausted { capacity: usize },
}

impl fmt::Display for HazardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HazardError::ResourceExhausted { capacity } => write!(
                f,
                "no free hazard slot: all {} slots are leased by other threads",
                capacity
            ),
        }
    }
}

impl Error for HazardError {}
