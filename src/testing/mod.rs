//! Utilities for checking the stack under test workloads.
//!
//! [`run_conservation`] drives many threads over one stack and reports whether every
//! pushed value came back out exactly once. [`first_divergence`] replays a sequential
//! history against the stack and an `im`-backed reference model.
//!
//! # Example
//! ```
//! use hazard_stack::memory::Domain;
//! use hazard_stack::structures::Stack;
//! use hazard_stack::testing::run_conservation;
//! use std::sync::Arc;
//!
//! let stack = Stack::with_domain(Arc::new(Domain::with_capacity(8)));
//! let report = run_conservation(&stack, 4, 1000, |worker, n| (worker, n)).unwrap();
//! assert!(report.is_conserved());
//! ```

pub use self::conservation::{run_conservation, ConservationReport, HarnessError};
pub use self::model::{first_divergence, random_operations, Divergence, Operation, SequentialModel};

mod conservation;
mod model;
