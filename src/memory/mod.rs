//! A module for lock-free memory management with hazard pointers.
//!
//! A thread that is about to dereference a shared node first publishes the node's
//! address in a [`HazardSlotTable`] slot it leases through a [`HazardHandle`]. A
//! thread that unlinks a node frees it only when no slot holds its address; otherwise
//! the node waits on the [`RetireList`] until a later sweep finds it unwatched. A
//! [`Domain`] bundles one table with one retire list and is shared by every structure
//! that reclaims through it.

pub use self::domain::{Config, Domain, CAPACITY_ENV_VAR, DEFAULT_CAPACITY};
pub use self::error::HazardError;
pub use self::handle::HazardHandle;
pub use self::retire_list::{Destructor, RetireList};
pub use self::slot_table::{HazardSlotTable, ThreadIdentity};

mod domain;
mod error;
mod handle;
mod retire_list;
mod slot_table;
