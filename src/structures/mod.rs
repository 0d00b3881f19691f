//! Lock-free data structures built on the hazard pointer reclamation in
//! [`crate::memory`].

pub use self::stack::Stack;

mod stack;
