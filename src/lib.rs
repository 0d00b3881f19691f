//! A lock-free stack with hazard pointer memory reclamation.
//!
//! [`structures::Stack`] is a Treiber stack: `push` and `pop` are compare-and-swap
//! retry loops and never block. Popped nodes are reclaimed through the [`memory`]
//! module, where threads publish the node they are reading in a bounded table of
//! hazard slots and a node is only freed once no slot holds its address.
//!
//! The slot table has a fixed capacity which must cover the number of threads that
//! pop concurrently; a thread that finds no free slot gets
//! [`memory::HazardError::ResourceExhausted`].

pub mod memory;
pub mod structures;
pub mod testing;
