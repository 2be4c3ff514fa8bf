//! Lock-free LIFO and FIFO collections.
//!
//! Both containers are unbounded singly-linked structures mutated only
//! through atomic compare-and-swap retry loops, with epoch-based memory
//! reclamation (`crossbeam-epoch`) standing in for a garbage collector.
//! No operation blocks, takes a lock, or returns an error; removal from
//! an empty container is reported as `None`.

pub mod queue;
mod stack;

pub use queue::LockFreeQueue;
pub use stack::LockFreeStack;
