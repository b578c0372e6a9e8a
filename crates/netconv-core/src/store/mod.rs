// # Convergence Store Implementations
//
// This module provides implementations of the ConvergenceStore trait for
// different persistence strategies. Both share the same in-memory log and
// differ only in whether they write it to disk.

mod log;

pub mod file;
pub mod memory;

pub use file::{FileConvergenceStore, FileStoreFactory};
pub use memory::{MemoryConvergenceStore, MemoryStoreFactory};
