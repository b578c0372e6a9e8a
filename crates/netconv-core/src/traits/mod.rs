//! Core traits for the convergence engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`SessionDriver`]: Play commands against one device
//! - [`ShellChannel`]: One open interactive shell
//! - [`ConvergenceStore`]: Append-only log of applied desired states

pub mod convergence_store;
pub mod session_driver;

pub use convergence_store::{
    ConvergenceRecord, ConvergenceStore, ConvergenceStoreFactory, RecordId,
};
pub use session_driver::{SessionDriver, SessionDriverFactory, ShellChannel};
