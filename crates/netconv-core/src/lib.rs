// # netconv-core
//
// Core library for converging declared interface configuration onto network
// devices over interactive CLI sessions.
//
// ## Architecture Overview
//
// - **CommandRenderer**: Turns a desired state into apply/remove CLI lines
// - **SessionDriver**: Trait for playing commands against one device
// - **Dispatcher**: Fans a command sequence out to many hosts and joins the results
// - **ConvergenceStore**: Trait for the append-only log of applied states
// - **ConvergenceEngine**: Create/read/update/delete orchestration
// - **DriverRegistry**: Plugin-based registry for drivers and stores
//
// ## Design Principles
//
// 1. **Library-First**: Every operation is callable without the daemon
// 2. **Plugin-Based**: Transports and stores are registered by name
// 3. **Markers Are Data**: Pager and error detection is configuration
// 4. **Latest Wins**: The newest record of an identity key is its current state

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod render;
pub mod session;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{CommitPolicy, NetconvConfig, SessionConfig, StoreConfig};
pub use dispatch::{DispatchResult, Dispatcher};
pub use engine::{ConvergenceEngine, EngineEvent, Operation};
pub use error::{Error, Result};
pub use model::{Credentials, DesiredState, IdentityKey, InterfaceType};
pub use registry::DriverRegistry;
pub use render::{CommandRenderer, TemplateKind};
pub use session::{PlaybackOptions, SessionOutcome, SessionStatus};
pub use store::{FileConvergenceStore, MemoryConvergenceStore};
pub use traits::{ConvergenceRecord, ConvergenceStore, RecordId, SessionDriver, ShellChannel};
