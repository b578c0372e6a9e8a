// # Session Driver Trait
//
// Defines the interface for playing a command sequence against one device
// over an interactive remote shell.
//
// ## Implementations
//
// - SSH: `netconv-ssh` crate
// - Test doubles: scripted drivers in `tests/common`
//
// ## Layering
//
// A driver owns the transport (connect, authenticate, allocate a PTY, open a
// shell). Once the shell is open it hands a [`ShellChannel`] to
// [`crate::session::run_commands`], which owns the pager/error protocol loop.
// Transports therefore never re-implement marker handling.

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::model::Credentials;
use crate::session::SessionOutcome;

/// Trait for device session implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe: the dispatcher shares one driver
/// across all concurrently running host sessions.
///
/// ## Contract
///
/// - Connection or authentication failures return `Err(Error::Session)`
/// - Once the shell is open, every outcome (completed, rejected by the device,
///   aborted by a read failure) is reported in the returned [`SessionOutcome`]
///   together with the transcript captured so far
/// - No retry: a failed host is reported, never retried
/// - No rollback: commands already sent stay applied on the device
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Play `commands` against `host` and return the transcript
    ///
    /// # Parameters
    ///
    /// - `host`: Device address in `host:port` form
    /// - `credentials`: Username/password for password authentication
    /// - `commands`: Ordered CLI lines, none of them blank
    async fn execute(
        &self,
        host: &str,
        credentials: &Credentials,
        commands: &[String],
    ) -> Result<SessionOutcome, crate::Error>;

    /// Get the driver name (for logging/debugging)
    fn driver_name(&self) -> &'static str;
}

/// One open interactive shell
///
/// `receive` returns whatever output is available, waiting for at least one
/// chunk. A closed or reset stream is an error.
#[async_trait]
pub trait ShellChannel: Send {
    /// Write raw bytes to the shell's stdin
    async fn send(&mut self, data: &[u8]) -> Result<(), crate::Error>;

    /// Read the next chunk of output
    async fn receive(&mut self) -> Result<Vec<u8>, crate::Error>;
}

/// Helper trait for constructing session drivers from configuration
pub trait SessionDriverFactory: Send + Sync {
    /// Create a SessionDriver instance from configuration
    fn create(&self, config: &SessionConfig) -> Result<Box<dyn SessionDriver>, crate::Error>;
}
