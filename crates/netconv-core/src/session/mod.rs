//! Interactive session protocol loop
//!
//! Plays a command sequence over an open [`ShellChannel`] and harvests the
//! output. For each command:
//!
//! 1. Write the command followed by the line terminator
//! 2. Wait the inter-read delay, then read one chunk
//! 3. Classify the chunk with the [`MarkerSet`]:
//!    - error marker: stop, the remaining commands are abandoned
//!    - pager marker: send the pager-advance keystroke and read again
//!    - no marker: the command is complete, move to the next one
//!
//! A read or write failure aborts the sequence. Commands already sent are not
//! rolled back, so the device may be left partially configured.
//!
//! There is no per-read timeout: a device that never answers blocks the loop.

pub mod markers;

pub use markers::{MarkerKind, MarkerPattern, MarkerRule, MarkerSet};

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Error;
use crate::traits::ShellChannel;

/// Tunables of the protocol loop
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    /// Pager and error markers, checked in order
    pub markers: MarkerSet,
    /// Delay before each read
    pub read_delay: Duration,
    /// Keystroke that advances the pager
    pub pager_advance: Vec<u8>,
    /// Appended to every command line
    pub line_terminator: String,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            markers: MarkerSet::default(),
            read_delay: Duration::from_millis(40),
            pager_advance: b" ".to_vec(),
            line_terminator: "\n".to_string(),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Every command was sent and answered without an error marker
    Completed,
    /// The device answered `command` with an error marker
    Rejected {
        command_index: usize,
        command: String,
    },
    /// Read or write failed after the shell was opened
    Aborted { command_index: usize, reason: String },
    /// The session never opened (connect, auth, PTY or shell failure)
    Failed { reason: String },
}

/// Result of playing a command sequence against one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Everything read from the device, across all commands
    pub transcript: String,
    pub status: SessionStatus,
    /// Number of command lines written
    pub commands_sent: usize,
    /// Number of pager-advance keystrokes written
    pub pager_advances: usize,
}

impl SessionOutcome {
    fn started() -> Self {
        Self {
            transcript: String::new(),
            status: SessionStatus::Completed,
            commands_sent: 0,
            pager_advances: 0,
        }
    }

    /// Outcome of a session that could not be opened
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Failed {
                reason: reason.into(),
            },
            ..Self::started()
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Error describing a non-completed outcome for `host`
    pub fn to_error(&self, host: &str) -> Option<Error> {
        match &self.status {
            SessionStatus::Completed => None,
            SessionStatus::Rejected { command, .. } => {
                Some(Error::device_rejected(host, command.clone()))
            }
            SessionStatus::Aborted {
                command_index,
                reason,
            } => Some(Error::session(
                host,
                format!("aborted at command {}: {}", command_index + 1, reason),
            )),
            SessionStatus::Failed { reason } => Some(Error::session(host, reason.clone())),
        }
    }
}

/// Play `commands` over `channel`
///
/// Never returns an error: every failure is folded into the outcome together
/// with the transcript captured up to that point.
pub async fn run_commands<C>(
    channel: &mut C,
    commands: &[String],
    options: &PlaybackOptions,
) -> SessionOutcome
where
    C: ShellChannel + ?Sized,
{
    let mut outcome = SessionOutcome::started();

    for (index, command) in commands.iter().enumerate() {
        let line = format!("{}{}", command, options.line_terminator);
        if let Err(e) = channel.send(line.as_bytes()).await {
            warn!("Write failed at command {}: {}", index + 1, e);
            outcome.status = SessionStatus::Aborted {
                command_index: index,
                reason: e.to_string(),
            };
            return outcome;
        }
        outcome.commands_sent += 1;

        loop {
            if !options.read_delay.is_zero() {
                tokio::time::sleep(options.read_delay).await;
            }

            let chunk = match channel.receive().await {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Read failed at command {}: {}", index + 1, e);
                    outcome.status = SessionStatus::Aborted {
                        command_index: index,
                        reason: e.to_string(),
                    };
                    return outcome;
                }
            };

            let text = String::from_utf8_lossy(&chunk);
            outcome.transcript.push_str(&text);

            match options.markers.classify(&text) {
                Some(MarkerKind::Error) => {
                    debug!("Command {} rejected by device: {}", index + 1, command);
                    outcome.status = SessionStatus::Rejected {
                        command_index: index,
                        command: command.clone(),
                    };
                    return outcome;
                }
                Some(MarkerKind::Pager) => {
                    if let Err(e) = channel.send(&options.pager_advance).await {
                        outcome.status = SessionStatus::Aborted {
                            command_index: index,
                            reason: e.to_string(),
                        };
                        return outcome;
                    }
                    outcome.pager_advances += 1;
                }
                None => break,
            }
        }
    }

    outcome
}
