// # SSH Session Driver
//
// This crate provides the SSH transport for netconv's `SessionDriver` trait.
//
// ## Session Setup
//
// 1. TCP connect to `host:port`
// 2. Host key check: accepted unconditionally when
//    `insecure_skip_host_verification` is set (the default), otherwise checked
//    against the user's `known_hosts`
// 3. Password authentication
// 4. PTY request (`xterm` 80x40 by default, echo off, 14400 baud)
// 5. Interactive shell
//
// Steps 1 to 5 can be bounded by `connect_timeout_secs`. Once the shell is
// open, the command sequence is played by `netconv_core::session::run_commands`,
// which owns pager and error-marker handling.
//
// ## Security Requirements
//
// - The password NEVER appears in logs or Debug output
// - Skipping host verification is an explicit configuration choice
//
// ## Limitations
//
// - No per-read timeout once the shell is open: a silent device blocks the
//   session until it closes the channel
// - Key exchange is limited to the algorithms russh supports; devices that
//   only offer diffie-hellman-group-exchange cannot be reached

use async_trait::async_trait;
use netconv_core::config::{PtyConfig, SessionConfig};
use netconv_core::model::Credentials;
use netconv_core::registry::DriverRegistry;
use netconv_core::session::{PlaybackOptions, SessionOutcome, run_commands};
use netconv_core::traits::{SessionDriver, SessionDriverFactory, ShellChannel};
use netconv_core::{Error, Result};
use russh::client;
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use russh_keys::key::PublicKey;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal modes sent with the PTY request
const TERMINAL_MODES: [(Pty, u32); 3] = [
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// SSH implementation of [`SessionDriver`]
///
/// One instance serves every host; each `execute` opens and closes its own
/// connection.
pub struct SshSessionDriver {
    ssh_config: Arc<client::Config>,
    pty: PtyConfig,
    playback: PlaybackOptions,
    insecure_skip_host_verification: bool,
    connect_timeout: Option<Duration>,
}

impl SshSessionDriver {
    /// Create a driver from session configuration
    ///
    /// Fails with `Error::Config` if the configuration is invalid.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        config.validate()?;

        if config.insecure_skip_host_verification {
            warn!("SSH host key verification is disabled");
        }

        Ok(Self {
            ssh_config: Arc::new(client::Config::default()),
            pty: config.pty.clone(),
            playback: config.playback_options()?,
            insecure_skip_host_verification: config.insecure_skip_host_verification,
            connect_timeout: config.connect_timeout(),
        })
    }

    /// Connect, authenticate, and open an interactive shell
    async fn open_shell(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<(client::Handle<HostKeyPolicy>, SshShell)> {
        let (name, port) = split_host(host)?;
        let policy = HostKeyPolicy {
            host: name.to_string(),
            port,
            insecure: self.insecure_skip_host_verification,
        };

        debug!("Opening SSH session to {} as {}", host, credentials.username);

        let mut handle = client::connect(Arc::clone(&self.ssh_config), (name, port), policy)
            .await
            .map_err(|e| Error::session(host, format!("connect failed: {}", e)))?;

        let authenticated = handle
            .authenticate_password(credentials.username.clone(), credentials.password.clone())
            .await
            .map_err(|e| Error::session(host, format!("authentication error: {}", e)))?;
        if !authenticated {
            return Err(Error::session(
                host,
                format!("authentication failed for user {}", credentials.username),
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::session(host, format!("failed to open channel: {}", e)))?;

        channel
            .request_pty(
                false,
                &self.pty.term,
                self.pty.columns,
                self.pty.rows,
                0,
                0,
                &TERMINAL_MODES,
            )
            .await
            .map_err(|e| Error::session(host, format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| Error::session(host, format!("shell request failed: {}", e)))?;

        Ok((handle, SshShell::new(host, channel)))
    }
}

#[async_trait]
impl SessionDriver for SshSessionDriver {
    async fn execute(
        &self,
        host: &str,
        credentials: &Credentials,
        commands: &[String],
    ) -> Result<SessionOutcome> {
        let opened = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.open_shell(host, credentials))
                .await
                .map_err(|_| {
                    Error::session(host, format!("session not established within {:?}", limit))
                })?,
            None => self.open_shell(host, credentials).await,
        };
        let (handle, mut shell) = opened?;

        let outcome = run_commands(&mut shell, commands, &self.playback).await;

        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", host, e);
        }

        Ok(outcome)
    }

    fn driver_name(&self) -> &'static str {
        "ssh"
    }
}

impl fmt::Debug for SshSessionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSessionDriver")
            .field("pty", &self.pty)
            .field("playback", &self.playback)
            .field(
                "insecure_skip_host_verification",
                &self.insecure_skip_host_verification,
            )
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// An open interactive SSH shell
pub struct SshShell {
    host: String,
    channel: Channel<client::Msg>,
    closed: bool,
}

impl SshShell {
    fn new(host: &str, channel: Channel<client::Msg>) -> Self {
        Self {
            host: host.to_string(),
            channel,
            closed: false,
        }
    }

    fn closed_error(&self) -> Error {
        Error::session(&self.host, "channel closed by device")
    }
}

#[async_trait]
impl ShellChannel for SshShell {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| Error::session(&self.host, format!("write failed: {}", e)))
    }

    /// Wait for output, then drain whatever else has already arrived
    async fn receive(&mut self) -> Result<Vec<u8>> {
        if self.closed {
            return Err(self.closed_error());
        }
        match read_batch(&mut self.channel, &mut self.closed).await {
            Some(buf) => Ok(buf),
            None => Err(self.closed_error()),
        }
    }
}

/// Source of inbound channel messages
#[async_trait]
trait MessageSource: Send {
    /// Next message, `None` once the channel is gone
    async fn next_message(&mut self) -> Option<ChannelMsg>;
}

#[async_trait]
impl MessageSource for Channel<client::Msg> {
    async fn next_message(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

/// Effect of one inbound message on a read
#[derive(Debug, PartialEq, Eq)]
enum Fold {
    Data,
    Closed,
    Skipped,
}

fn fold_message(msg: Option<ChannelMsg>, buf: &mut Vec<u8>) -> Fold {
    match msg {
        Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
            buf.extend_from_slice(&data);
            Fold::Data
        }
        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => Fold::Closed,
        Some(_) => Fold::Skipped,
    }
}

/// Block for the first output, then take every message already queued
///
/// Returns `None` if the channel closed before any output. A close seen
/// after output sets `closed` and still hands the output over.
async fn read_batch<S: MessageSource + ?Sized>(
    source: &mut S,
    closed: &mut bool,
) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        match fold_message(source.next_message().await, &mut buf) {
            Fold::Data => break,
            Fold::Closed => {
                *closed = true;
                return None;
            }
            Fold::Skipped => {}
        }
    }

    while let Ok(msg) = tokio::time::timeout(Duration::ZERO, source.next_message()).await {
        if fold_message(msg, &mut buf) == Fold::Closed {
            *closed = true;
            break;
        }
    }
    Some(buf)
}

/// Host key acceptance policy for one connection
struct HostKeyPolicy {
    host: String,
    port: u16,
    insecure: bool,
}

#[async_trait]
impl client::Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.insecure {
            return Ok(true);
        }

        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!("Host key for {}:{} is not in known_hosts", self.host, self.port);
                Ok(false)
            }
            Err(e) => {
                warn!("Host key for {}:{} rejected: {}", self.host, self.port, e);
                Ok(false)
            }
        }
    }
}

/// Split `host:port`, stripping IPv6 brackets
fn split_host(host: &str) -> Result<(&str, u16)> {
    let (name, port) = host
        .rsplit_once(':')
        .ok_or_else(|| Error::validation(format!("Host '{}' must be in host:port form", host)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::validation(format!("Invalid port in host '{}'", host)))?;
    let name = name.trim_start_matches('[').trim_end_matches(']');
    if name.is_empty() {
        return Err(Error::validation(format!("Host '{}' has no address", host)));
    }
    Ok((name, port))
}

/// Factory for [`SshSessionDriver`]
#[derive(Debug, Default)]
pub struct SshDriverFactory;

impl SessionDriverFactory for SshDriverFactory {
    fn create(&self, config: &SessionConfig) -> Result<Box<dyn SessionDriver>> {
        Ok(Box::new(SshSessionDriver::new(config)?))
    }
}

/// Register the SSH driver as "ssh"
pub fn register(registry: &DriverRegistry) {
    registry.register_driver("ssh", Box::new(SshDriverFactory));
}
