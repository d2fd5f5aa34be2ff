//! Transport bootstrap.
//!
//! Brings up the connection to the data layer before any request is
//! submitted:
//!
//! 1. Bind a socket at a known path
//! 2. Spawn the data layer with the path in [`PIPE_PATH_ENV`]
//! 3. Accept its connection
//! 4. Wait for its `$ready` line on stdout
//!
//! Only after step 4 is the transport handed to the gateway, so the first
//! request can never race the peer's startup.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use super::{connect_pipe, generate_pipe_path, PipeCleanup, PipeListener, Transport};
use crate::control::read_ready_signal;
use crate::error::BootstrapError;

/// Environment variable carrying the socket path to the data layer.
pub const PIPE_PATH_ENV: &str = "PONCHE_PIPE_PATH";

/// Default time allowed for the data layer to connect.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed between connecting and the `$ready` line.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for the gateway's end of the connection.
pub struct TransportBootstrap {
    path: String,
    command: Option<Command>,
    accept_timeout: Duration,
    ready_timeout: Duration,
}

/// Result of a successful bootstrap.
pub struct Established {
    /// Connected streams, with the peer's ready signal when one was read.
    pub transport: Transport,
    /// The spawned data layer, if this bootstrap spawned it. Killed on drop.
    pub child: Option<Child>,
    /// Removes the socket file when dropped.
    pub cleanup: PipeCleanup,
}

impl TransportBootstrap {
    /// Listen at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            command: None,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Listen at a fresh path from [`generate_pipe_path`].
    pub fn with_generated_path() -> Self {
        Self::new(generate_pipe_path())
    }

    /// Spawn `command` as the data layer once the socket is bound.
    ///
    /// Without a command the bootstrap waits for an externally started peer
    /// and does not expect a ready line.
    pub fn spawn_peer(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Time allowed for the peer to connect.
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Time allowed for the `$ready` line after connecting.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Socket path the bootstrap listens on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run the handshake.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Io`] if binding or spawning fails
    /// - [`BootstrapError::AcceptTimeout`] / [`BootstrapError::ReadyTimeout`]
    /// - [`BootstrapError::PeerExited`] if the child dies first
    /// - [`BootstrapError::InvalidReady`] / [`BootstrapError::VersionMismatch`]
    pub async fn establish(self) -> Result<Established, BootstrapError> {
        let listener = PipeListener::bind(&self.path).await?;
        let cleanup = listener.cleanup_guard();
        tracing::info!(path = %self.path, "listening for data layer");

        let mut child = match self.command {
            Some(mut command) => {
                command
                    .env(PIPE_PATH_ENV, &self.path)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .kill_on_drop(true);
                let child = command.spawn()?;
                tracing::info!(pid = ?child.id(), "spawned data layer");
                Some(child)
            }
            None => None,
        };

        let mut transport = tokio::time::timeout(
            self.accept_timeout,
            accept_peer(&listener, child.as_mut()),
        )
        .await
        .map_err(|_| BootstrapError::AcceptTimeout(self.accept_timeout))??;
        tracing::debug!("data layer connected");

        if let Some(stdout) = child.as_mut().and_then(|c| c.stdout.take()) {
            let mut stdout = BufReader::new(stdout);
            let ready = read_ready_signal(&mut stdout, self.ready_timeout).await?;
            tracing::info!(
                version = %ready.version,
                methods = ready.methods.len(),
                "data layer ready"
            );
            transport.ready = Some(ready);
            tokio::spawn(forward_stdout(stdout));
        }

        Ok(Established {
            transport,
            child,
            cleanup,
        })
    }
}

async fn accept_peer(
    listener: &PipeListener,
    child: Option<&mut Child>,
) -> Result<Transport, BootstrapError> {
    let Some(child) = child else {
        return Ok(listener.accept().await?);
    };

    tokio::select! {
        accepted = listener.accept() => Ok(accepted?),
        status = child.wait() => {
            tracing::warn!(?status, "data layer exited before connecting");
            Err(BootstrapError::PeerExited)
        }
    }
}

/// Keep draining the peer's stdout so it never blocks on a full pipe.
async fn forward_stdout(mut stdout: BufReader<ChildStdout>) {
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => tracing::debug!(line = line.trim_end(), "data layer stdout"),
        }
    }
}

/// Connect to the gateway named by [`PIPE_PATH_ENV`] (data-layer side).
pub async fn connect_from_env() -> Result<Transport, BootstrapError> {
    let path =
        std::env::var(PIPE_PATH_ENV).map_err(|_| BootstrapError::MissingEnv(PIPE_PATH_ENV))?;
    tracing::debug!(%path, "connecting to gateway");
    Ok(connect_pipe(&path).await?)
}
