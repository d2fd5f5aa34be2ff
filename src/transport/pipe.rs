//! Platform-specific pipe/socket implementation.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! The gateway owns the listening end; the data layer connects to it.
//!
//! # Example
//!
//! ```ignore
//! use ponche_gateway::transport::{generate_pipe_path, PipeListener};
//!
//! let path = generate_pipe_path();
//! let listener = PipeListener::bind(&path).await?;
//! let _cleanup = listener.cleanup_guard();
//! let transport = listener.accept().await?;
//! ```

use std::io;

use uuid::Uuid;

use super::Transport;

/// Generate a unique pipe path for this process.
///
/// Format:
/// - Unix: `/tmp/ponche-{pid}-{uuid}.sock`
/// - Windows: `\\.\pipe\ponche-{pid}-{uuid}`
pub fn generate_pipe_path() -> String {
    let pid = std::process::id();
    let tag = Uuid::new_v4().simple();

    #[cfg(unix)]
    {
        format!("/tmp/ponche-{}-{}.sock", pid, tag)
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\ponche-{}-{}", pid, tag)
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix Domain Socket listener.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    /// Removes the socket file on drop.
    pub struct PipeCleanup {
        path: String,
    }

    impl Drop for PipeCleanup {
        fn drop(&mut self) {
            if std::fs::remove_file(&self.path).is_ok() {
                tracing::debug!(path = %self.path, "removed socket file");
            }
        }
    }

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes a stale socket file at the path before binding.
        pub async fn bind(path: &str) -> io::Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> io::Result<Transport> {
            let (stream, _addr) = self.listener.accept().await?;
            let (reader, writer) = stream.into_split();
            Ok(Transport::from_halves(reader, writer))
        }

        /// Socket path.
        pub fn path(&self) -> &str {
            &self.path
        }

        /// Guard that removes the socket file when dropped.
        pub fn cleanup_guard(&self) -> PipeCleanup {
            PipeCleanup {
                path: self.path.clone(),
            }
        }
    }

    /// Connect to a listening gateway (data-layer side).
    pub async fn connect_pipe(path: &str) -> io::Result<Transport> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Transport::from_halves(reader, writer))
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use parking_lot::Mutex;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

    /// Windows Named Pipe listener.
    pub struct PipeListener {
        path: String,
        /// Instance created by `bind`, handed out by the first `accept`.
        first: Mutex<Option<NamedPipeServer>>,
    }

    /// No-op on Windows; named pipes vanish with their last handle.
    pub struct PipeCleanup {
        _path: String,
    }

    impl PipeListener {
        /// Create the first pipe instance, failing if the name is taken.
        pub async fn bind(path: &str) -> io::Result<Self> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;

            Ok(Self {
                path: path.to_string(),
                first: Mutex::new(Some(server)),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> io::Result<Transport> {
            let pending = self.first.lock().take();
            let server = match pending {
                Some(server) => server,
                None => ServerOptions::new().create(&self.path)?,
            };

            server.connect().await?;

            Ok(Transport::from_stream(server))
        }

        /// Pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }

        /// Guard matching the Unix API.
        pub fn cleanup_guard(&self) -> PipeCleanup {
            PipeCleanup {
                _path: self.path.clone(),
            }
        }
    }

    /// Connect to a listening gateway (data-layer side).
    pub async fn connect_pipe(path: &str) -> io::Result<Transport> {
        let client = ClientOptions::new().open(path)?;
        Ok(Transport::from_stream(client))
    }
}

#[cfg(unix)]
pub use unix_impl::{connect_pipe, PipeCleanup, PipeListener};

#[cfg(windows)]
pub use windows_impl::{connect_pipe, PipeCleanup, PipeListener};
