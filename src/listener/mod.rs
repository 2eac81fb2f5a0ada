//! Result listener
//!
//! The app under test streams its live results back to the host over a TCP
//! socket or by appending to a shared file. A listener copies that stream
//! into the test log and raises a [`ConnectionSignal`] when the app first
//! reports in.

mod file;
mod tcp;

pub use file::FileResultListener;
pub use tcp::TcpResultListener;

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::ConnectionSignal;
use crate::logs::SharedLog;
use crate::target::RunMode;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("listener used before initialize")]
    NotInitialized,

    #[error("listener already started")]
    AlreadyStarted,
}

/// How results travel from the app to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerTransport {
    Tcp,
    File,
}

impl ListenerTransport {
    /// Value of the transport environment variable the app reads.
    pub fn env_value(&self) -> &'static str {
        match self {
            ListenerTransport::Tcp => "TCP",
            ListenerTransport::File => "FILE",
        }
    }
}

impl fmt::Display for ListenerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerTransport::Tcp => f.write_str("tcp"),
            ListenerTransport::File => f.write_str("file"),
        }
    }
}

/// What the runner knows when it asks for a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRequest {
    pub run_mode: RunMode,
    pub is_simulator: bool,
    /// The app exits once tests finish
    pub auto_exit: bool,
    /// The app reports XML rather than plain text
    pub xml_output: bool,
    /// Use the shared-file transport when the target allows it
    pub prefer_file_transport: bool,
}

/// A listener ready to initialize, plus how the app must reach it.
pub struct ListenerSetup {
    pub transport: ListenerTransport,
    pub listener: Box<dyn Listener>,
    /// Shared file for the file transport
    pub temp_file: Option<PathBuf>,
}

impl fmt::Debug for ListenerSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSetup")
            .field("transport", &self.transport)
            .field("temp_file", &self.temp_file)
            .finish_non_exhaustive()
    }
}

/// Receives the app's result stream.
pub trait Listener: Send {
    /// Bind or create the endpoint. Returns the TCP port, or 0 for files.
    fn initialize(&mut self) -> Result<u16, ListenerError>;

    /// Begin accepting on a background thread.
    fn start(&mut self) -> Result<(), ListenerError>;

    /// Fires once when the app first reports in.
    fn connection(&self) -> ConnectionSignal;

    /// Stop accepting, copy whatever is still buffered, and join the
    /// background thread. Safe to call more than once.
    fn cancel(&mut self);

    /// Release the endpoint. Safe to call more than once.
    fn dispose(&mut self);
}

/// Owns a listener for the duration of a run and tears it down on drop, so
/// every exit path releases it.
pub struct ListenerGuard {
    listener: Box<dyn Listener>,
    released: bool,
}

impl ListenerGuard {
    pub fn new(listener: Box<dyn Listener>) -> Self {
        Self {
            listener,
            released: false,
        }
    }

    pub fn listener(&mut self) -> &mut dyn Listener {
        self.listener.as_mut()
    }

    pub fn connection(&self) -> ConnectionSignal {
        self.listener.connection()
    }

    /// Cancel and dispose now.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.listener.cancel();
        self.listener.dispose();
        // Nothing connects after this point
        self.listener.connection().abandon();
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Builds listeners for a run.
pub trait ListenerFactory: Send + Sync {
    fn create(
        &self,
        request: &ListenerRequest,
        main_log: SharedLog,
        test_log: SharedLog,
    ) -> Result<ListenerSetup, ListenerError>;
}

/// Picks the transport and builds the matching listener.
///
/// Devices always use TCP. Simulators use the shared file when requested.
#[derive(Debug, Clone, Default)]
pub struct DefaultListenerFactory {
    scratch_dir: Option<PathBuf>,
}

impl DefaultListenerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place file-transport files under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: Some(dir.into()),
        }
    }

    pub fn transport_for(request: &ListenerRequest) -> ListenerTransport {
        if request.is_simulator && request.prefer_file_transport {
            ListenerTransport::File
        } else {
            ListenerTransport::Tcp
        }
    }
}

impl ListenerFactory for DefaultListenerFactory {
    fn create(
        &self,
        request: &ListenerRequest,
        main_log: SharedLog,
        test_log: SharedLog,
    ) -> Result<ListenerSetup, ListenerError> {
        let transport = Self::transport_for(request);
        tracing::debug!(%transport, mode = %request.run_mode, "creating result listener");

        match transport {
            ListenerTransport::File => {
                let dir = self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
                let path = dir.join(format!("{}.txt", uuid::Uuid::new_v4()));
                Ok(ListenerSetup {
                    transport,
                    listener: Box::new(FileResultListener::new(path.clone(), main_log, test_log)),
                    temp_file: Some(path),
                })
            }
            ListenerTransport::Tcp => {
                // Simulators share the host's loopback; devices come in over the network
                let bind = if request.is_simulator {
                    IpAddr::V4(Ipv4Addr::LOCALHOST)
                } else {
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
                };
                Ok(ListenerSetup {
                    transport,
                    listener: Box::new(TcpResultListener::new(bind, main_log, test_log)),
                    temp_file: None,
                })
            }
        }
    }
}

/// Decodes a byte stream into text without splitting multi-byte characters
/// across chunks.
#[derive(Debug, Default)]
pub(crate) struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid sequence, not merely truncated: decode lossily
            Err(_) => self.pending.len(),
        };
        let rest = self.pending.split_off(valid);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    pub(crate) fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
