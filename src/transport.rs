//! Contract between jobs and the protocol layer that talks to the device.
//!
//! The transport itself (connection handling, command queueing, wire
//! retries) lives elsewhere. Jobs only see this trait and the optional
//! capability interfaces it can expose.

use std::collections::BTreeSet;
use std::sync::Weak;
use thiserror::Error;

use crate::job::JobKind;

/// Free-form tags passed along with a device-side print start.
pub type Tags = BTreeSet<String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Command rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Connecting,
    Connected,
    Processing,
    Disconnecting,
    Disconnected,
    DisconnectedWithError,
}

impl ProtocolState {
    pub fn is_disconnected(self) -> bool {
        matches!(self, ProtocolState::Disconnected | ProtocolState::DisconnectedWithError)
    }
}

/// Notifications a transport pushes to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    StateChanged { old: ProtocolState, new: ProtocolState },
    FilePrintStarted { name: String, size: u64 },
    FileStatus { pos: u64, total: u64 },
    FilePrintDone,
}

pub trait ProtocolListener: Send + Sync {
    fn on_protocol_event(&self, event: &ProtocolEvent);
}

pub trait Transport: Send + Sync {
    /// Subscribes a listener. The transport keeps only a weak handle.
    fn register_listener(&self, listener: Weak<dyn ProtocolListener>);
    fn unregister_listener(&self, listener: &Weak<dyn ProtocolListener>);

    /// Non-blocking probe: would a command be accepted right now.
    fn can_send(&self) -> bool;

    fn supported_jobs(&self) -> &[JobKind];

    fn supports(&self, kind: JobKind) -> bool {
        self.supported_jobs().contains(&kind)
    }

    fn as_file_streaming(&self) -> Option<&dyn FileStreamingTransport> {
        None
    }

    fn as_file_management(&self) -> Option<&dyn FileManagementTransport> {
        None
    }

    fn as_file_aware(&self) -> Option<&dyn FileAwareTransport> {
        None
    }
}

/// Persists everything sent after `record_file` into a file on the device.
pub trait FileStreamingTransport: Send + Sync {
    fn record_file(&self, remote: &str) -> Result<(), ProtocolError>;
    fn stop_recording_file(&self) -> Result<(), ProtocolError>;
}

pub trait FileManagementTransport: Send + Sync {
    fn delete_file(&self, remote: &str) -> Result<(), ProtocolError>;
}

/// Device-side file printing. Progress comes back as [`ProtocolEvent`]s.
pub trait FileAwareTransport: Send + Sync {
    fn start_file_print(&self, path: &str, position: u64, tags: &Tags) -> Result<(), ProtocolError>;
    fn get_file_print_status(&self) -> Result<(), ProtocolError>;
}
