//! In-process transport that records what it is asked to do.
//!
//! Nothing goes over a wire: sent lines and capability calls are kept in a
//! log, and the owner pushes connection changes and device file callbacks
//! through [`LoopbackTransport::set_state`] and [`LoopbackTransport::emit`].
//! Used by the dry-run binary and throughout the tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};

use crate::job::JobKind;
use crate::listener::{ListenerRegistry, lock};
use crate::transport::{
    FileAwareTransport, FileManagementTransport, FileStreamingTransport, ProtocolError, ProtocolEvent,
    ProtocolListener, ProtocolState, Tags, Transport,
};

/// Optional capability interfaces the transport exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub file_streaming: bool,
    pub file_management: bool,
    pub file_aware: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            file_streaming: true,
            file_management: true,
            file_aware: true,
        }
    }

    pub fn none() -> Self {
        Self {
            file_streaming: false,
            file_management: false,
            file_aware: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Send(String),
    RecordFile(String),
    StopRecording,
    DeleteFile(String),
    StartFilePrint { path: String, position: u64, tags: Tags },
    GetFilePrintStatus,
}

pub struct LoopbackTransport {
    supported: Vec<JobKind>,
    capabilities: Capabilities,
    listeners: ListenerRegistry<dyn ProtocolListener>,
    state: Mutex<ProtocolState>,
    can_send: AtomicBool,
    recording: Mutex<Option<String>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl Default for LoopbackTransport {
    /// Connected, accepting every job kind, with every capability.
    fn default() -> Self {
        Self::new(
            &[
                JobKind::LocalFile,
                JobKind::LocalGcodeFile,
                JobKind::LocalGcodeStream,
                JobKind::SdFile,
            ],
            Capabilities::all(),
        )
    }
}

impl LoopbackTransport {
    pub fn new(supported: &[JobKind], capabilities: Capabilities) -> Self {
        Self {
            supported: supported.to_vec(),
            capabilities,
            listeners: ListenerRegistry::new(),
            state: Mutex::new(ProtocolState::Connected),
            can_send: AtomicBool::new(true),
            recording: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ProtocolState {
        *lock(&self.state)
    }

    /// Switches connection state and tells every listener about it.
    pub fn set_state(&self, new: ProtocolState) {
        let old = std::mem::replace(&mut *lock(&self.state), new);
        tracing::debug!(?old, ?new, "Loopback transport state change");
        self.emit(ProtocolEvent::StateChanged { old, new });
    }

    pub fn set_can_send(&self, can_send: bool) {
        self.can_send.store(can_send, Ordering::SeqCst);
    }

    /// Delivers a protocol event to all registered listeners.
    pub fn emit(&self, event: ProtocolEvent) {
        self.listeners.notify(|l| l.on_protocol_event(&event));
    }

    /// Sends one line of content to the (imaginary) device.
    pub fn send(&self, line: &str) -> Result<(), ProtocolError> {
        self.ensure_connected()?;
        tracing::trace!(line, "Loopback send");
        self.record(TransportCall::Send(line.to_string()));
        Ok(())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    pub fn sent_lines(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                TransportCall::Send(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Remote file currently being recorded into, if any.
    pub fn recording(&self) -> Option<String> {
        lock(&self.recording).clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn has_listener(&self, listener: &Weak<dyn ProtocolListener>) -> bool {
        self.listeners.contains(listener)
    }

    fn ensure_connected(&self) -> Result<(), ProtocolError> {
        if self.state().is_disconnected() {
            Err(ProtocolError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }
}

impl Transport for LoopbackTransport {
    fn register_listener(&self, listener: Weak<dyn ProtocolListener>) {
        self.listeners.register(listener);
    }

    fn unregister_listener(&self, listener: &Weak<dyn ProtocolListener>) {
        self.listeners.unregister(listener);
    }

    fn can_send(&self) -> bool {
        !self.state().is_disconnected() && self.can_send.load(Ordering::SeqCst)
    }

    fn supported_jobs(&self) -> &[JobKind] {
        &self.supported
    }

    fn as_file_streaming(&self) -> Option<&dyn FileStreamingTransport> {
        self.capabilities.file_streaming.then_some(self as &dyn FileStreamingTransport)
    }

    fn as_file_management(&self) -> Option<&dyn FileManagementTransport> {
        self.capabilities.file_management.then_some(self as &dyn FileManagementTransport)
    }

    fn as_file_aware(&self) -> Option<&dyn FileAwareTransport> {
        self.capabilities.file_aware.then_some(self as &dyn FileAwareTransport)
    }
}

impl FileStreamingTransport for LoopbackTransport {
    fn record_file(&self, remote: &str) -> Result<(), ProtocolError> {
        self.ensure_connected()?;
        *lock(&self.recording) = Some(remote.to_string());
        self.record(TransportCall::RecordFile(remote.to_string()));
        Ok(())
    }

    fn stop_recording_file(&self) -> Result<(), ProtocolError> {
        *lock(&self.recording) = None;
        self.record(TransportCall::StopRecording);
        Ok(())
    }
}

impl FileManagementTransport for LoopbackTransport {
    fn delete_file(&self, remote: &str) -> Result<(), ProtocolError> {
        self.record(TransportCall::DeleteFile(remote.to_string()));
        Ok(())
    }
}

impl FileAwareTransport for LoopbackTransport {
    fn start_file_print(&self, path: &str, position: u64, tags: &Tags) -> Result<(), ProtocolError> {
        self.ensure_connected()?;
        self.record(TransportCall::StartFilePrint {
            path: path.to_string(),
            position,
            tags: tags.clone(),
        });
        Ok(())
    }

    fn get_file_print_status(&self) -> Result<(), ProtocolError> {
        self.ensure_connected()?;
        self.record(TransportCall::GetFilePrintStatus);
        Ok(())
    }
}
