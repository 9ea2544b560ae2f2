//! Jobs that stream a local file to the device line by line.
//!
//! The caller pulls content with [`PrintJob::get_next`]. The open file
//! handle is owned by the job for the duration of a run and is serialized
//! with `cancel`/`reset` through the state mutex, so a cancel from another
//! thread waits for an in-flight read instead of closing the handle under
//! it.

use encoding_rs::Encoding;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use super::{
    EventData, JobCore, JobEvent, JobKind, JobOptions, JobStatus, Outcome, PrintJob, StorageLocation, gcode,
    is_disconnect, stream,
};
use crate::error::JobError;
use crate::listener::lock;
use crate::storage::{ContentLines, TextReader, file_size, open_text, resolve_encoding};
use crate::transport::{ProtocolEvent, ProtocolListener, Tags, Transport};

/// Which content transform and side effects a local job applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalKind {
    /// Lines are passed through untouched.
    Plain,
    /// Lines are trimmed and stripped of G-code comments.
    Gcode,
    /// Like `Gcode`, while the transport records everything sent into
    /// `remote` on the device.
    Stream { remote: String },
}

#[derive(Default)]
struct LocalState {
    reader: Option<TextReader>,
    pos: u64,
    read_lines: u64,
    actual_lines: u64,
    cancel_pos: Option<u64>,
}

impl LocalState {
    fn close(&mut self) {
        // Dropping the reader closes the file; taking it first makes a
        // second close impossible.
        if self.reader.take().is_some() {
            tracing::trace!("Closed local job file handle");
        }
    }
}

pub struct LocalFileJob {
    core: JobCore,
    location: StorageLocation,
    path: PathBuf,
    encoding: &'static Encoding,
    size: u64,
    kind: LocalKind,
    state: Mutex<LocalState>,
    me: Weak<LocalFileJob>,
}

impl LocalFileJob {
    /// Job that sends the file's lines unchanged.
    pub fn new(
        path: impl Into<PathBuf>,
        location: StorageLocation,
        options: JobOptions,
    ) -> Result<Arc<Self>, JobError> {
        Self::build(path.into(), location, options, LocalKind::Plain)
    }

    /// Job that sends the file's G-code with comments and blank lines removed.
    pub fn gcode(
        path: impl Into<PathBuf>,
        location: StorageLocation,
        options: JobOptions,
    ) -> Result<Arc<Self>, JobError> {
        Self::build(path.into(), location, options, LocalKind::Gcode)
    }

    pub(crate) fn build(
        path: PathBuf,
        location: StorageLocation,
        options: JobOptions,
        kind: LocalKind,
    ) -> Result<Arc<Self>, JobError> {
        if !path.is_file() {
            return Err(JobError::MissingFile(path));
        }
        let encoding = resolve_encoding(&options.encoding)?;
        let size = file_size(&path)?;
        Ok(Arc::new_cyclic(|me| Self {
            core: JobCore::new(&options),
            location,
            path,
            encoding,
            size,
            kind,
            state: Mutex::new(LocalState::default()),
            me: me.clone(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn storage_location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn local_kind(&self) -> &LocalKind {
        &self.kind
    }

    pub fn read_lines(&self) -> u64 {
        lock(&self.state).read_lines
    }

    pub fn actual_lines(&self) -> u64 {
        lock(&self.state).actual_lines
    }

    pub fn cancel_pos(&self) -> Option<u64> {
        lock(&self.state).cancel_pos
    }

    /// Options that rebuild a job with this job's identity.
    pub(crate) fn options(&self) -> JobOptions {
        JobOptions {
            name: self.core.name().map(str::to_string),
            user: self.core.user().map(str::to_string),
            event_data: self.core.event_data().clone(),
            encoding: self.encoding.name().to_string(),
            clock: self.core.clock().clone(),
        }
    }

    fn listener_handle(&self) -> Weak<dyn ProtocolListener> {
        self.me.clone()
    }

    fn process_line(&self, line: &str) -> Option<String> {
        match self.kind {
            LocalKind::Plain => Some(line.to_string()),
            LocalKind::Gcode | LocalKind::Stream { .. } => gcode::process_line(line),
        }
    }

    fn status_locked(&self, state: &LocalState) -> JobStatus {
        JobStatus {
            storage: Some(self.location.storage().to_string()),
            path: Some(self.location.path_in_storage().to_string()),
            pos: Some(state.pos),
            size: Some(self.size),
            read_lines: Some(state.read_lines),
            actual_lines: Some(state.actual_lines),
            ..self.core.status(self.kind())
        }
    }

    fn open(&self, transport: &dyn Transport, position: u64) -> Result<(), JobError> {
        let reader = open_text(&self.path, self.encoding, position)?;
        *lock(&self.state) = LocalState {
            reader: Some(reader),
            pos: position,
            ..LocalState::default()
        };
        if let LocalKind::Stream { remote } = &self.kind {
            if let Err(e) = stream::begin_recording(transport, remote) {
                lock(&self.state).close();
                return Err(e);
            }
        }
        Ok(())
    }

    fn finish(&self, outcome: Outcome, status: JobStatus) {
        let Some(elapsed) = self.core.claim_terminal() else {
            return;
        };
        if let (LocalKind::Stream { remote }, Some(transport)) = (&self.kind, self.core.transport()) {
            stream::end_recording(transport.as_ref(), remote, outcome);
        }
        let lines = status.read_lines.unwrap_or(0);
        let event = match outcome {
            Outcome::Done => JobEvent::Done,
            Outcome::Failed => JobEvent::Failed,
            Outcome::Cancelled => JobEvent::Cancelled { position: status.pos },
        };
        self.core.emit_terminal(status, event);
        self.report_stats(elapsed, lines);
        self.reset();
        self.core.release(&self.listener_handle());
    }

    fn report_stats(&self, elapsed: Duration, lines: u64) {
        match self.kind {
            LocalKind::Stream { .. } => stream::report_stats(elapsed, lines),
            LocalKind::Plain | LocalKind::Gcode => {
                if !elapsed.is_zero() && lines > 0 {
                    tracing::info!("Job processed in {:.3}s ({} lines)", elapsed.as_secs_f64(), lines);
                }
            }
        }
    }
}

impl PrintJob for LocalFileJob {
    fn kind(&self) -> JobKind {
        match self.kind {
            LocalKind::Plain => JobKind::LocalFile,
            LocalKind::Gcode => JobKind::LocalGcodeFile,
            LocalKind::Stream { .. } => JobKind::LocalGcodeStream,
        }
    }

    fn core(&self) -> &JobCore {
        &self.core
    }

    fn location(&self) -> Option<&StorageLocation> {
        Some(&self.location)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn pos(&self) -> Option<u64> {
        Some(lock(&self.state).pos)
    }

    fn is_active(&self) -> bool {
        self.core.is_running() && lock(&self.state).reader.is_some()
    }

    fn status(&self) -> JobStatus {
        let state = lock(&self.state);
        self.status_locked(&state)
    }

    fn can_process(&self, transport: &dyn Transport) -> bool {
        match self.kind {
            LocalKind::Plain => transport.supports(JobKind::LocalFile),
            LocalKind::Gcode => transport.supports(JobKind::LocalGcodeFile),
            LocalKind::Stream { .. } => stream::can_stream(transport),
        }
    }

    fn process(&self, transport: &Arc<dyn Transport>, position: u64, _tags: &Tags) -> Result<(), JobError> {
        self.core.begin(transport, self.listener_handle())?;
        if let Err(e) = self.open(transport.as_ref(), position) {
            tracing::error!(path = %self.path.display(), error = %e, "Could not start local job");
            self.core.abort_begin(&self.listener_handle());
            return Err(e);
        }
        tracing::debug!(path = %self.path.display(), position, kind = %self.kind(), "Processing local job");
        self.core.emit_if_active(self.status(), JobEvent::Started);
        Ok(())
    }

    fn cancel(&self, error: bool) {
        let status = {
            let mut state = lock(&self.state);
            if !self.core.is_running() {
                return;
            }
            state.cancel_pos = Some(state.pos);
            self.status_locked(&state)
        };
        let outcome = if error { Outcome::Failed } else { Outcome::Cancelled };
        self.finish(outcome, status);
    }

    fn reset(&self) {
        {
            let mut state = lock(&self.state);
            state.close();
            state.pos = 0;
            state.read_lines = 0;
        }
        // A reset outside the terminal path abandons the run quietly; the
        // recording is closed but kept.
        let transport = self.core.transport();
        if self.core.abandon(&self.listener_handle()) {
            tracing::debug!(path = %self.path.display(), "Local job reset while running");
            if let (LocalKind::Stream { remote }, Some(transport)) = (&self.kind, transport) {
                stream::end_recording(transport.as_ref(), remote, Outcome::Failed);
            }
        }
    }

    fn get_next(&self) -> Result<Option<String>, JobError> {
        let mut state = lock(&self.state);
        if !self.core.is_running() {
            return Ok(None);
        }
        loop {
            let mut line = String::new();
            let read = match state.reader.as_mut() {
                Some(reader) => reader.read_line(&mut line),
                None => return Ok(None),
            };
            match read {
                Ok(0) => {
                    state.close();
                    let status = self.status_locked(&state);
                    drop(state);
                    self.finish(Outcome::Done, status);
                    return Ok(None);
                }
                Ok(_) => {
                    // Position follows the decoded text, not the raw bytes
                    // consumed by the buffered decoder.
                    state.pos += line.chars().count() as u64;
                    state.actual_lines += 1;
                    if let Some(processed) = self.process_line(&line) {
                        state.read_lines += 1;
                        let status = self.status_locked(&state);
                        drop(state);
                        self.core.emit_if_active(status, JobEvent::Progress);
                        return Ok(Some(processed));
                    }
                }
                Err(e) => {
                    drop(state);
                    tracing::error!(path = %self.path.display(), error = %e, "Exception while processing line");
                    self.cancel(true);
                    return Err(e.into());
                }
            }
        }
    }

    fn can_get_content(&self) -> bool {
        true
    }

    fn content_lines(&self) -> Result<Option<ContentLines>, JobError> {
        Ok(Some(ContentLines::open(&self.path, self.encoding)?))
    }

    fn event_payload(&self) -> EventData {
        let mut payload = self.core.base_payload();
        self.location.extend_payload(&mut payload, self.core.name());
        payload.insert("size".to_string(), self.size.into());
        payload
    }
}

impl ProtocolListener for LocalFileJob {
    fn on_protocol_event(&self, event: &ProtocolEvent) {
        if is_disconnect(event) && self.is_active() {
            tracing::warn!(path = %self.path.display(), "Transport disconnected while job was active");
            self.cancel(true);
        }
    }
}
