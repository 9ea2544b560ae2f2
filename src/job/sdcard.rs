//! Jobs for files that already live on the device's SD card.
//!
//! The host never reads the content. After asking the device to start the
//! file, position and size arrive only through protocol callbacks, and a
//! background timer keeps asking for status while the job runs.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;

use super::{
    EventData, JobCore, JobEvent, JobKind, JobOptions, JobStatus, Outcome, PrintJob, StorageLocation, is_disconnect,
    report_elapsed,
};
use crate::config::JobsConfig;
use crate::error::JobError;
use crate::listener::lock;
use crate::storage::STORAGE_SDCARD;
use crate::timer::RepeatedTimer;
use crate::transport::{ProtocolEvent, ProtocolListener, Tags, Transport};

#[derive(Debug, Default)]
struct SdState {
    active: bool,
    started: bool,
    // Bumped on every process() so a timer left over from an earlier run
    // can tell it is stale.
    run: u64,
    size: Option<u64>,
    last_pos: Option<u64>,
}

pub struct SdFileJob {
    core: JobCore,
    location: StorageLocation,
    filename: String,
    status_interval: Duration,
    state: Mutex<SdState>,
    timer: Mutex<Option<RepeatedTimer>>,
    me: Weak<SdFileJob>,
}

impl SdFileJob {
    /// Job for `path` on the device.
    ///
    /// Name, storage path and event data are derived from `path`; only the
    /// user and clock are taken from `options`.
    pub fn new(path: impl Into<String>, status_interval: Duration, options: JobOptions) -> Arc<Self> {
        let filename = path.into();
        let name = filename.strip_prefix('/').unwrap_or(&filename).to_string();

        let mut event_data = EventData::new();
        event_data.insert("name".to_string(), Value::String(name.clone()));
        event_data.insert("path".to_string(), Value::String(filename.clone()));
        event_data.insert("origin".to_string(), Value::String(STORAGE_SDCARD.to_string()));
        let options = JobOptions {
            name: Some(name.clone()),
            event_data,
            ..options
        };

        Arc::new_cyclic(|me| Self {
            core: JobCore::new(&options),
            location: StorageLocation::sdcard(name),
            filename,
            status_interval,
            state: Mutex::new(SdState::default()),
            timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn from_config(path: impl Into<String>, config: &JobsConfig) -> Arc<Self> {
        Self::new(path, config.status_interval(), JobOptions::from_config(config))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn status_interval(&self) -> Duration {
        self.status_interval
    }

    fn listener_handle(&self) -> Weak<dyn ProtocolListener> {
        self.me.clone()
    }

    fn status_locked(&self, state: &SdState) -> JobStatus {
        JobStatus {
            storage: Some(self.location.storage().to_string()),
            path: Some(self.location.path_in_storage().to_string()),
            pos: state.last_pos,
            size: state.size,
            ..self.core.status(JobKind::SdFile)
        }
    }

    fn is_polling(&self, run: u64) -> bool {
        let state = lock(&self.state);
        state.active && state.run == run
    }

    fn start_status_timer(&self, run: u64, transport: &Arc<dyn Transport>) -> Result<RepeatedTimer, JobError> {
        let condition_job = self.me.clone();
        let tick_job = self.me.clone();
        let transport = Arc::downgrade(transport);
        RepeatedTimer::start(
            self.status_interval,
            move || condition_job.upgrade().is_some_and(|job| job.is_polling(run)),
            move || {
                let (Some(job), Some(transport)) = (tick_job.upgrade(), transport.upgrade()) else {
                    return;
                };
                if job.is_polling(run) {
                    job.query_status(transport.as_ref());
                }
            },
        )
    }

    // Skips the tick when the transport is busy rather than queueing
    // behind it.
    fn query_status(&self, transport: &dyn Transport) {
        if !transport.can_send() {
            return;
        }
        if let Some(files) = transport.as_file_aware() {
            if let Err(e) = files.get_file_print_status() {
                tracing::warn!(file = %self.filename, error = %e, "Status query failed");
            }
        }
    }

    fn on_print_started(&self, size: u64) {
        let status = {
            let mut state = lock(&self.state);
            if !state.active || state.started {
                return;
            }
            state.started = true;
            state.size = Some(size);
            self.status_locked(&state)
        };
        self.core.emit_if_active(status, JobEvent::Started);
    }

    fn on_file_status(&self, pos: u64, total: u64) {
        let status = {
            let mut state = lock(&self.state);
            if !state.active {
                return;
            }
            state.last_pos = Some(pos);
            state.size = Some(total);
            // Progress only follows the device's start acknowledgement.
            if !state.started {
                return;
            }
            self.status_locked(&state)
        };
        self.core.emit_if_active(status, JobEvent::Progress);
    }

    fn finish(&self, outcome: Outcome) {
        let status = self.status();
        let Some(elapsed) = self.core.claim_terminal() else {
            return;
        };
        let event = match outcome {
            Outcome::Done => JobEvent::Done,
            Outcome::Failed => JobEvent::Failed,
            Outcome::Cancelled => JobEvent::Cancelled { position: status.pos },
        };
        self.core.emit_terminal(status, event);
        report_elapsed(elapsed);
        self.reset();
        self.core.release(&self.listener_handle());
    }

    fn abort(&self) {
        self.core.abort_begin(&self.listener_handle());
        self.reset();
    }
}

impl PrintJob for SdFileJob {
    fn kind(&self) -> JobKind {
        JobKind::SdFile
    }

    fn core(&self) -> &JobCore {
        &self.core
    }

    fn location(&self) -> Option<&StorageLocation> {
        Some(&self.location)
    }

    fn size(&self) -> Option<u64> {
        lock(&self.state).size
    }

    fn pos(&self) -> Option<u64> {
        lock(&self.state).last_pos
    }

    fn is_active(&self) -> bool {
        self.core.is_running() && lock(&self.state).active
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn status(&self) -> JobStatus {
        let state = lock(&self.state);
        self.status_locked(&state)
    }

    fn can_process(&self, transport: &dyn Transport) -> bool {
        transport.supports(JobKind::SdFile) && transport.as_file_aware().is_some()
    }

    fn process(&self, transport: &Arc<dyn Transport>, position: u64, tags: &Tags) -> Result<(), JobError> {
        if transport.as_file_aware().is_none() {
            return Err(JobError::MissingCapability("file-aware device control"));
        }
        self.core.begin(transport, self.listener_handle())?;

        let run = {
            let mut state = lock(&self.state);
            state.run += 1;
            state.active = true;
            state.started = false;
            state.size = None;
            state.last_pos = Some(position);
            state.run
        };

        let started = match transport.as_file_aware() {
            Some(files) => files.start_file_print(&self.filename, position, tags).map_err(JobError::from),
            None => Err(JobError::MissingCapability("file-aware device control")),
        };
        if let Err(e) = started {
            tracing::error!(file = %self.filename, error = %e, "Device refused to start file");
            self.abort();
            return Err(e);
        }

        match self.start_status_timer(run, transport) {
            Ok(timer) => {
                *lock(&self.timer) = Some(timer);
                // The device may already have finished the file while we
                // were starting the timer.
                if !self.is_polling(run) {
                    if let Some(timer) = lock(&self.timer).take() {
                        timer.cancel();
                    }
                }
            }
            Err(e) => {
                self.abort();
                return Err(e);
            }
        }
        tracing::debug!(file = %self.filename, position, "Processing SD card job");
        Ok(())
    }

    fn cancel(&self, error: bool) {
        self.finish(if error { Outcome::Failed } else { Outcome::Cancelled });
    }

    fn reset(&self) {
        {
            let mut state = lock(&self.state);
            state.active = false;
            state.started = false;
            state.last_pos = None;
            state.size = None;
        }
        if let Some(timer) = lock(&self.timer).take() {
            timer.cancel();
        }
        if self.core.abandon(&self.listener_handle()) {
            tracing::debug!(file = %self.filename, "SD card job reset while running");
        }
    }

    fn event_payload(&self) -> EventData {
        let mut payload = self.core.base_payload();
        self.location.extend_payload(&mut payload, self.core.name());
        payload
    }
}

impl ProtocolListener for SdFileJob {
    fn on_protocol_event(&self, event: &ProtocolEvent) {
        if is_disconnect(event) {
            if self.is_active() {
                tracing::warn!(file = %self.filename, "Transport disconnected while SD job was active");
                self.cancel(true);
            }
            return;
        }
        match event {
            ProtocolEvent::FilePrintStarted { size, .. } => self.on_print_started(*size),
            ProtocolEvent::FileStatus { pos, total } => self.on_file_status(*pos, *total),
            ProtocolEvent::FilePrintDone => {
                if self.is_active() {
                    self.finish(Outcome::Done);
                }
            }
            ProtocolEvent::StateChanged { .. } => {}
        }
    }
}
