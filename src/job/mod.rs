//! Print jobs: the lifecycle shared by every way of feeding a device.
//!
//! A job is processed against a [`Transport`], reports its lifecycle to
//! registered [`JobListener`]s and goes idle again after exactly one
//! terminal event (done, failed or cancelled) per run.

pub mod gcode;
pub mod listener;
pub mod local;
pub mod sdcard;
pub mod storage;
pub mod stream;

use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::JobsConfig;
use crate::error::JobError;
use crate::listener::{ListenerRegistry, lock};
use crate::storage::{ContentLines, DEFAULT_ENCODING};
use crate::transport::{ProtocolEvent, ProtocolListener, Tags, Transport};

pub use listener::{JobEvent, JobListener, LoggingListener};
pub use local::{LocalFileJob, LocalKind};
pub use sdcard::SdFileJob;
pub use storage::StorageLocation;

/// Opaque key-value payload copied into every externally visible event.
pub type EventData = serde_json::Map<String, Value>;

/// Capability tag a transport declares for each job kind it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    LocalFile,
    LocalGcodeFile,
    LocalGcodeStream,
    SdFile,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::LocalFile => "local file",
            JobKind::LocalGcodeFile => "local gcode file",
            JobKind::LocalGcodeStream => "local gcode stream",
            JobKind::SdFile => "sd file",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    Failed,
    Cancelled,
}

/// Identity and environment a job is built with.
#[derive(Clone)]
pub struct JobOptions {
    pub name: Option<String>,
    pub user: Option<String>,
    pub event_data: EventData,
    /// Text encoding label for local files.
    pub encoding: String,
    pub clock: Arc<dyn Clock>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            name: None,
            user: None,
            event_data: EventData::new(),
            encoding: DEFAULT_ENCODING.to_string(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl JobOptions {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            encoding: config.encoding.clone(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_event_data(mut self, event_data: EventData) -> Self {
        self.event_data = event_data;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Point-in-time view of a job, handed to listeners with every event.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub kind: JobKind,
    pub name: Option<String>,
    pub storage: Option<String>,
    pub path: Option<String>,
    pub pos: Option<u64>,
    pub size: Option<u64>,
    pub elapsed: Option<Duration>,
    pub clean_elapsed: Option<Duration>,
    pub read_lines: Option<u64>,
    pub actual_lines: Option<u64>,
}

impl JobStatus {
    pub fn progress(&self) -> Option<f64> {
        progress(self.pos, self.size)
    }
}

/// `pos / size`, undefined while either is unknown or the size is zero.
pub fn progress(pos: Option<u64>, size: Option<u64>) -> Option<f64> {
    match (pos, size) {
        (Some(pos), Some(size)) if size > 0 => Some(pos as f64 / size as f64),
        _ => None,
    }
}

/// The shared job interface.
pub trait PrintJob: Send + Sync {
    fn kind(&self) -> JobKind;

    fn core(&self) -> &JobCore;

    fn location(&self) -> Option<&StorageLocation> {
        None
    }

    fn name(&self) -> Option<&str> {
        self.core().name()
    }

    fn user(&self) -> Option<&str> {
        self.core().user()
    }

    fn size(&self) -> Option<u64>;

    fn pos(&self) -> Option<u64>;

    fn progress(&self) -> Option<f64> {
        progress(self.pos(), self.size())
    }

    fn is_active(&self) -> bool;

    /// Whether the device free-runs the content, so the host is not the
    /// bottleneck while this job runs.
    fn is_parallel(&self) -> bool {
        false
    }

    fn elapsed(&self) -> Option<Duration> {
        self.core().elapsed()
    }

    fn clean_elapsed(&self) -> Option<Duration> {
        self.core().clean_elapsed()
    }

    fn last_elapsed(&self) -> Option<Duration> {
        self.core().last_elapsed()
    }

    fn add_to_lost_time(&self, lost: Duration) {
        self.core().add_to_lost_time(lost)
    }

    fn status(&self) -> JobStatus;

    fn can_process(&self, transport: &dyn Transport) -> bool;

    /// Starts driving the job against `transport`.
    ///
    /// Fails with [`JobError::AlreadyActive`] while a previous run is still
    /// in progress.
    fn process(&self, transport: &Arc<dyn Transport>, position: u64, tags: &Tags) -> Result<(), JobError>;

    fn pause(&self, suppress_script: bool) {
        let status = self.status();
        let position = status.pos;
        self.core().emit_if_active(
            status,
            JobEvent::Paused {
                position,
                suppress_script,
            },
        );
    }

    fn resume(&self, suppress_script: bool) {
        self.core().emit_if_active(self.status(), JobEvent::Resumed { suppress_script });
    }

    fn cancelling(&self, firmware_error: Option<String>) {
        self.core()
            .emit_if_active(self.status(), JobEvent::Cancelling { firmware_error });
    }

    /// Ends the current run as failed (`error`) or cancelled. No-op on an
    /// idle job.
    fn cancel(&self, error: bool);

    /// Releases per-run state and owned resources.
    fn reset(&self);

    /// Next content unit to send, `None` once the job has completed.
    fn get_next(&self) -> Result<Option<String>, JobError> {
        Ok(None)
    }

    fn can_get_content(&self) -> bool {
        false
    }

    /// Fresh iterator over the whole content, independent of the run cursor.
    fn content_lines(&self) -> Result<Option<ContentLines>, JobError> {
        Ok(None)
    }

    fn event_payload(&self) -> EventData {
        self.core().base_payload()
    }

    fn register_listener(&self, listener: &Arc<dyn JobListener>) {
        self.core().listeners.register(Arc::downgrade(listener));
    }

    fn unregister_listener(&self, listener: &Arc<dyn JobListener>) {
        self.core().listeners.unregister(&Arc::downgrade(listener));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Active,
    Finishing,
}

#[derive(Default)]
struct Dispatch {
    pending: VecDeque<(JobStatus, JobEvent)>,
    // Thread currently delivering events, if any.
    drainer: Option<ThreadId>,
}

#[derive(Debug, Default)]
struct Timing {
    phase: Phase,
    start: Option<Instant>,
    lost: Duration,
    last_elapsed: Option<Duration>,
}

/// Identity, timing and notification plumbing every job kind embeds.
pub struct JobCore {
    name: Option<String>,
    user: Option<String>,
    event_data: EventData,
    clock: Arc<dyn Clock>,
    timing: Mutex<Timing>,
    transport: Mutex<Option<Weak<dyn Transport>>>,
    listeners: ListenerRegistry<dyn JobListener>,
    dispatch: Mutex<Dispatch>,
    drained: Condvar,
}

impl JobCore {
    pub fn new(options: &JobOptions) -> Self {
        Self {
            name: options.name.clone(),
            user: options.user.clone(),
            event_data: options.event_data.clone(),
            clock: options.clock.clone(),
            timing: Mutex::new(Timing::default()),
            transport: Mutex::new(None),
            listeners: ListenerRegistry::new(),
            dispatch: Mutex::new(Dispatch::default()),
            drained: Condvar::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn event_data(&self) -> &EventData {
        &self.event_data
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// True between `begin` and the terminal claim of a run.
    pub fn is_running(&self) -> bool {
        lock(&self.timing).phase == Phase::Active
    }

    pub fn elapsed(&self) -> Option<Duration> {
        let timing = lock(&self.timing);
        self.elapsed_locked(&timing)
    }

    pub fn clean_elapsed(&self) -> Option<Duration> {
        let timing = lock(&self.timing);
        self.elapsed_locked(&timing)
            .map(|elapsed| elapsed.saturating_sub(timing.lost))
    }

    pub fn last_elapsed(&self) -> Option<Duration> {
        let timing = lock(&self.timing);
        self.elapsed_locked(&timing).or(timing.last_elapsed)
    }

    pub fn lost_time(&self) -> Duration {
        lock(&self.timing).lost
    }

    pub fn add_to_lost_time(&self, lost: Duration) {
        lock(&self.timing).lost += lost;
    }

    fn elapsed_locked(&self, timing: &Timing) -> Option<Duration> {
        timing
            .start
            .map(|start| self.clock.now_monotonic().saturating_duration_since(start))
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        lock(&self.transport).as_ref().and_then(Weak::upgrade)
    }

    pub fn base_payload(&self) -> EventData {
        let mut payload = self.event_data.clone();
        payload.insert(
            "user".to_string(),
            self.user.clone().map(Value::String).unwrap_or(Value::Null),
        );
        payload
    }

    /// Base part of a status snapshot; variants fill in position and size.
    pub(crate) fn status(&self, kind: JobKind) -> JobStatus {
        let timing = lock(&self.timing);
        let elapsed = self.elapsed_locked(&timing);
        JobStatus {
            kind,
            name: self.name.clone(),
            storage: None,
            path: None,
            pos: None,
            size: None,
            elapsed,
            clean_elapsed: elapsed.map(|e| e.saturating_sub(timing.lost)),
            read_lines: None,
            actual_lines: None,
        }
    }

    /// Marks the run as started, binds the transport and subscribes
    /// `listener` to it.
    pub(crate) fn begin(
        &self,
        transport: &Arc<dyn Transport>,
        listener: Weak<dyn ProtocolListener>,
    ) -> Result<(), JobError> {
        {
            let mut timing = lock(&self.timing);
            if timing.phase != Phase::Idle {
                return Err(JobError::AlreadyActive);
            }
            timing.phase = Phase::Active;
            timing.start = Some(self.clock.now_monotonic());
            timing.lost = Duration::ZERO;
        }
        *lock(&self.transport) = Some(Arc::downgrade(transport));
        transport.register_listener(listener);
        Ok(())
    }

    /// Rolls back `begin` for a run that never got going. No events fire.
    pub(crate) fn abort_begin(&self, listener: &Weak<dyn ProtocolListener>) {
        {
            let mut timing = lock(&self.timing);
            timing.start = None;
            timing.phase = Phase::Finishing;
        }
        self.release(listener);
    }

    /// Claims the single terminal transition of the current run and
    /// returns how long the run took. `None` if the job is not running or
    /// another caller already claimed it.
    pub(crate) fn claim_terminal(&self) -> Option<Duration> {
        let mut timing = lock(&self.timing);
        if timing.phase != Phase::Active {
            return None;
        }
        let elapsed = self.elapsed_locked(&timing).unwrap_or_default();
        timing.phase = Phase::Finishing;
        timing.start = None;
        timing.last_elapsed = Some(elapsed);
        Some(elapsed)
    }

    /// Drops both transport subscriptions and returns the job to idle.
    pub(crate) fn release(&self, listener: &Weak<dyn ProtocolListener>) {
        let transport = lock(&self.transport).take().and_then(|t| t.upgrade());
        if let Some(transport) = transport {
            transport.unregister_listener(listener);
        }
        lock(&self.timing).phase = Phase::Idle;
    }

    /// Ends the current run without a terminal event, keeping its elapsed
    /// time for `last_elapsed`. Returns false when no run was active.
    pub(crate) fn abandon(&self, listener: &Weak<dyn ProtocolListener>) -> bool {
        {
            let mut timing = lock(&self.timing);
            if timing.phase != Phase::Active {
                return false;
            }
            timing.last_elapsed = self.elapsed_locked(&timing);
            timing.start = None;
            timing.phase = Phase::Finishing;
        }
        self.release(listener);
        true
    }

    /// Queues `event` unless the run has already ended, then dispatches.
    pub(crate) fn emit_if_active(&self, status: JobStatus, event: JobEvent) -> bool {
        let queued = {
            let timing = lock(&self.timing);
            if timing.phase == Phase::Active {
                lock(&self.dispatch).pending.push_back((status, event));
                true
            } else {
                false
            }
        };
        self.flush();
        queued
    }

    pub(crate) fn emit_terminal(&self, status: JobStatus, event: JobEvent) {
        lock(&self.dispatch).pending.push_back((status, event));
        self.flush();
    }

    // Only one thread delivers at a time, in queue order. Events queued from
    // inside a callback are delivered once that callback returns; any other
    // thread waits until the queue has been drained, so its event has been
    // delivered when it returns. A listener must not block on another
    // thread that is emitting on the same job.
    fn flush(&self) {
        let me = thread::current().id();
        let mut dispatch = lock(&self.dispatch);
        loop {
            match dispatch.drainer {
                Some(owner) if owner == me => return,
                Some(_) => {
                    dispatch = self
                        .drained
                        .wait(dispatch)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => break,
            }
        }
        if dispatch.pending.is_empty() {
            return;
        }
        dispatch.drainer = Some(me);
        while let Some((status, event)) = dispatch.pending.pop_front() {
            drop(dispatch);
            tracing::debug!(job = ?status.name, event = event.name(), "Dispatching job event");
            self.listeners.notify(|l| l.on_job_event(&status, &event));
            dispatch = lock(&self.dispatch);
        }
        dispatch.drainer = None;
        drop(dispatch);
        self.drained.notify_all();
    }
}

/// Logs the base statistics line for a finished run.
pub(crate) fn report_elapsed(elapsed: Duration) {
    if !elapsed.is_zero() {
        tracing::info!("Job processed in {}s", elapsed.as_secs_f64());
    }
}

pub(crate) fn is_disconnect(event: &ProtocolEvent) -> bool {
    matches!(event, ProtocolEvent::StateChanged { new, .. } if new.is_disconnected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::loopback::LoopbackTransport;

    struct NullListener;

    impl ProtocolListener for NullListener {
        fn on_protocol_event(&self, _event: &ProtocolEvent) {}
    }

    fn core_with_clock() -> (JobCore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let options = JobOptions::default()
            .with_name("part.gcode")
            .with_user("alice")
            .with_clock(clock.clone());
        (JobCore::new(&options), clock)
    }

    #[test]
    fn progress_requires_known_nonzero_size() {
        assert_eq!(progress(Some(50), Some(200)), Some(0.25));
        assert_eq!(progress(Some(50), Some(0)), None);
        assert_eq!(progress(None, Some(10)), None);
        assert_eq!(progress(Some(1), None), None);
    }

    #[test]
    fn elapsed_excludes_lost_time() {
        let (core, clock) = core_with_clock();
        let listener: Arc<dyn ProtocolListener> = Arc::new(NullListener);
        let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::default());

        assert_eq!(core.elapsed(), None);
        core.begin(&transport, Arc::downgrade(&listener)).unwrap();
        clock.advance(Duration::from_secs(10));
        core.add_to_lost_time(Duration::from_secs(3));

        assert_eq!(core.elapsed(), Some(Duration::from_secs(10)));
        assert_eq!(core.clean_elapsed(), Some(Duration::from_secs(7)));

        assert_eq!(core.claim_terminal(), Some(Duration::from_secs(10)));
        assert_eq!(core.claim_terminal(), None);
        core.release(&Arc::downgrade(&listener));

        assert_eq!(core.elapsed(), None);
        assert_eq!(core.clean_elapsed(), None);
        assert_eq!(core.last_elapsed(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn begin_twice_is_rejected() {
        let (core, _clock) = core_with_clock();
        let listener: Arc<dyn ProtocolListener> = Arc::new(NullListener);
        let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::default());

        core.begin(&transport, Arc::downgrade(&listener)).unwrap();
        let err = core.begin(&transport, Arc::downgrade(&listener)).unwrap_err();
        assert!(matches!(err, JobError::AlreadyActive));
    }

    #[test]
    fn new_run_resets_lost_time() {
        let (core, _clock) = core_with_clock();
        let listener: Arc<dyn ProtocolListener> = Arc::new(NullListener);
        let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::default());

        core.begin(&transport, Arc::downgrade(&listener)).unwrap();
        core.add_to_lost_time(Duration::from_secs(5));
        core.claim_terminal();
        core.release(&Arc::downgrade(&listener));

        core.begin(&transport, Arc::downgrade(&listener)).unwrap();
        assert_eq!(core.lost_time(), Duration::ZERO);
    }

    #[test]
    fn abandon_ends_active_run_only() {
        let (core, clock) = core_with_clock();
        let listener: Arc<dyn ProtocolListener> = Arc::new(NullListener);
        let loopback = Arc::new(LoopbackTransport::default());
        let transport: Arc<dyn Transport> = loopback.clone();

        assert!(!core.abandon(&Arc::downgrade(&listener)));
        core.begin(&transport, Arc::downgrade(&listener)).unwrap();
        clock.advance(Duration::from_secs(3));

        assert!(core.abandon(&Arc::downgrade(&listener)));
        assert!(!core.is_running());
        assert_eq!(core.elapsed(), None);
        assert_eq!(core.last_elapsed(), Some(Duration::from_secs(3)));
        assert_eq!(loopback.listener_count(), 0);
        assert_eq!(core.claim_terminal(), None);
        core.begin(&transport, Arc::downgrade(&listener)).unwrap();
    }

    #[test]
    fn payload_carries_user() {
        let (core, _clock) = core_with_clock();
        let payload = core.base_payload();
        assert_eq!(payload["user"], Value::String("alice".to_string()));
    }
}
