use super::JobStatus;

/// Lifecycle notifications emitted by a job.
///
/// Per run the order is `Started`, any number of `Progress`, `Paused` /
/// `Resumed` and `Cancelling`, then exactly one of `Done`, `Failed` or
/// `Cancelled`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started,
    Progress,
    Paused {
        position: Option<u64>,
        suppress_script: bool,
    },
    Resumed {
        suppress_script: bool,
    },
    Cancelling {
        firmware_error: Option<String>,
    },
    Cancelled {
        position: Option<u64>,
    },
    Failed,
    Done,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Done | JobEvent::Failed | JobEvent::Cancelled { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Started => "started",
            JobEvent::Progress => "progress",
            JobEvent::Paused { .. } => "paused",
            JobEvent::Resumed { .. } => "resumed",
            JobEvent::Cancelling { .. } => "cancelling",
            JobEvent::Cancelled { .. } => "cancelled",
            JobEvent::Failed => "failed",
            JobEvent::Done => "done",
        }
    }
}

/// Observer of job lifecycle events. Match on the events you care about.
pub trait JobListener: Send + Sync {
    fn on_job_event(&self, job: &JobStatus, event: &JobEvent);
}

/// Writes every lifecycle event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn on_job_event(&self, job: &JobStatus, event: &JobEvent) {
        let name = job.name.as_deref().unwrap_or("<unnamed>");
        match event {
            JobEvent::Progress => {
                tracing::debug!(job = name, pos = ?job.pos, size = ?job.size, "Job progress")
            }
            JobEvent::Failed => tracing::warn!(job = name, kind = %job.kind, "Job failed"),
            JobEvent::Cancelling { firmware_error: Some(error) } => {
                tracing::warn!(job = name, error = %error, "Job cancelling after firmware error")
            }
            other => tracing::info!(job = name, kind = %job.kind, event = other.name(), "Job event"),
        }
    }
}
