//! Recording jobs: stream a local G-code file while the transport saves a
//! copy of everything sent onto the device's own storage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{JobKind, JobOptions, LocalFileJob, LocalKind, Outcome, PrintJob, StorageLocation};
use crate::error::JobError;
use crate::transport::Transport;

impl LocalFileJob {
    /// Recording job streaming `path` into `remote` on the device.
    pub fn stream(
        remote: impl Into<String>,
        path: impl Into<PathBuf>,
        location: StorageLocation,
        options: JobOptions,
    ) -> Result<Arc<Self>, JobError> {
        Self::build(
            path.into(),
            location,
            options,
            LocalKind::Stream { remote: remote.into() },
        )
    }

    /// Recording job mirroring an existing G-code job onto `remote`.
    ///
    /// Copies path, storage, identity, encoding, user and event data. Only
    /// plain G-code jobs can be mirrored.
    pub fn stream_from(job: &LocalFileJob, remote: impl Into<String>) -> Result<Arc<Self>, JobError> {
        if job.kind() != JobKind::LocalGcodeFile {
            return Err(JobError::IncompatibleJob(format!(
                "can only record a {} job, got a {} job",
                JobKind::LocalGcodeFile,
                job.kind()
            )));
        }
        Self::stream(remote, job.path(), job.storage_location().clone(), job.options())
    }

    pub fn remote(&self) -> Option<&str> {
        match self.local_kind() {
            LocalKind::Stream { remote } => Some(remote),
            _ => None,
        }
    }
}

pub(crate) fn can_stream(transport: &dyn Transport) -> bool {
    transport.supports(JobKind::LocalGcodeStream)
        && transport.as_file_streaming().is_some()
        && transport.as_file_management().is_some()
}

pub(crate) fn begin_recording(transport: &dyn Transport, remote: &str) -> Result<(), JobError> {
    let streaming = transport
        .as_file_streaming()
        .ok_or(JobError::MissingCapability("file streaming"))?;
    streaming.record_file(remote)?;
    tracing::debug!(remote, "Recording streamed job on device");
    Ok(())
}

/// Closes the recording before listeners hear about the outcome. A
/// cancelled recording is deleted so no partial file stays on the device.
pub(crate) fn end_recording(transport: &dyn Transport, remote: &str, outcome: Outcome) {
    if let Some(streaming) = transport.as_file_streaming() {
        if let Err(e) = streaming.stop_recording_file() {
            tracing::warn!(remote, error = %e, "Could not stop recording");
        }
    }
    if outcome != Outcome::Cancelled {
        return;
    }
    match transport.as_file_management() {
        Some(files) => {
            if let Err(e) = files.delete_file(remote) {
                tracing::warn!(remote, error = %e, "Could not delete cancelled recording");
            }
        }
        None => tracing::warn!(remote, "Cannot delete cancelled recording, transport lacks file management"),
    }
}

pub(crate) fn report_stats(elapsed: Duration, lines: u64) {
    if elapsed.is_zero() || lines == 0 {
        return;
    }
    let (lines_per_sec, ms_per_line) = throughput(elapsed, lines);
    tracing::info!(
        "Job processed in {:.3}s ({} lines). Approx. {:.3} lines/s, {:.3} ms/line",
        elapsed.as_secs_f64(),
        lines,
        lines_per_sec,
        ms_per_line
    );
}

fn throughput(elapsed: Duration, lines: u64) -> (f64, f64) {
    let secs = elapsed.as_secs_f64();
    let lines = lines as f64;
    (lines / secs, secs * 1000.0 / lines)
}
