// Shared helpers for the job integration tests
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

use krusty_jobs::{JobEvent, JobListener, JobStatus, PrintJob};

/// Listener that remembers every event it sees.
#[derive(Default)]
pub struct RecordingListener {
    seen: Mutex<Vec<(JobStatus, JobEvent)>>,
}

impl RecordingListener {
    /// Creates a listener and registers it on `job`. Keep the returned Arc
    /// alive for as long as events should be recorded.
    pub fn attach(job: &dyn PrintJob) -> Arc<Self> {
        let listener = Arc::new(Self::default());
        let handle: Arc<dyn JobListener> = listener.clone();
        job.register_listener(&handle);
        listener
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.seen.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.seen.lock().unwrap().iter().map(|(_, e)| e.name()).collect()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.seen.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.seen.lock().unwrap().iter().filter(|(_, e)| e.is_terminal()).count()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

impl JobListener for RecordingListener {
    fn on_job_event(&self, job: &JobStatus, event: &JobEvent) {
        self.seen.lock().unwrap().push((job.clone(), event.clone()));
    }
}

pub fn gcode_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
