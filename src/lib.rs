// krusty_jobs: print job execution for the Krusty host

pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod listener;
pub mod logging;
pub mod loopback;
pub mod storage;
pub mod timer;
pub mod transport;

pub use error::JobError;
pub use job::{
    EventData, JobEvent, JobKind, JobListener, JobOptions, JobStatus, LocalFileJob, LocalKind, PrintJob, SdFileJob,
    StorageLocation,
};
pub use transport::{ProtocolEvent, ProtocolListener, ProtocolState, Tags, Transport};
