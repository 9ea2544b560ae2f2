// Integration tests for device-resident (SD card) jobs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingListener;
use krusty_jobs::loopback::{Capabilities, LoopbackTransport, TransportCall};
use krusty_jobs::{JobError, JobKind, JobOptions, PrintJob, ProtocolEvent, ProtocolState, SdFileJob, Tags, Transport};
use tokio_test::{assert_err, assert_ok};

const INTERVAL: Duration = Duration::from_secs(1);

fn setup() -> (Arc<SdFileJob>, Arc<LoopbackTransport>, Arc<dyn Transport>) {
    let job = SdFileJob::new("/cube.gco", INTERVAL, JobOptions::default());
    let loopback = Arc::new(LoopbackTransport::default());
    let transport: Arc<dyn Transport> = loopback.clone();
    (job, loopback, transport)
}

fn status_queries(loopback: &LoopbackTransport) -> usize {
    loopback
        .calls()
        .iter()
        .filter(|call| **call == TransportCall::GetFilePrintStatus)
        .count()
}

fn file_status(pos: u64, total: u64) -> ProtocolEvent {
    ProtocolEvent::FileStatus { pos, total }
}

#[tokio::test(start_paused = true)]
async fn test_device_reports_drive_the_lifecycle() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    let mut tags = Tags::new();
    tags.insert("source:api".to_string());

    assert_ok!(job.process(&transport, 0, &tags));
    assert!(job.is_active());
    assert_eq!(
        loopback.calls(),
        vec![TransportCall::StartFilePrint {
            path: "/cube.gco".to_string(),
            position: 0,
            tags,
        }]
    );

    loopback.emit(ProtocolEvent::FilePrintStarted {
        name: "cube.gco".to_string(),
        size: 100,
    });
    assert_eq!(job.size(), Some(100));

    loopback.emit(file_status(20, 100));
    assert_eq!(job.progress(), Some(0.2));
    loopback.emit(file_status(100, 100));
    assert_eq!(job.progress(), Some(1.0));

    loopback.emit(ProtocolEvent::FilePrintDone);
    assert!(!job.is_active());
    assert_eq!(listener.names(), vec!["started", "progress", "progress", "done"]);

    let progress: Vec<Option<f64>> = listener.statuses().iter().map(|s| s.progress()).collect();
    assert_eq!(progress, vec![Some(0.0), Some(0.2), Some(1.0), Some(1.0)]);
    assert_eq!(loopback.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_is_polled_while_running() {
    let (job, loopback, transport) = setup();
    job.process(&transport, 0, &Tags::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(status_queries(&loopback), 3);

    loopback.emit(ProtocolEvent::FilePrintDone);
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(status_queries(&loopback), 3);
}

#[tokio::test(start_paused = true)]
async fn test_busy_transport_is_not_polled() {
    let (job, loopback, transport) = setup();
    loopback.set_can_send(false);
    job.process(&transport, 0, &Tags::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(status_queries(&loopback), 0);

    loopback.set_can_send(true);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(status_queries(&loopback), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling_and_progress() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    job.process(&transport, 0, &Tags::new()).unwrap();
    loopback.emit(ProtocolEvent::FilePrintStarted {
        name: "cube.gco".to_string(),
        size: 100,
    });
    loopback.emit(file_status(40, 100));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(status_queries(&loopback), 1);

    job.cancel(false);
    assert!(!job.is_active());
    assert_eq!(
        listener.events().last(),
        Some(&krusty_jobs::JobEvent::Cancelled { position: Some(40) })
    );

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(status_queries(&loopback), 1);

    loopback.emit(file_status(60, 100));
    loopback.emit(ProtocolEvent::FilePrintDone);
    assert_eq!(listener.names(), vec!["started", "progress", "cancelled"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_fails_once() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    job.process(&transport, 0, &Tags::new()).unwrap();
    loopback.emit(ProtocolEvent::FilePrintStarted {
        name: "cube.gco".to_string(),
        size: 100,
    });

    loopback.set_state(ProtocolState::DisconnectedWithError);
    loopback.set_state(ProtocolState::Disconnected);
    loopback.emit(ProtocolEvent::FilePrintDone);

    assert_eq!(listener.names(), vec!["started", "failed"]);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(status_queries(&loopback), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_start_is_ignored() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    job.process(&transport, 0, &Tags::new()).unwrap();

    for size in [100, 250] {
        loopback.emit(ProtocolEvent::FilePrintStarted {
            name: "cube.gco".to_string(),
            size,
        });
    }
    assert_eq!(listener.names(), vec!["started"]);
    assert_eq!(job.size(), Some(100));
}

#[tokio::test(start_paused = true)]
async fn test_job_can_run_again_after_done() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());

    for position in [0, 50] {
        job.process(&transport, position, &Tags::new()).unwrap();
        loopback.emit(ProtocolEvent::FilePrintStarted {
            name: "cube.gco".to_string(),
            size: 100,
        });
        loopback.emit(ProtocolEvent::FilePrintDone);
    }

    assert_eq!(listener.terminal_count(), 2);
    assert_eq!(listener.names(), vec!["started", "done", "started", "done"]);
    let starts: Vec<u64> = loopback
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            TransportCall::StartFilePrint { position, .. } => Some(position),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![0, 50]);
}

#[tokio::test(start_paused = true)]
async fn test_refused_start_leaves_job_idle() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    loopback.set_state(ProtocolState::Disconnected);

    let err = assert_err!(job.process(&transport, 0, &Tags::new()));
    assert!(matches!(err, JobError::Protocol(_)));
    assert!(!job.is_active());
    assert_eq!(loopback.listener_count(), 0);
    assert!(listener.events().is_empty());
}

#[test]
fn test_process_without_runtime_is_rolled_back() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());

    let err = assert_err!(job.process(&transport, 0, &Tags::new()));
    assert!(matches!(err, JobError::NoRuntime));
    assert!(!job.is_active());
    assert_eq!(loopback.listener_count(), 0);
    assert!(listener.events().is_empty());
}

#[test]
fn test_requires_file_aware_transport() {
    let job = SdFileJob::new("/cube.gco", INTERVAL, JobOptions::default());
    let without = LoopbackTransport::new(&[JobKind::SdFile], Capabilities::none());
    assert!(!job.can_process(&without));
    assert!(job.can_process(&LoopbackTransport::default()));

    let transport: Arc<dyn Transport> = Arc::new(without);
    let err = assert_err!(job.process(&transport, 0, &Tags::new()));
    assert!(matches!(err, JobError::MissingCapability(_)));
    assert!(!job.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_running_stops_polling_and_frees_the_job() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    job.process(&transport, 0, &Tags::new()).unwrap();
    loopback.emit(ProtocolEvent::FilePrintStarted {
        name: "cube.gco".to_string(),
        size: 100,
    });

    job.reset();
    assert!(!job.is_active());
    assert_eq!(job.elapsed(), None);
    assert_eq!(loopback.listener_count(), 0);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(status_queries(&loopback), 0);
    assert_eq!(listener.names(), vec!["started"]);

    assert_ok!(job.process(&transport, 0, &Tags::new()));
    assert!(job.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_zero_status_interval_is_refused() {
    let job = SdFileJob::new("/cube.gco", Duration::ZERO, JobOptions::default());
    let loopback = Arc::new(LoopbackTransport::default());
    let transport: Arc<dyn Transport> = loopback.clone();

    let err = assert_err!(job.process(&transport, 0, &Tags::new()));
    assert!(matches!(err, JobError::ZeroInterval));
    assert!(!job.is_active());
    assert_eq!(loopback.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_before_start_is_not_reported() {
    let (job, loopback, transport) = setup();
    let listener = RecordingListener::attach(job.as_ref());
    job.process(&transport, 0, &Tags::new()).unwrap();

    loopback.emit(file_status(10, 100));
    assert!(listener.events().is_empty());
    assert_eq!(job.pos(), Some(10));

    loopback.emit(ProtocolEvent::FilePrintStarted {
        name: "cube.gco".to_string(),
        size: 100,
    });
    loopback.emit(file_status(30, 100));
    assert_eq!(listener.names(), vec!["started", "progress"]);
}
