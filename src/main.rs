// src/main.rs - Dry-run a print job against the loopback transport
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use krusty_jobs::config::{self, Config};
use krusty_jobs::job::LoggingListener;
use krusty_jobs::logging;
use krusty_jobs::loopback::LoopbackTransport;
use krusty_jobs::{JobError, JobListener, JobOptions, LocalFileJob, PrintJob, StorageLocation, Tags, Transport};

#[derive(Parser, Debug)]
#[command(name = "krusty-jobs", version, about = "Stream a G-code file through a loopback transport")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "printer.toml")]
    config: PathBuf,

    /// G-code file to stream
    file: PathBuf,

    /// Byte offset to resume from
    #[arg(long, default_value_t = 0)]
    position: u64,

    /// Record the streamed content onto the device under this name
    #[arg(long)]
    record: Option<String>,
}

struct Summary {
    lines_sent: usize,
    elapsed: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        config::load_config(&args.config)?
    } else {
        Config::default()
    };
    config.validate()?;
    logging::init(&config.logging);

    tracing::info!("Starting krusty-jobs dry run");
    tracing::info!("Configuration: {}", args.config.display());

    // Reading the file blocks, keep it off the async workers.
    let summary = tokio::task::spawn_blocking(move || run(args, config)).await??;

    tracing::info!("Sent {} lines", summary.lines_sent);
    if let Some(elapsed) = summary.elapsed {
        tracing::info!("Finished in {:.3}s", elapsed.as_secs_f64());
    }
    Ok(())
}

fn run(args: Args, config: Config) -> Result<Summary, JobError> {
    let loopback = Arc::new(LoopbackTransport::default());
    let transport: Arc<dyn Transport> = loopback.clone();

    let name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.display().to_string());
    let options = JobOptions::from_config(&config.jobs).with_name(name.clone());
    let gcode = LocalFileJob::gcode(&args.file, StorageLocation::local(name), options)?;
    let job = match args.record {
        Some(remote) => LocalFileJob::stream_from(&gcode, remote)?,
        None => gcode,
    };
    if !job.can_process(transport.as_ref()) {
        return Err(JobError::IncompatibleJob(format!("transport cannot run a {} job", job.kind())));
    }

    let logger: Arc<dyn JobListener> = Arc::new(LoggingListener);
    job.register_listener(&logger);

    job.process(&transport, args.position, &Tags::new())?;
    while let Some(line) = job.get_next()? {
        if let Err(e) = loopback.send(&line) {
            job.cancel(true);
            return Err(e.into());
        }
    }

    Ok(Summary {
        lines_sent: loopback.sent_lines().len(),
        elapsed: job.last_elapsed(),
    })
}
