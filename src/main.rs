mod capture;
mod conversation;
mod direction;
mod error;
mod flow;
mod latency;
mod packet;
mod pipeline;
mod registry;
mod report;
mod runtime;
mod source;
mod stats;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{info, warn};

use crate::{
    pipeline::{Pipeline, PipelineOptions},
    registry::PortRegistry,
    runtime::Runtime,
    source::PcapSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Runtime { cli, conf } = Runtime::new()?;

    tracing_subscriber::fmt()
        .with_max_level(conf.log_level)
        .init();

    if let Some(path) = &conf.config_path {
        info!(
            event.name = "conf.loaded",
            config = %path.display(),
            "configuration file applied"
        );
    }

    // Registry and capture failures are the only fatal conditions; everything
    // downstream is absorbed into anomaly counters.
    let registry = PortRegistry::load(&conf.registry)?;
    info!(
        event.name = "registry.ready",
        entries = registry.len(),
        skipped_rows = registry.skipped_rows(),
        "service registry loaded"
    );

    let source = PcapSource::open(&cli.capture)?;
    info!(
        event.name = "source.ready",
        capture = %cli.capture.display(),
        workers = conf.workers,
        "processing capture"
    );

    // Ctrl-C halts ingestion; finalization still runs over whatever samples
    // exist, yielding a valid partial capture.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(
                    event.name = "pipeline.stop_requested",
                    "stop signal received; finalizing partial capture"
                );
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let pipeline = Pipeline::new(
        Arc::new(registry),
        PipelineOptions {
            worker_count: conf.workers.max(1),
            channel_capacity: conf.channel_capacity,
            histogram_bucket_width: conf.histogram_bucket_width,
        },
    );
    let capture = pipeline.run(source, stop).await;

    info!(
        event.name = "pipeline.complete",
        packets = capture.packets,
        conversations = capture.conversations.len(),
        anomalies = capture.anomalies.total(),
        partial = capture.partial,
        "capture finalized"
    );

    report::render(&capture, conf.format)?;

    Ok(())
}
