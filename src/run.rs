//! `openli-collector run` — starts the exporter loop.

use anyhow::{Context, Result};
use li_export::{ExporterLoop, ExportMessage, PsPduTemplate, StubEncoder};
use tracing::info;

use crate::config::CollectorConfig;

/// Starts the exporter loop on a dedicated OS thread and blocks the
/// calling thread until it exits. The core loop never exits on its own;
/// an outer supervisor is expected to own restart/shutdown policy.
pub fn run(config: &CollectorConfig) -> Result<()> {
    let template = PsPduTemplate {
        operatorid: config.operatorid.clone(),
        networkelemid: config.networkelemid.clone(),
        interceptpointid: config.interceptpointid.clone(),
    };

    let (tx, rx) = crossbeam_channel::unbounded::<ExportMessage>();

    // Capture workers and the provisioner sync thread (both out of
    // scope for the core) would hold clones of `tx`. Leaking one here
    // keeps the channel open so the exporter never observes a spurious
    // disconnect while those producers are unimplemented.
    std::mem::forget(tx);

    info!(
        operatorid = %config.operatorid,
        networkelemid = %config.networkelemid,
        inputs = config.inputs.len(),
        "starting exporter loop"
    );

    let handle = std::thread::Builder::new()
        .name("exporter-loop".into())
        .spawn(move || {
            let mut exporter = ExporterLoop::new(rx, StubEncoder, template);
            exporter.run();
        })
        .context("failed to spawn exporter loop thread")?;

    handle
        .join()
        .map_err(|_| anyhow::anyhow!("exporter loop thread panicked"))?;
    Ok(())
}
