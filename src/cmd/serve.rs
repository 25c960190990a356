// ============================================================================
// src/cmd/serve.rs – Run the sink until the environment asks it to stop
// ============================================================================

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::service;
use crate::sink::{check_log_dir, AppendFileSink};
use anyhow::{Context, Result};
use nix::sys::signal::{SigSet, Signal};

pub fn run_serve(cfg: &Config) -> Result<()> {
    // Block before any thread exists so every thread inherits the mask and
    // only the sigwait below observes termination.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.thread_block().context("block termination signals")?;

    tracing::info!(
        uid = nix::unistd::getuid().as_raw(),
        log_file = %cfg.storage.log_path().display(),
        "permission log sink starting"
    );
    check_log_dir(&cfg.storage.log_dir);

    // Phase one: the pipeline, usable with or without an endpoint.
    let sink = AppendFileSink::new(&cfg.storage, &cfg.durability);
    let pipeline = Pipeline::start(cfg, sink).context("spawn serializing writer")?;

    // Phase two: publish the endpoint. Failure leaves the sink running, unreachable.
    let registration = match service::register(&cfg.service, pipeline.front_door()) {
        Ok(reg) => Some(reg),
        Err(err) => {
            tracing::error!(
                error = %err,
                access_denied = err.is_access_denied(),
                "registration failed; running degraded"
            );
            None
        }
    };

    let signal = mask.wait().context("wait for termination signal")?;
    tracing::warn!(?signal, "shutdown requested");

    drop(registration);
    let stats = pipeline.shutdown(cfg.shutdown.policy);
    tracing::info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        written = stats.written,
        dropped_dir_missing = stats.dropped_dir_missing,
        dropped_write_failure = stats.dropped_write_failure,
        discarded = stats.discarded,
        "permission log sink stopped"
    );
    Ok(())
}
