//! vmprov - provision a virtual machine from a downloadable image distribution

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use color_eyre::{eyre::Context as _, eyre::eyre, Report, Result};
use tracing_appender::non_blocking::WorkerGuard;

mod allocate;
mod classify;
mod command_run;
mod common_opts;
mod error;
mod extract;
mod fetch;
mod host;
mod locate;
mod provision;
mod resolve;
mod sanitize;
#[cfg(test)]
mod testutil;
mod utils;
mod workarea;

/// Provision a virtual machine on a Proxmox VE host from a disk image
/// distribution.
///
/// The distribution is downloaded into a temporary work area, unpacked
/// (including nested archives) until a disk image and optional OVF
/// descriptor are found, then registered with the host, given a boot disk,
/// boot order and network interface. The work area is always removed.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[clap(flatten)]
    provision: provision::ProvisionOpts,

    /// Also append log output to this file
    #[clap(long)]
    log_file: Option<Utf8PathBuf>,
}

/// Install and configure the tracing/logging system.
///
/// Console output goes to stderr, filtered by RUST_LOG (default 'info').
/// With a log file, the same events are appended there with timestamps.
fn install_tracing(log_file: Option<&Utf8Path>) -> Result<Option<WorkerGuard>> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| eyre!("Log file path has no file name: {path}"))?;
            let dir = match path.parent() {
                Some(p) if !p.as_str().is_empty() => p,
                _ => Utf8Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Creating log directory {dir}"))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(file_layer)
        .with(ErrorLayer::default())
        .init();
    Ok(guard)
}

fn main() -> Result<(), Report> {
    let cli = Cli::parse();
    // Held until exit so buffered log lines reach the file
    let _log_guard = install_tracing(cli.log_file.as_deref())?;
    color_eyre::install()?;

    let opts = &cli.provision;
    let fetcher = fetch::HttpFetcher {
        timeout: opts.download_timeout(),
        show_progress: !opts.quiet,
    };
    let summary = provision::run(opts, &host::Proxmox, &fetcher)?;
    println!("{summary}");
    tracing::debug!("exiting");
    Ok(())
}
