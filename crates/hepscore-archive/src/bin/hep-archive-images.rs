//! Download the images of a HEPscore configuration and archive them.
//!
//! Exits 111 when the remote archive is already up to date.

use anyhow::Context;
use clap::Parser;
use hepscore_archive::{ArchiveStatus, ImageArchiver, ImageSet, ManifestClient};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};

const UP_TO_DATE: u8 = 111;

#[derive(Parser, Debug)]
#[command(name = "hep-archive-images", version, about = "Archive the workload images of a HEPscore configuration")]
struct Cli {
    /// HEPscore configuration file listing the benchmarks
    #[arg(short = 'i', long = "input-config")]
    input_config: PathBuf,

    /// Working directory for the archive
    #[arg(short, long, default_value = "hep-workloads-sif")]
    workdir: PathBuf,

    /// Architecture suffix of the images (e.g. x86_64, aarch64)
    #[arg(short, long)]
    architecture: Option<String>,

    /// Base URL of the published archives
    #[arg(short, long = "remote-archive-content")]
    remote_archive_content: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    hepscore_core::init_tracing(cli.json_logs, Level::INFO);

    match run(cli).await {
        Ok(ArchiveStatus::UpToDate) => ExitCode::from(UP_TO_DATE),
        Ok(ArchiveStatus::Built { .. }) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ArchiveStatus> {
    let set = ImageSet::from_file(&cli.input_config, cli.architecture.as_deref())
        .await
        .with_context(|| format!("reading {}", cli.input_config.display()))?;
    info!(key = %set.key(), images = set.images().len(), "image set resolved");

    let mut archiver = ImageArchiver::new(&cli.workdir);
    if let Some(remote) = cli.remote_archive_content {
        archiver = archiver.with_remote(ManifestClient::new(remote));
    }
    Ok(archiver.archive(&set).await?)
}
