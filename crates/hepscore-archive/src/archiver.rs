//! Pull every image of an [`ImageSet`] as a SIF file and pack them into a
//! single tarball with a checksum file.

use crate::error::{ArchiveError, Result};
use crate::images::ImageSet;
use crate::manifest::ManifestClient;
use hepscore_core::{ContainerLauncher, Invocation, OutputSink, ProcessLauncher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

pub const SIF_DIR: &str = "sif_images";

/// What an archive run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// The remote archive already holds exactly these images.
    UpToDate,
    /// A new tarball was written.
    Built { tarball: PathBuf, checksum: String },
}

pub struct ImageArchiver {
    workdir: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    remote: Option<ManifestClient>,
}

impl ImageArchiver {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            launcher: Arc::new(ContainerLauncher),
            remote: None,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_remote(mut self, remote: ManifestClient) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn archive_dir(&self, set: &ImageSet) -> PathBuf {
        self.workdir.join(set.key())
    }

    pub async fn archive(&self, set: &ImageSet) -> Result<ArchiveStatus> {
        let key = set.key();
        let folder = self.archive_dir(set);
        let sif_dir = folder.join(SIF_DIR);
        ensure_empty_dir(&folder).await?;
        ensure_empty_dir(&sif_dir).await?;

        let manifest = folder.join(format!("{key}.json"));
        let body = serde_json::to_string_pretty(set.images())?;
        tokio::fs::write(&manifest, body)
            .await
            .map_err(|e| ArchiveError::io(&manifest, e))?;
        info!(manifest = %manifest.display(), images = set.images().len(), "image list written");

        if let Some(remote) = &self.remote {
            let published = remote.fetch(&key).await;
            if set.matches(&published) {
                info!(%key, "remote archive already holds these images");
                return Ok(ArchiveStatus::UpToDate);
            }
            info!(%key, "remote archive differs, rebuilding");
        }

        let tarball = folder.join(format!("{key}.tar"));
        for image in set.images() {
            self.add_image(image, &sif_dir, &tarball).await?;
        }
        tokio::fs::remove_dir_all(&sif_dir)
            .await
            .map_err(|e| ArchiveError::io(&sif_dir, e))?;

        let checksum = sha256_file(&tarball).await?;
        let sum_file = folder.join(format!("{key}_sha256sum.txt"));
        tokio::fs::write(&sum_file, format!("{key}.tar {checksum}\n"))
            .await
            .map_err(|e| ArchiveError::io(&sum_file, e))?;
        info!(tarball = %tarball.display(), %checksum, "archive built");

        Ok(ArchiveStatus::Built { tarball, checksum })
    }

    /// Pull one image, rename the SIF to `<name>:<tag>` and append it to the
    /// tarball.
    async fn add_image(&self, image: &str, sif_dir: &Path, tarball: &Path) -> Result<()> {
        let file_name = image
            .rsplit('/')
            .next()
            .filter(|n| n.contains(':'))
            .ok_or_else(|| ArchiveError::UntaggedImage(image.to_string()))?;

        let pull = Invocation::new("singularity").args([
            "pull".to_string(),
            "--dir".to_string(),
            sif_dir.display().to_string(),
            image.to_string(),
        ]);
        self.run(&pull, sif_dir).await?;

        let pulled = sif_dir.join(format!("{}.sif", file_name.replace(':', "_")));
        let renamed = sif_dir.join(file_name);
        tokio::fs::rename(&pulled, &renamed)
            .await
            .map_err(|e| ArchiveError::io(&pulled, e))?;

        let tar = Invocation::new("tar").args([
            "-uvf".to_string(),
            tarball.display().to_string(),
            "-C".to_string(),
            sif_dir.display().to_string(),
            file_name.to_string(),
        ]);
        self.run(&tar, sif_dir).await?;

        tokio::fs::remove_file(&renamed)
            .await
            .map_err(|e| ArchiveError::io(&renamed, e))?;
        Ok(())
    }

    async fn run(&self, invocation: &Invocation, dir: &Path) -> Result<()> {
        info!(command = %invocation, "running");
        let mut sink = OutputSink::in_memory();
        let status = self
            .launcher
            .launch(invocation, dir, &mut sink)
            .await
            .map_err(|source| ArchiveError::Spawn {
                command: invocation.to_string(),
                source,
            })?;
        if status != 0 {
            for line in sink.lines() {
                warn!(output = %line);
            }
            return Err(ArchiveError::Command {
                command: invocation.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Create `dir` if missing. An existing directory must be empty.
async fn ensure_empty_dir(dir: &Path) -> Result<()> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => {
            let next = entries
                .next_entry()
                .await
                .map_err(|e| ArchiveError::io(dir, e))?;
            if next.is_some() {
                return Err(ArchiveError::NotEmpty(dir.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ArchiveError::io(dir, e)),
        Err(e) => Err(ArchiveError::io(dir, e)),
    }
}

async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ArchiveError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| ArchiveError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
