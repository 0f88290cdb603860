//! Remote archive manifests.

use std::time::Duration;
use tracing::{info, warn};

/// Fetches `<base>/<key>/<key>.json`, the image list of an archive that
/// was already published.
#[derive(Debug, Clone)]
pub struct ManifestClient {
    base: String,
    client: reqwest::Client,
}

impl ManifestClient {
    pub fn new(base: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn url(&self, key: &str) -> String {
        format!("{}/{key}/{key}.json", self.base)
    }

    /// The published image list. Any failure yields an empty list so the
    /// caller rebuilds the archive.
    pub async fn fetch(&self, key: &str) -> Vec<String> {
        let url = self.url(key);
        info!(%url, "fetching remote archive manifest");
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%url, error = %e, "remote manifest unreachable");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            warn!(%url, status = %response.status(), "remote manifest not available");
            return Vec::new();
        }
        match response.json::<Vec<String>>().await {
            Ok(images) => images,
            Err(e) => {
                warn!(%url, error = %e, "remote manifest is not a list of images");
                Vec::new()
            }
        }
    }
}
