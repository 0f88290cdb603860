//! Best-effort power telemetry.
//!
//! A [`PowerPoller`] is a spawned task that reads every probe on a fixed
//! interval until it is told to stop. It owns its sample buffer and hands
//! it back through its join handle, so the benchmark loop never shares
//! state with it. Probe failures are logged and skipped.

use crate::error::PowerError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One reading: unix seconds and watts.
pub type PowerSample = (f64, f64);

/// A single power reading source.
#[async_trait]
pub trait PowerProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn read_watts(&self) -> Result<f64, PowerError>;
}

/// Reads a plain-text watt value from an HTTP endpoint.
pub struct HttpPowerProbe {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPowerProbe {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, PowerError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hepscore/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl PowerProbe for HttpPowerProbe {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn read_watts(&self) -> Result<f64, PowerError> {
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PowerError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        body.trim().parse::<f64>().map_err(|_| PowerError::Parse {
            endpoint: self.endpoint.clone(),
            body: body.trim().to_string(),
        })
    }
}

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Handle to the background sampling task.
pub struct PowerPoller {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Vec<PowerSample>>,
}

impl PowerPoller {
    /// Start sampling. Returns `None` when there is nothing to poll.
    pub fn start(probes: Vec<Arc<dyn PowerProbe>>, interval: Duration) -> Option<Self> {
        if probes.is_empty() {
            return None;
        }
        info!(endpoints = probes.len(), interval_secs = interval.as_secs(), "starting power telemetry");
        let (stop, mut stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut samples = Vec::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        for probe in &probes {
                            match probe.read_watts().await {
                                Ok(watts) => samples.push((unix_now(), watts)),
                                Err(e) => warn!(probe = %probe.name(), "power reading failed: {}", e),
                            }
                        }
                    }
                }
            }
            debug!(samples = samples.len(), "power telemetry stopped");
            samples
        });
        Some(Self { stop, handle })
    }

    /// Stop the task and collect everything it sampled.
    pub async fn stop(self) -> Vec<PowerSample> {
        let _ = self.stop.send(());
        match self.handle.await {
            Ok(samples) => samples,
            Err(e) => {
                warn!("power telemetry task failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Content of `power.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PowerLog {
    pub power: Vec<PowerSample>,
    /// `<benchmark>run<i>start` / `<benchmark>run<i>end` in unix seconds.
    pub benchtime: BTreeMap<String, f64>,
    /// Every valid per-run score, in execution order.
    pub scores: Vec<f64>,
    /// Final suite score.
    pub score: Vec<f64>,
}

impl PowerLog {
    pub fn mark_start(&mut self, benchmark: &str, run: u32) {
        self.benchtime.insert(format!("{benchmark}run{run}start"), unix_now());
    }

    pub fn mark_end(&mut self, benchmark: &str, run: u32) {
        self.benchtime.insert(format!("{benchmark}run{run}end"), unix_now());
    }

    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        let text = serde_json::to_vec(self)?;
        tokio::fs::write(path, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProbe {
        calls: AtomicU32,
        fail_every: u32,
    }

    #[async_trait]
    impl PowerProbe for CountingProbe {
        fn name(&self) -> &str {
            "counting"
        }

        async fn read_watts(&self) -> Result<f64, PowerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(PowerError::Parse {
                    endpoint: "counting".to_string(),
                    body: "n/a".to_string(),
                });
            }
            Ok(100.0 + n as f64)
        }
    }

    #[test]
    fn test_no_probes_no_poller() {
        assert!(PowerPoller::start(Vec::new(), Duration::from_secs(5)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_samples_until_stopped() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            fail_every: 3,
        });
        let poller = PowerPoller::start(vec![probe.clone() as Arc<dyn PowerProbe>], Duration::from_secs(5))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(26)).await;
        let samples = poller.stop().await;

        let calls = probe.calls.load(Ordering::SeqCst);
        assert!(calls >= 5, "only {calls} polls");
        // every third read fails and is skipped
        assert_eq!(samples.len() as u32, calls - calls / 3);
        assert!(samples.iter().all(|(_, w)| *w > 100.0));
    }

    #[tokio::test]
    async fn test_power_log_written() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = PowerLog::default();
        log.mark_start("db12", 0);
        log.mark_end("db12", 0);
        log.scores.push(1.5);
        log.score.push(1.5);
        let path = tmp.path().join("power.json");
        log.write(&path).await.unwrap();

        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(v["benchtime"]["db12run0start"].is_f64());
        assert_eq!(v["scores"][0], 1.5);
        assert!(v["power"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_probe_unreachable_is_error() {
        let probe = HttpPowerProbe::new("http://127.0.0.1:9/watts").unwrap();
        assert!(probe.read_watts().await.is_err());
    }
}
