//! The benchmark suite: runs every configured benchmark in order and
//! produces the final report.

use crate::config::{ContainerEngine, RunOptions, ValidatedConfig};
use crate::digest::config_fingerprint;
use crate::environment::{machine_arch, userns_supported, EngineProfile, EnvironmentSnapshot};
use crate::error::{HepscoreError, Result};
use crate::executor::command::SINGULARITY_BIND_VARS;
use crate::executor::{BenchmarkRunner, ContainerLauncher, EngineFlags, ProcessLauncher, RunContext};
use crate::obs::{self, SuiteSpan};
use crate::power::{HttpPowerProbe, PowerLog, PowerPoller, PowerProbe};
use crate::reducer::ResultReducer;
use crate::report::FinalReport;
use crate::scorer::{FinalScore, ScoreAccumulator, Status};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Name of the power telemetry file inside the results directory.
pub const POWER_FILE: &str = "power.json";

/// Result of a suite run. `status` is 0 on success and -1 on failure.
#[derive(Debug)]
pub struct SuiteOutcome {
    pub report: FinalReport,
    pub power: PowerLog,
    pub status: i32,
}

impl SuiteOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == 0
    }
}

/// Runs a validated configuration inside one results directory.
pub struct Hepscore {
    config: ValidatedConfig,
    options: RunOptions,
    results_dir: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    probes: Vec<Arc<dyn PowerProbe>>,
    engine_profile: Option<EngineProfile>,
    reducer: ResultReducer,
}

impl Hepscore {
    pub fn new(config: ValidatedConfig, options: RunOptions, results_dir: impl Into<PathBuf>) -> Self {
        let probes = options
            .power_endpoints
            .iter()
            .filter_map(|endpoint| match HttpPowerProbe::new(endpoint.as_str()) {
                Ok(probe) => Some(Arc::new(probe) as Arc<dyn PowerProbe>),
                Err(e) => {
                    warn!(endpoint = %endpoint, "power probe disabled: {}", e);
                    None
                }
            })
            .collect();
        Self {
            config,
            options,
            results_dir: results_dir.into(),
            launcher: Arc::new(ContainerLauncher),
            probes,
            engine_profile: None,
            reducer: ResultReducer::default(),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_power_probes(mut self, probes: Vec<Arc<dyn PowerProbe>>) -> Self {
        self.probes = probes;
        self
    }

    /// Skip engine detection and use `profile`.
    pub fn with_engine_profile(mut self, profile: EngineProfile) -> Self {
        self.engine_profile = Some(profile);
        self
    }

    pub fn with_reducer(mut self, reducer: ResultReducer) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    fn engine(&self) -> ContainerEngine {
        self.config.engine()
    }

    /// Run every benchmark and compute the final score.
    ///
    /// Benchmark failures are part of the outcome. `Err` is reserved for
    /// conditions that prevent the suite from running at all.
    pub async fn run(&self) -> Result<SuiteOutcome> {
        let replay = self.options.replay;
        if !replay {
            self.ensure_empty_results_dir().await?;
        }

        let settings = &self.config.settings;
        let config_hash = config_fingerprint(&self.config)?;
        let _span = SuiteSpan::enter(&settings.name, &config_hash);

        let profile = match &self.engine_profile {
            Some(p) => p.clone(),
            None => EngineProfile::detect(self.engine()).await,
        };
        let environment = EnvironmentSnapshot::capture(&profile).await;

        info!("{} Benchmark", settings.name);
        info!("Config Hash:         {}", config_hash);
        info!("HEPscore version:    {}", crate::VERSION);
        info!("System:              {}", environment.system);
        info!("Container Execution: {}", self.engine());
        info!("Implementation:      {}", profile.implementation);
        info!("Registry:            {}", settings.registry);
        info!("Output:              {}", self.results_dir.display());
        info!("Date:                {}", environment.start_at.to_rfc2822());

        let ctx = self.run_context(&profile).await;
        if replay {
            info!("NOTE: replaying prior results");
        } else {
            self.prepare_dirs(&ctx).await?;
        }

        let mut report = FinalReport::new(
            self.config.clone(),
            config_hash,
            crate::VERSION,
            environment,
            replay,
        );
        obs::emit_suite_started(&settings.name, self.config.benchmarks.len(), replay);

        let poller = PowerPoller::start(
            self.probes.clone(),
            Duration::from_secs(self.options.power_interval_secs()),
        );
        let mut power = PowerLog::default();
        let loop_result = self.run_benchmarks(&ctx, &mut report, &mut power).await;
        if let Some(poller) = poller {
            power.power = poller.stop().await;
        }
        let (accumulator, have_failure) = loop_result?;

        if !replay {
            self.remove_dirs(&ctx).await;
        }

        let result = if have_failure {
            error!("BENCHMARK FAILURE");
            FinalScore::failed()
        } else {
            let result = accumulator.combine(settings.scaling);
            info!("Final result: {}", result.score);
            if result.status == Status::Failed {
                debug!("final result is not valid");
            }
            power.score.push(result.score);
            result
        };
        report.finalize(result);

        let power_path = self.results_dir.join(POWER_FILE);
        if let Err(e) = power.write(&power_path).await {
            warn!("failed to write {}: {}", power_path.display(), e);
        }

        obs::emit_suite_finished(
            &settings.name,
            result.score,
            result.status.as_str(),
            report.environment().duration_secs(),
        );
        let status = if result.status == Status::Failed { -1 } else { 0 };
        Ok(SuiteOutcome { report, power, status })
    }

    /// Returns the accumulated scores and whether any benchmark failed.
    async fn run_benchmarks(
        &self,
        ctx: &RunContext,
        report: &mut FinalReport,
        power: &mut PowerLog,
    ) -> Result<(ScoreAccumulator, bool)> {
        let runner = BenchmarkRunner::new(ctx, self.launcher.as_ref()).with_reducer(self.reducer.clone());
        let continue_fail = self.config.settings.continue_on_failure();
        let mut accumulator = ScoreAccumulator::new();
        let mut have_failure = false;

        for spec in &self.config.benchmarks {
            let outcome = runner.run(spec, power).await?;
            power.scores.extend(outcome.reduced.scored.iter().map(|r| r.score));

            let score = outcome.score();
            if outcome.failed() {
                have_failure = true;
                report.set_error(&spec.name);
                if !continue_fail {
                    report.add_benchmark(outcome, false);
                    break;
                }
            }
            accumulator.push(score, spec.weight_or_default());
            report.add_benchmark(outcome, true);
        }
        Ok((accumulator, have_failure))
    }

    async fn run_context(&self, profile: &EngineProfile) -> RunContext {
        let settings = &self.config.settings;
        let engine = self.engine();
        let singularity = engine == ContainerEngine::Singularity;
        let flags = if self.options.replay || !singularity {
            EngineFlags::default()
        } else {
            EngineFlags {
                unsquash: profile.supports_unsquash().await,
                userns: self.options.userns && userns_supported(),
            }
        };
        if self.options.userns && singularity && !flags.userns {
            warn!("user namespaces requested but not supported on this host");
        }
        RunContext {
            results_dir: self.results_dir.clone(),
            suite_log: self.results_dir.join(format!("{}.log", settings.name)),
            engine,
            registry: settings.registry.clone(),
            flags,
            arch: settings.add_arch().then(|| machine_arch().to_string()),
            repetitions: settings.repetitions,
            retries: settings.retries(),
            ncores: settings.ncores,
            clean: self.options.clean,
            clean_files: self.options.clean_files,
            replay: self.options.replay,
        }
    }

    async fn ensure_empty_results_dir(&self) -> Result<()> {
        let prepare = |source| HepscoreError::Prepare {
            what: "results directory",
            path: self.results_dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.results_dir).await.map_err(prepare)?;
        if entries.next_entry().await.map_err(prepare)?.is_some() {
            error!("results directory is not empty: {}", self.results_dir.display());
            return Err(HepscoreError::ResultsDirNotEmpty(self.results_dir.clone()));
        }
        Ok(())
    }

    async fn prepare_dirs(&self, ctx: &RunContext) -> Result<()> {
        if ctx.engine == ContainerEngine::Singularity {
            for var in SINGULARITY_BIND_VARS {
                if std::env::var_os(var).is_some() {
                    warn!("unsetting {} for container runs", var);
                }
            }
            let unpack = ctx.unpack_dir();
            debug!("creating singularity unpack directory {}", unpack.display());
            tokio::fs::create_dir_all(&unpack)
                .await
                .map_err(|source| HepscoreError::Prepare {
                    what: "singularity unpack directory",
                    path: unpack.clone(),
                    source,
                })?;
        }

        let tmp = ctx.tmp_dir();
        let prepare = |source| HepscoreError::Prepare {
            what: "tmp directory",
            path: tmp.clone(),
            source,
        };
        tokio::fs::create_dir_all(&tmp).await.map_err(prepare)?;
        if ctx.engine == ContainerEngine::Docker {
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o1777))
                .await
                .map_err(prepare)?;
        }
        Ok(())
    }

    /// Remove the shared directories when empty. Leftovers stay for
    /// inspection.
    async fn remove_dirs(&self, ctx: &RunContext) {
        let tmp = ctx.tmp_dir();
        if let Err(e) = tokio::fs::remove_dir(&tmp).await {
            debug!("keeping {}: {}", tmp.display(), e);
            if ctx.engine == ContainerEngine::Docker {
                if let Err(e) = tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755)).await {
                    warn!("failed to restore permissions on {}: {}", tmp.display(), e);
                }
            }
        }
        if ctx.engine == ContainerEngine::Singularity {
            let unpack = ctx.unpack_dir();
            debug!("removing singularity unpack directory {}", unpack.display());
            if let Err(e) = tokio::fs::remove_dir(&unpack).await {
                debug!("could not remove singularity unpack dir {}: {}", unpack.display(), e);
            }
        }
    }
}
