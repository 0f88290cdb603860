//! HEPscore - benchmark suite execution
//!
//! The `hep-score` command runs every workload of a benchmark configuration
//! in its container, then writes a JSON (or YAML) report with the combined
//! score into a fresh results directory under `OUTDIR`.
//!
//! ## Exit codes
//!
//! - `0`: success
//! - `1`: both `-f` and `-b` given, invalid configuration, or the suite could not start
//! - `2`: missing `OUTDIR`, a failed run, or the report could not be written
//! - `3`: configuration file is not valid YAML
//! - `4`: configuration has no `hepscore` root or a malformed `options` section
//! - `5`: replay directory does not exist
//! - `6`: `OUTDIR` is not a directory
//! - `7`: results directory could not be created

use anyhow::{anyhow, Context};
use clap::Parser;
use hepscore_core::config::loader::{parse_yaml, unwrap_root};
use hepscore_core::environment::available_cores;
use hepscore_core::{
    list_named, named_path, validate, Hepscore, LoadedConfig, OutputFormat, UriScheme,
    ValidationContext,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG: &str = "hepscore-default";
const DEFAULT_CONFIG_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/etc");
const RESULTS_PREFIX: &str = "HEPscore";

#[derive(Parser, Debug)]
#[command(name = "hep-score")]
#[command(author = "HEP Benchmarks Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HEPscore Benchmark Execution", long_about = None)]
#[command(after_help = "Examples:

  Run benchmarks via Docker, and display verbose information:
  $ hep-score -v -m docker ./testdir

  Run using Singularity (default) with a custom benchmark configuration:
  $ hep-score -f /tmp/my-custom-bmk.yml /tmp

  List built-in benchmark configurations:
  $ hep-score -l

  Run with a specified built-in benchmark configuration:
  $ hep-score -b hepscore-testkv /tmp

  Run using the workload containers in a local directory:
  $ hep-score --registry dir:///home/bmk/hs23-workloads /tmp")]
struct Cli {
    /// Base output directory
    outdir: Option<PathBuf>,

    /// Container platform for benchmark execution
    #[arg(short = 'm', long, value_parser = ["singularity", "docker"])]
    container_exec: Option<String>,

    /// Container registry type
    #[arg(short = 'i', long, value_parser = ["docker", "shub", "dir", "oras", "https"])]
    container_uri: Option<String>,

    /// Enable user namespace for Singularity, if supported
    #[arg(short = 'S', long)]
    userns: bool,

    /// Clean residual container images from system after run
    #[arg(short = 'c', long)]
    clean: bool,

    /// Clean residual files & directories after execution. Tar results
    #[arg(short = 'C', long)]
    clean_files: bool,

    /// Custom config yaml to use instead of default
    #[arg(short = 'f', long)]
    conffile: Option<PathBuf>,

    /// List built-in benchmark configurations and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// Use specified named built-in benchmark configuration
    #[arg(short = 'b', long)]
    builtinconf: Option<String>,

    /// Override the configured registry
    #[arg(short = 'R', long)]
    registry: Option<String>,

    /// Number of cores each workload is pinned to (changes the config hash)
    #[arg(short = 'n', long)]
    ncores: Option<u32>,

    /// Replay output using existing results directory OUTDIR
    #[arg(short = 'r', long)]
    replay: bool,

    /// Summary output file path/name
    #[arg(short = 'o', long)]
    outfile: Option<PathBuf>,

    /// Create YAML summary output instead of JSON
    #[arg(short = 'y', long)]
    yaml: bool,

    /// Print configuration and exit
    #[arg(short = 'p', long)]
    print: bool,

    /// Power telemetry endpoint returning watts as plain text (repeatable)
    #[arg(long = "power-endpoint")]
    power_endpoints: Vec<String>,

    /// Seconds between power readings
    #[arg(long)]
    power_interval: Option<u64>,

    /// Directory holding the built-in configurations
    #[arg(long, env = "HEPSCORE_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Enable verbose mode. Display debug messages
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json_logs: bool,
}

/// Process exit statuses of `hep-score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Success = 0,
    Config = 1,
    Failed = 2,
    WrongFormat = 3,
    Malformed = 4,
    MissingResultsDir = 5,
    InvalidResultsDir = 6,
    OutdirCreation = 7,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// An error together with the exit status it maps to.
#[derive(Debug)]
struct Failure {
    exit: Exit,
    error: anyhow::Error,
}

type CliResult<T> = std::result::Result<T, Failure>;

trait OrExit<T> {
    fn or_exit(self, exit: Exit) -> CliResult<T>;
}

impl<T, E: Into<anyhow::Error>> OrExit<T> for std::result::Result<T, E> {
    fn or_exit(self, exit: Exit) -> CliResult<T> {
        self.map_err(|e| Failure {
            exit,
            error: e.into(),
        })
    }
}

fn fail<T>(exit: Exit, error: anyhow::Error) -> CliResult<T> {
    Err(Failure { exit, error })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    hepscore_core::init_tracing(cli.json_logs, level);

    match run(cli).await {
        Ok(exit) => exit.into(),
        Err(failure) => {
            error!("{:#}", failure.error);
            failure.exit.into()
        }
    }
}

async fn run(cli: Cli) -> CliResult<Exit> {
    check_args(&cli)?;

    if cli.list {
        println!("Available built-in HEPscore benchmark configurations:");
        for name in list_named(&cli.config_dir) {
            println!("{name}");
        }
        return Ok(Exit::Success);
    }

    let conffile = config_path(&cli);
    let text = std::fs::read_to_string(&conffile)
        .with_context(|| format!("cannot read configuration file {}", conffile.display()))
        .or_exit(Exit::WrongFormat)?;
    let doc = parse_yaml(&text)
        .with_context(|| format!("configuration file {} is not a correct yaml file", conffile.display()))
        .or_exit(Exit::WrongFormat)?;

    if cli.print {
        let rendered = serde_yaml::to_string(&doc).or_exit(Exit::WrongFormat)?;
        print!("{rendered}");
        return Ok(Exit::Success);
    }

    let mut loaded = unwrap_root(doc)
        .and_then(LoadedConfig::from_root)
        .or_exit(Exit::Malformed)?;
    overlay_cli(&cli, &mut loaded).or_exit(Exit::Config)?;
    loaded.apply_option_overrides();

    let ctx = ValidationContext::new(loaded.options.container_uri, available_cores());
    let config = validate(&loaded.document, &ctx)
        .context("invalid configuration")
        .or_exit(Exit::Config)?;

    let outdir = cli
        .outdir
        .as_deref()
        .ok_or_else(|| anyhow!("output directory required"))
        .or_exit(Exit::Failed)?;
    let results_dir = results_dir(outdir, loaded.options.replay)?;

    let outcome = Hepscore::new(config, loaded.options.clone(), &results_dir)
        .run()
        .await
        .context("benchmark suite could not run")
        .or_exit(Exit::Config)?;

    let format = if cli.yaml { OutputFormat::Yaml } else { OutputFormat::Json };
    let outfile = cli
        .outfile
        .clone()
        .unwrap_or_else(|| outcome.report.default_path(&results_dir, format));
    outcome
        .report
        .write(format, &outfile)
        .await
        .context("failed to write the report")
        .or_exit(Exit::Failed)?;
    info!("results written to {}", outfile.display());

    if outcome.succeeded() {
        Ok(Exit::Success)
    } else {
        Ok(Exit::Failed)
    }
}

fn check_args(cli: &Cli) -> CliResult<()> {
    if cli.outdir.is_none() && !(cli.print || cli.list) {
        println!("Output directory required. 'hep-score <args> OUTDIR'\nSee usage: 'hep-score --help'");
        return fail(Exit::Failed, anyhow!("output directory required"));
    }
    if cli.conffile.is_some() && cli.builtinconf.is_some() {
        return fail(
            Exit::Config,
            anyhow!("cannot specify both a configuration file and a built-in configuration"),
        );
    }
    Ok(())
}

fn config_path(cli: &Cli) -> PathBuf {
    if let Some(file) = &cli.conffile {
        return file.clone();
    }
    if let Some(name) = &cli.builtinconf {
        if !list_named(&cli.config_dir).contains(name) {
            error!("{} not an available built-in configuration", name);
        }
        return named_path(&cli.config_dir, name);
    }
    named_path(&cli.config_dir, DEFAULT_CONFIG)
}

/// Command-line flags win over the configuration's `options` section.
fn overlay_cli(cli: &Cli, loaded: &mut LoadedConfig) -> anyhow::Result<()> {
    if let Some(engine) = &cli.container_exec {
        loaded.set_container_exec(engine);
    }
    let options = &mut loaded.options;
    if let Some(uri) = &cli.container_uri {
        options.container_uri =
            Some(UriScheme::parse(uri).ok_or_else(|| anyhow!("container uri '{uri}' not understood"))?);
    }
    if let Some(registry) = &cli.registry {
        println!("NOTICE - overriding config registry with {registry}");
        options.registry = Some(Value::from(registry.clone()));
    }
    if let Some(ncores) = cli.ncores {
        options.ncores = Some(ncores);
    }
    options.userns |= cli.userns;
    options.clean |= cli.clean;
    options.clean_files |= cli.clean_files;
    options.replay |= cli.replay;
    if !cli.power_endpoints.is_empty() {
        options.power_endpoints = cli.power_endpoints.clone();
    }
    if cli.power_interval.is_some() {
        options.power_interval_secs = cli.power_interval;
    }
    Ok(())
}

/// Replay reuses `outdir`; a real run gets `outdir/HEPscore_<timestamp>`.
fn results_dir(outdir: &Path, replay: bool) -> CliResult<PathBuf> {
    if replay {
        if !outdir.is_dir() {
            return fail(
                Exit::MissingResultsDir,
                anyhow!("replay did not find a valid directory at {}", outdir.display()),
            );
        }
        return Ok(outdir.to_path_buf());
    }

    let dir = outdir.join(format!(
        "{}_{}",
        RESULTS_PREFIX,
        chrono::Local::now().format("%d%b%Y_%H%M%S")
    ));
    if outdir.exists() && !outdir.is_dir() {
        return fail(
            Exit::InvalidResultsDir,
            anyhow!("{} not valid directory", dir.display()),
        );
    }
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!("cannot create {}: {}", dir.display(), e);
        return fail(
            Exit::OutdirCreation,
            anyhow!(
                "failed creating output directory {}. Do you have write permission?",
                dir.display()
            ),
        );
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hep-score").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_outdir_required_unless_list_or_print() {
        let err = check_args(&parse(&[])).unwrap_err();
        assert_eq!(err.exit, Exit::Failed);
        assert!(check_args(&parse(&["-l"])).is_ok());
        assert!(check_args(&parse(&["-p"])).is_ok());
        assert!(check_args(&parse(&["/tmp"])).is_ok());
    }

    #[test]
    fn test_conffile_and_builtin_conflict() {
        let err = check_args(&parse(&["-f", "config.yaml", "-b", "sample", "/tmp"])).unwrap_err();
        assert_eq!(err.exit, Exit::Config);
    }

    #[test]
    fn test_invalid_engine_rejected_by_parser() {
        assert!(Cli::try_parse_from(["hep-score", "-m", "podman", "/tmp"]).is_err());
        assert!(Cli::try_parse_from(["hep-score", "-i", "ftp", "/tmp"]).is_err());
    }

    #[test]
    fn test_config_path_selection() {
        let cli = parse(&["--config-dir", "/etc/hep", "/tmp"]);
        assert_eq!(config_path(&cli), PathBuf::from("/etc/hep/hepscore-default.yaml"));
        let cli = parse(&["--config-dir", "/etc/hep", "-b", "hepscore-testkv", "/tmp"]);
        assert_eq!(config_path(&cli), PathBuf::from("/etc/hep/hepscore-testkv.yaml"));
        let cli = parse(&["-f", "/tmp/mine.yaml", "/tmp"]);
        assert_eq!(config_path(&cli), PathBuf::from("/tmp/mine.yaml"));
    }

    #[test]
    fn test_builtin_configurations_validate() {
        let dir = PathBuf::from(DEFAULT_CONFIG_DIR);
        let names = list_named(&dir);
        assert!(names.contains(&DEFAULT_CONFIG.to_string()));
        for name in names {
            let loaded = hepscore_core::read_config(&named_path(&dir, &name)).unwrap();
            validate(&loaded.document, &ValidationContext::new(None, 64))
                .unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn test_cli_overlays_options() {
        let cli = parse(&[
            "-m", "docker", "-R", "docker://registry.example.org/hep", "-n", "4", "-c", "-r",
            "--power-endpoint", "http://pdu/watts", "/tmp",
        ]);
        let mut loaded = hepscore_core::load_str(
            "hepscore:\n  settings:\n    name: x\n  benchmarks: {}\n  options:\n    clean_files: true\n",
        )
        .unwrap();
        overlay_cli(&cli, &mut loaded).unwrap();
        loaded.apply_option_overrides();

        assert_eq!(loaded.document["settings"]["container_exec"], "docker");
        assert_eq!(loaded.document["settings"]["ncores"], 4);
        assert_eq!(loaded.document["settings"]["registry"], "docker://registry.example.org/hep");
        assert!(loaded.options.clean && loaded.options.clean_files && loaded.options.replay);
        assert_eq!(loaded.options.power_endpoints, ["http://pdu/watts"]);
    }

    #[test]
    fn test_results_dir_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = results_dir(tmp.path(), false).unwrap();
        assert!(dir.is_dir());
        assert!(dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap()
            .starts_with("HEPscore_"));

        let file = tmp.path().join("file");
        std::fs::write(&file, "").unwrap();
        assert_eq!(results_dir(&file, false).unwrap_err().exit, Exit::InvalidResultsDir);
        assert_eq!(
            results_dir(&tmp.path().join("missing"), true).unwrap_err().exit,
            Exit::MissingResultsDir
        );
        assert_eq!(results_dir(tmp.path(), true).unwrap(), tmp.path());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Exit::Success as u8, 0);
        assert_eq!(Exit::Malformed as u8, 4);
        assert_eq!(Exit::OutdirCreation as u8, 7);
    }
}
