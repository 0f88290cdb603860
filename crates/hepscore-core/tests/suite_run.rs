//! Whole-suite runs with a scripted container engine.

use hepscore_core::environment::available_cores;
use hepscore_core::{
    load_str, validate, EngineProfile, Hepscore, HepscoreError, OutputFormat, ProcessLauncher,
    RunOptions, ScriptedLauncher, ScriptedRun, Status, ValidatedConfig, ValidationContext,
    POWER_FILE,
};
use std::path::Path;
use std::sync::Arc;

fn config(continue_fail: bool) -> ValidatedConfig {
    config_for("oras://registry.cern.ch/hep-workloads", "singularity", continue_fail)
}

fn config_for(registry: &str, engine: &str, continue_fail: bool) -> ValidatedConfig {
    let text = format!(
        r#"
hepscore:
  benchmarks:
    db12-bmk:
      version: v2.2
      ref_scores:
        db12: 2.0
    hs-bmk:
      version: v1.0
      weight: 1.0
      ref_scores:
        a: 1.0
        b: 4.0
  settings:
    name: HEPscoreTest
    reference_machine: unit-test
    registry: {registry}
    container_exec: {engine}
    method: geometric_mean
    repetitions: 3
    retries: 0
    continue_fail: {continue_fail}
"#
    );
    let loaded = load_str(&text).unwrap();
    validate(&loaded.document, &ValidationContext::new(None, available_cores())).unwrap()
}

fn profile() -> EngineProfile {
    EngineProfile {
        implementation: "singularity".to_string(),
        version: "3.11.4".to_string(),
    }
}

fn db12(score: f64) -> ScriptedRun {
    ScriptedRun::with_scores([("db12", score)])
}

fn hs() -> ScriptedRun {
    ScriptedRun::with_scores([("a", 2.0), ("b", 32.0)])
}

fn suite(cfg: ValidatedConfig, options: RunOptions, dir: &Path, launcher: Arc<ScriptedLauncher>) -> Hepscore {
    Hepscore::new(cfg, options, dir)
        .with_launcher(launcher as Arc<dyn ProcessLauncher>)
        .with_engine_profile(profile())
}

fn successful_launcher() -> Arc<ScriptedLauncher> {
    Arc::new(
        ScriptedLauncher::new()
            .script("db12-bmk", [db12(2.0), db12(4.0), db12(6.0)])
            .script("hs-bmk", [hs(), hs(), hs()]),
    )
}

#[tokio::test]
async fn test_successful_suite() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = successful_launcher();
    let outcome = suite(config(false), RunOptions::default(), tmp.path(), launcher.clone())
        .run()
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(launcher.run_launches(), 6);
    // median 2.0 for db12-bmk, 4.0 for hs-bmk
    assert_eq!(outcome.report.score(), Some(2.8284));
    assert_eq!(outcome.report.status(), Some(Status::Success));
    assert!(outcome.report.error().is_none());

    let doc = outcome.report.to_document().unwrap();
    assert_eq!(doc["status"], "success");
    assert_eq!(doc["settings"]["replay"], false);
    assert_eq!(doc["app_info"]["config_hash"].as_str().unwrap().len(), 64);
    assert_eq!(doc["app_info"]["hepscore_ver"], hepscore_core::VERSION);
    assert_eq!(doc["environment"]["singularity_version"], "3.11.4");
    assert!(doc["environment"]["end_at"].is_string());

    let db12_doc = &doc["benchmarks"]["db12-bmk"];
    assert_eq!(db12_doc["weight"], 1.0);
    assert!(db12_doc.get("ref_scores").is_none());
    assert_eq!(db12_doc["run0"]["exit_status"], 0);
    assert_eq!(db12_doc["run1"]["report"]["wl-scores"]["db12"], 4.0);
    assert_eq!(db12_doc["app"]["name"], "scripted");
    assert_eq!(doc["wl-scores"]["db12-bmk"]["db12"], 4.0);
    assert_eq!(doc["wl-scores"]["db12-bmk"]["db12_ref"], 2.0);
    assert_eq!(doc["wl-scores"]["hs-bmk"]["b"], 32.0);

    // container output of every run lands in the suite log next to the report
    let suite_log = std::fs::read_to_string(tmp.path().join("HEPscoreTest.log")).unwrap();
    assert_eq!(suite_log.lines().count(), 6);

    // shared directories are removed once empty
    assert!(!tmp.path().join("tmp").exists());
    assert!(!tmp.path().join("unpack").exists());

    let power: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join(POWER_FILE)).unwrap()).unwrap();
    assert_eq!(power["scores"].as_array().unwrap().len(), 6);
    assert_eq!(power["score"][0], 2.8284);
    assert!(power["benchtime"]["hs-bmkrun2start"].is_f64());
}

#[tokio::test]
async fn test_failure_aborts_suite_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .script("db12-bmk", [ScriptedRun::Exit(1)])
            .script("hs-bmk", [hs(), hs(), hs()]),
    );
    let outcome = suite(config(false), RunOptions::default(), tmp.path(), launcher.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.status, -1);
    assert_eq!(launcher.run_launches(), 1);
    assert_eq!(outcome.report.score(), Some(-1.0));
    assert_eq!(outcome.report.error(), Some("db12-bmk"));

    let doc = outcome.report.to_document().unwrap();
    assert_eq!(doc["status"], "failed");
    assert_eq!(doc["error"], "db12-bmk");
    assert!(doc["benchmarks"]["db12-bmk"].get("weight").is_none());
    assert!(doc["benchmarks"]["hs-bmk"].get("run0").is_none());
    assert!(doc["wl-scores"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_continue_fail_runs_remaining_benchmarks() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .script("db12-bmk", [ScriptedRun::Exit(1)])
            .script("hs-bmk", [hs(), hs(), hs()]),
    );
    let outcome = suite(config(true), RunOptions::default(), tmp.path(), launcher.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(launcher.run_launches(), 4);
    assert_eq!(outcome.status, -1);
    assert_eq!(outcome.report.error(), Some("db12-bmk"));

    let doc = outcome.report.to_document().unwrap();
    assert_eq!(doc["score"], -1.0);
    assert_eq!(doc["benchmarks"]["db12-bmk"]["weight"], 1.0);
    assert_eq!(doc["wl-scores"]["hs-bmk"]["a"], 2.0);
    assert!(doc["wl-scores"].get("db12-bmk").is_none());
}

#[tokio::test]
async fn test_results_dir_must_be_empty() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("leftover"), "x").unwrap();
    let err = suite(config(false), RunOptions::default(), tmp.path(), successful_launcher())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, HepscoreError::ResultsDirNotEmpty(_)));
}

#[tokio::test]
async fn test_replay_reuses_prior_results() {
    let tmp = tempfile::tempdir().unwrap();
    let first = suite(config(false), RunOptions::default(), tmp.path(), successful_launcher())
        .run()
        .await
        .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let options = RunOptions {
        replay: true,
        ..RunOptions::default()
    };
    let replayed = suite(config(false), options, tmp.path(), launcher.clone())
        .run()
        .await
        .unwrap();

    assert!(launcher.invocations().is_empty());
    assert_eq!(replayed.report.score(), first.report.score());
    assert_eq!(replayed.report.config_hash(), first.report.config_hash());
    let doc = replayed.report.to_document().unwrap();
    assert_eq!(doc["settings"]["replay"], true);
}

#[tokio::test]
async fn test_report_files() {
    let tmp = tempfile::tempdir().unwrap();
    let outcome = suite(config(false), RunOptions::default(), tmp.path(), successful_launcher())
        .run()
        .await
        .unwrap();

    let json_path = outcome.report.default_path(tmp.path(), OutputFormat::Json);
    assert!(json_path.ends_with("HEPscoreTest.json"));
    outcome.report.write(OutputFormat::Json, &json_path).await.unwrap();
    let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(doc["score"], 2.8284);

    let yaml_path = tmp.path().join("report.yaml");
    outcome.report.write(OutputFormat::Yaml, &yaml_path).await.unwrap();
    let yaml = std::fs::read_to_string(&yaml_path).unwrap();
    assert!(yaml.starts_with("hepscore:"));

    let missing = tmp.path().join("no/such/dir/report.json");
    let err = outcome.report.write(OutputFormat::Json, &missing).await.unwrap_err();
    assert!(matches!(err, HepscoreError::Output { .. }));
}

#[tokio::test]
async fn test_docker_suite_removes_shared_tmp() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config_for("docker://gitlab-registry.cern.ch/hep-workloads", "docker", false);
    let launcher = successful_launcher();
    let outcome = Hepscore::new(cfg, RunOptions::default(), tmp.path())
        .with_launcher(launcher.clone() as Arc<dyn ProcessLauncher>)
        .with_engine_profile(EngineProfile {
            implementation: "docker".to_string(),
            version: "24.0.7".to_string(),
        })
        .run()
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert!(launcher.invocations().iter().all(|inv| inv.program == "docker"));
    assert!(!tmp.path().join("tmp").exists());
    assert!(!tmp.path().join("unpack").exists());
}
