//! Image listing and archiving against a scripted engine.

use async_trait::async_trait;
use hepscore_archive::{ArchiveError, ArchiveStatus, ImageArchiver, ImageSet, ManifestClient, SIF_DIR};
use hepscore_core::{Invocation, OutputSink, ProcessLauncher};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const CONFIG: &str = r#"
hepscore:
  benchmarks:
    atlas-gen_sherpa-ma-bmk:
      version: v2.1
      ref_scores:
        gen: 322.4
    cms-reco-run3-ma-bmk:
      version: v1.2
      ref_scores:
        reco: 1.7
    .lhcb-sim-run3-ma-bmk:
      version: v1.1
  settings:
    name: HEPscore23
    registry:
      - docker://gitlab-registry.cern.ch/hep-benchmarks/hep-workloads
      - oras://registry.cern.ch/hep-workloads
"#;

/// Creates the file `singularity pull` would and appends names to the tarball.
#[derive(Default)]
struct FakeTools {
    commands: Mutex<Vec<String>>,
}

#[async_trait]
impl ProcessLauncher for FakeTools {
    async fn launch(&self, inv: &Invocation, _dir: &Path, _sink: &mut OutputSink) -> io::Result<i32> {
        self.commands.lock().unwrap().push(inv.program.clone());
        match inv.program.as_str() {
            "singularity" => {
                let dir = Path::new(&inv.args[2]);
                let name = inv.args[3].rsplit('/').next().unwrap().replace(':', "_");
                std::fs::write(dir.join(format!("{name}.sif")), "sif")?;
            }
            "tar" => {
                let mut tar = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&inv.args[1])?;
                writeln!(tar, "{}", inv.args[4])?;
            }
            _ => return Ok(127),
        }
        Ok(0)
    }
}

#[test]
fn test_image_list_skips_disabled_benchmarks() {
    let set = ImageSet::from_yaml(CONFIG, Some("x86_64")).unwrap();
    assert_eq!(
        set.images(),
        [
            "oras://registry.cern.ch/hep-workloads/atlas-gen_sherpa-ma-bmk:v2.1_x86_64",
            "oras://registry.cern.ch/hep-workloads/cms-reco-run3-ma-bmk:v1.2_x86_64",
        ]
    );
    assert_eq!(set.key(), format!("x86_64_{}", set.digest()));
}

#[test]
fn test_key_without_architecture_keeps_published_name() {
    let set = ImageSet::from_yaml(CONFIG, None).unwrap();
    assert_eq!(set.key(), format!("None_{}", set.digest()));
    assert_eq!(set.digest().len(), 64);
    assert!(set.images()[0].ends_with(":v2.1"));
    assert_ne!(set.digest(), ImageSet::from_yaml(CONFIG, Some("aarch64")).unwrap().digest());
}

#[tokio::test]
async fn test_unreachable_manifest_is_empty() {
    let client = ManifestClient::new("http://127.0.0.1:9/archives/");
    assert_eq!(client.url("k"), "http://127.0.0.1:9/archives/k/k.json");
    assert!(client.fetch("k").await.is_empty());
}

#[tokio::test]
async fn test_archive_builds_tarball_and_checksum() {
    let tmp = tempfile::tempdir().unwrap();
    let set = ImageSet::from_yaml(CONFIG, None).unwrap();
    let tools = Arc::new(FakeTools::default());
    let archiver = ImageArchiver::new(tmp.path()).with_launcher(tools.clone() as Arc<dyn ProcessLauncher>);

    let status = archiver.archive(&set).await.unwrap();
    let ArchiveStatus::Built { tarball, checksum } = status else {
        panic!("archive not built");
    };

    let key = set.key();
    let folder = archiver.archive_dir(&set);
    assert_eq!(tarball, folder.join(format!("{key}.tar")));
    let listed = std::fs::read_to_string(&tarball).unwrap();
    assert_eq!(listed.lines().collect::<Vec<_>>(), ["atlas-gen_sherpa-ma-bmk:v2.1", "cms-reco-run3-ma-bmk:v1.2"]);
    assert!(!folder.join(SIF_DIR).exists());

    let sums = std::fs::read_to_string(folder.join(format!("{key}_sha256sum.txt"))).unwrap();
    assert_eq!(sums.trim(), format!("{key}.tar {checksum}"));
    let manifest: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(folder.join(format!("{key}.json"))).unwrap()).unwrap();
    assert_eq!(manifest, set.images());
    assert_eq!(tools.commands.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_non_empty_archive_folder_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let set = ImageSet::from_yaml(CONFIG, None).unwrap();
    let archiver = ImageArchiver::new(tmp.path()).with_launcher(Arc::new(FakeTools::default()));
    let folder = archiver.archive_dir(&set);
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("stale.tar"), "x").unwrap();

    let err = archiver.archive(&set).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NotEmpty(_)));
}
