mod common;

use std::fs;

use physigym::{io::Artifact, prelude::*};

fn harness(dir: &std::path::Path, cfg: DriftConfig) -> DriftHarness<ToySimulation, DrugDoseModel> {
    DriftHarness::new(cfg.with_plot(false), common::make_env(dir))
}

#[test]
fn fixed_seed_and_dose_replay_without_drift() {
    let dir = common::workdir(300.0, 16);
    let report = harness(dir.path(), DriftConfig::default()).run().unwrap();

    assert!(report.is_clean(), "{report}");
    assert_eq!(report.episodes.len(), 3);
    assert!(report.episodes.iter().all(|e| e.steps == report.episodes[0].steps));
    assert!(report.episodes.iter().all(|e| e.final_reward == report.episodes[0].final_reward));

    // Every table digests identically to its episode 0 counterpart.
    for kind in [TableKind::Cell, TableKind::Conc] {
        let digests: Vec<_> = report
            .tables
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.digest.as_str())
            .collect();
        assert_eq!(digests.len(), 3);
        assert!(digests.iter().all(|d| *d == digests[0]), "{kind}: {digests:?}");
    }
}

#[test]
fn random_dose_policy_is_reproducible_too() {
    let dir = common::workdir(240.0, 16);
    let cfg = DriftConfig::default()
        .with_episodes(2)
        .with_seed(11)
        .with_dose(DosePolicy::Random);
    let report = harness(dir.path(), cfg).run().unwrap();
    assert!(report.is_clean(), "{report}");
}

#[test]
fn artifacts_are_written_per_episode() {
    let dir = common::workdir(180.0, 8);
    let cfg = DriftConfig::default().with_episodes(2);
    harness(dir.path(), cfg).run().unwrap();

    let workdir = dir.path();
    for episode in 0..2 {
        assert!(Artifact::OutputDir.path(workdir, "output", episode).is_dir());
        for artifact in [Artifact::CellTable, Artifact::ConcTable] {
            let path = artifact.path(workdir, "output", episode);
            let header = fs::read_to_string(&path).unwrap();
            assert!(header.starts_with("index,"), "{}", path.display());
            assert!(!header.lines().next().unwrap().contains("runtime"));
        }
    }
    assert!(!Artifact::OutputDir.path(workdir, "output", 2).exists());
    assert!(workdir.join("output").is_dir());
}

#[test]
fn stale_artifacts_are_removed_before_a_run() {
    let dir = common::workdir(120.0, 8);
    let workdir = dir.path();
    fs::create_dir_all(Artifact::OutputDir.path(workdir, "output", 7)).unwrap();
    fs::write(Artifact::CellTable.path(workdir, "output", 7), "index,ID\n0,1\n").unwrap();

    let cfg = DriftConfig::default().with_episodes(1);
    let report = harness(workdir, cfg).run().unwrap();

    assert_eq!(report.removed_artifacts, 2);
    assert!(!Artifact::OutputDir.path(workdir, "output", 7).exists());
    assert!(report.is_clean(), "{report}");
}

#[test]
fn tampered_table_is_reported_as_drift() {
    let dir = common::workdir(180.0, 8);
    let workdir = dir.path();
    let cfg = DriftConfig::default().with_episodes(2);
    harness(workdir, cfg).run().unwrap();

    let path = Artifact::ConcTable.path(workdir, "output", 1);
    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    lines.truncate(lines.len() - 1);
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let tables = physigym::drift::diff::load_tables(TableKind::Conc, workdir, "output").unwrap();
    let findings = physigym::drift::diff::diff_tables(TableKind::Conc, &tables);
    assert!(matches!(
        findings.as_slice(),
        [DriftFinding::NotIdenticallyLabeled { episode: 1, .. }]
    ));
}
