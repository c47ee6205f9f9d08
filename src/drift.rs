//! Replay harness: run the same seeded episode several times and diff the
//! resulting time-series tables against the first run.
//!
//! Findings are diagnostics, not errors. Only I/O, configuration and
//! simulation failures abort a run.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::DataFrame;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{info, warn};

use crate::{
    error::{EnvError, PhysiGymResult},
    gym::{Env, action::Action, env::PhysiCellEnv},
    io::{self, Artifact, polars_err},
    model::Model,
    render::raster::{self, LinePanel},
    sim::Simulation,
    timeseries::TimeSeries,
};

pub mod diff;

pub use diff::{DriftFinding, TableKind};

/// Size of the per-episode summary plot, `figsize = (8, 12)` at 100 dpi.
const PLOT_SIZE: (u32, u32) = (800, 1200);

/// How the harness picks the dose of every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DosePolicy {
    Fixed(f64),
    /// Uniform in `[0, 1)` from the harness RNG, reseeded every episode.
    Random,
}

impl Default for DosePolicy {
    fn default() -> Self {
        Self::Fixed(0.01)
    }
}

impl fmt::Display for DosePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(dose) => write!(f, "fixed {dose}"),
            Self::Random => f.write_str("random"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftConfig {
    episodes: u32,
    seed: u64,
    dose: DosePolicy,
    /// Render `timeseries_plot_episode###.png` next to the tables.
    plot: bool,
    /// Action field the dose is written to.
    dose_label: String,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            episodes: 3,
            seed: 0,
            dose: DosePolicy::default(),
            plot: true,
            dose_label: "drug_dose".to_string(),
        }
    }
}

impl DriftConfig {
    pub fn with_episodes(self, episodes: u32) -> Self {
        Self { episodes, ..self }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }

    pub fn with_dose(self, dose: DosePolicy) -> Self {
        Self { dose, ..self }
    }

    pub fn with_plot(self, plot: bool) -> Self {
        Self { plot, ..self }
    }

    pub fn with_dose_label(self, label: impl Into<String>) -> Self {
        Self {
            dose_label: label.into(),
            ..self
        }
    }

    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn dose(&self) -> DosePolicy {
        self.dose
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: u32,
    pub steps: u64,
    pub final_reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDigest {
    pub kind: TableKind,
    pub episode: u32,
    pub path: PathBuf,
    /// blake3, hex.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub episodes: Vec<EpisodeSummary>,
    pub tables: Vec<TableDigest>,
    pub findings: Vec<DriftFinding>,
    /// Stale artifacts deleted before the run.
    pub removed_artifacts: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn findings_for(&self, kind: TableKind) -> impl Iterator<Item = &DriftFinding> {
        self.findings.iter().filter(move |f| f.kind() == kind)
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ep in &self.episodes {
            writeln!(
                f,
                "episode {:03}: {} steps\treward: {}\tterminated: {}\ttruncated: {}\t({})",
                ep.episode,
                ep.steps,
                ep.final_reward,
                ep.terminated,
                ep.truncated,
                humantime::format_duration(Duration::from_millis(ep.elapsed.as_millis() as u64))
            )?;
        }
        for table in &self.tables {
            writeln!(
                f,
                "{} episode {:03}: {}",
                table.kind,
                table.episode,
                table.digest
            )?;
        }
        for kind in TableKind::iter() {
            for episode in self.episodes.iter().map(|e| e.episode) {
                writeln!(f, "processing: {kind} episode {episode}")?;
                for finding in self.findings_for(kind).filter(|x| x.episode() == episode) {
                    writeln!(f, "\t{finding}")?;
                }
            }
        }
        Ok(())
    }
}

/// Drives a single environment through repeated seeded episodes.
pub struct DriftHarness<S, M> {
    cfg: DriftConfig,
    env: PhysiCellEnv<S, M>,
}

impl<S: Simulation, M: Model> DriftHarness<S, M> {
    pub fn new(cfg: DriftConfig, env: PhysiCellEnv<S, M>) -> Self {
        Self { cfg, env }
    }

    #[tracing::instrument(skip_all)]
    pub fn run(mut self) -> PhysiGymResult<DriftReport> {
        let workdir = self.env.config().workdir().to_path_buf();
        let output = self.env.settings().save_folder.clone();
        let output_dir = workdir.join(&output);

        let removed_artifacts = io::remove_artifacts(&workdir, &output)?;
        io::recreate_dir(&output_dir)?;
        info!(
            episodes = self.cfg.episodes,
            seed = self.cfg.seed,
            dose = %self.cfg.dose,
            removed_artifacts,
            "Drift run starting"
        );

        let mut episodes = Vec::with_capacity(self.cfg.episodes as usize);
        for episode in 0..self.cfg.episodes {
            let summary = self.run_episode(episode)?;
            io::archive_dir(&output_dir, Artifact::OutputDir.path(&workdir, &output, episode))?;
            episodes.push(summary);
        }
        self.env.close()?;

        let tables = self.persist_tables(&workdir, &output)?;

        let mut findings = Vec::new();
        for kind in TableKind::iter() {
            let loaded = diff::load_tables(kind, &workdir, &output)?;
            findings.extend(diff::diff_tables(kind, &loaded));
        }
        if findings.is_empty() {
            info!("No drift detected");
        } else {
            warn!(findings = findings.len(), "Drift detected");
        }

        Ok(DriftReport {
            episodes,
            tables,
            findings,
            removed_artifacts,
        })
    }

    fn run_episode(&mut self, episode: u32) -> PhysiGymResult<EpisodeSummary> {
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        self.env.reset(Some(self.cfg.seed))?;

        let mut steps = 0;
        loop {
            let dose = match self.cfg.dose {
                DosePolicy::Fixed(dose) => dose,
                DosePolicy::Random => rng.random::<f64>(),
            };
            let action = Action::new().with_scalar(self.cfg.dose_label.as_str(), dose);
            let step = self.env.step(action)?;
            steps += 1;

            let c = self.env.counters();
            info!(
                step_env = c.step_env,
                episode = c.episode,
                step_episode = c.step_episode,
                over = step.is_terminal(),
                terminated = step.terminated,
                truncated = step.truncated,
                "dt_gym env step"
            );

            if step.is_terminal() {
                return Ok(EpisodeSummary {
                    episode,
                    steps,
                    final_reward: f64::from(step.reward),
                    terminated: step.terminated,
                    truncated: step.truncated,
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    /// Loads every archived output folder and writes its tables and plot.
    fn persist_tables(&self, workdir: &Path, output: &str) -> PhysiGymResult<Vec<TableDigest>> {
        let archives = Artifact::OutputDir.scan(workdir, output)?;
        let pb = progress_bar(archives.len() as u64)?;
        pb.set_message("Processing episodes...");

        let mut digests = Vec::with_capacity(archives.len() * 2);
        for (episode, dir) in archives {
            info!(path = %dir.display(), "processing");
            let ts = TimeSeries::load(&dir)?;

            for (kind, df) in [
                (TableKind::Cell, ts.get_cell_df()),
                (TableKind::Conc, ts.get_conc_df()),
            ] {
                let path = kind.artifact().path(workdir, output, episode);
                write_indexed(df, &path)?;
                digests.push(TableDigest {
                    kind,
                    episode,
                    digest: io::file_digest(&path)?,
                    path,
                });
            }

            if self.cfg.plot {
                let path = Artifact::Plot.path(workdir, output, episode);
                if let Err(e) = self.plot(&ts, episode, &path) {
                    warn!(error = %e, path = %path.display(), "Time-series plot skipped");
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("Tables written.");
        Ok(digests)
    }

    fn plot(&self, ts: &TimeSeries, episode: u32, path: &Path) -> PhysiGymResult<()> {
        let substrate = self
            .env
            .settings()
            .substrates
            .first()
            .cloned()
            .unwrap_or_else(|| "drug".to_string());

        let panels = vec![
            LinePanel {
                title: "cell_type".to_string(),
                ylabel: "cell count".to_string(),
                series: ts.plot_timeseries("cell_type", None)?,
            },
            LinePanel {
                title: format!("cell_type {substrate}"),
                ylabel: substrate.clone(),
                series: ts.plot_timeseries("cell_type", Some(substrate.as_str()))?,
            },
            LinePanel {
                title: "cell_type death_rates_0".to_string(),
                ylabel: "death_rates_0".to_string(),
                series: ts.plot_timeseries("cell_type", Some("death_rates_0"))?,
            },
        ];
        raster::save_line_panels(
            path,
            PLOT_SIZE,
            &format!("timeseries episode {}", io::episode_tag(episode)),
            &panels,
        )
    }
}

/// Writes `df` with a leading row label column.
fn write_indexed(df: &DataFrame, path: &Path) -> PhysiGymResult<()> {
    let mut indexed = df
        .with_row_index(diff::INDEX_COL.into(), None)
        .map_err(|e| polars_err("Failed to add row index", e))?;
    io::write_csv(&mut indexed, path)
}

fn progress_bar(capacity: u64) -> PhysiGymResult<ProgressBar> {
    let bar = ProgressBar::new(capacity);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta_precise}) {msg}")
            .map_err(EnvError::ProgressBar)?
            .progress_chars("#>-"));
    Ok(bar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = DriftConfig::default();
        assert_eq!(cfg.episodes(), 3);
        assert_eq!(cfg.seed(), 0);
        assert_eq!(cfg.dose(), DosePolicy::Fixed(0.01));
    }

    #[test]
    fn test_dose_policy_serde() {
        let json = serde_json::to_string(&DosePolicy::Random).unwrap();
        assert_eq!(json, "\"random\"");
        let back: DosePolicy = serde_json::from_str(r#"{"fixed":0.5}"#).unwrap();
        assert_eq!(back, DosePolicy::Fixed(0.5));
    }

    #[test]
    fn test_write_indexed_prepends_row_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let df = polars::df!("drug" => &[0.1, 0.2]).unwrap();

        write_indexed(&df, &path).unwrap();
        let back = io::read_csv(&path).unwrap();
        assert_eq!(back.get_column_names_str(), vec![diff::INDEX_COL, "drug"]);
    }

    #[test]
    fn test_report_lists_findings_per_episode() {
        let report = DriftReport {
            episodes: vec![EpisodeSummary {
                episode: 1,
                steps: 24,
                final_reward: 0.5,
                terminated: false,
                truncated: true,
                elapsed: Duration::from_millis(1500),
            }],
            tables: Vec::new(),
            findings: vec![DriftFinding::ColumnMismatch {
                kind: TableKind::Cell,
                episode: 1,
                column: "x".to_string(),
            }],
            removed_artifacts: 0,
        };
        assert!(!report.is_clean());
        let text = report.to_string();
        assert!(text.contains("episode 001: 24 steps"), "{text}");
        assert!(text.contains("1s 500ms"), "{text}");
        assert!(text.contains("\tcell episode: 1\tcolumn: x"), "{text}");
    }
}
