//! Runs the same seeded episode several times and reports every column of
//! the persisted time-series tables that differs from the first episode.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use physigym::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "drift_gym", version, about)]
struct Cli {
    /// PhysiCell settings document, relative to the working directory.
    #[arg(long, default_value = "config/PhysiCell_settings.xml")]
    settings: PathBuf,

    /// Folder every output and drift artifact is written into.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    #[arg(long, default_value_t = 3)]
    episodes: u32,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Dose applied at every step.
    #[arg(long, default_value_t = 0.01, conflicts_with = "random_dose")]
    dose: f64,

    /// Draw a uniform dose per step from an RNG reseeded every episode.
    #[arg(long)]
    random_dose: bool,

    /// Skip the per-episode time-series plots.
    #[arg(long)]
    no_plot: bool,

    /// Emit JSON log lines instead of the human readable format.
    #[arg(long)]
    json_log: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_log);

    let cfg = EnvConfig::default()
        .with_settingxml(&cli.settings)
        .with_workdir(&cli.workdir)
        .without_render()
        .with_verbose(true);
    let settings = Settings::from_path(cfg.settingxml_path())
        .with_context(|| format!("Failed to read {}", cfg.settingxml_path().display()))?;
    let sim = ToySimulation::new(&settings, cli.workdir.join(&settings.save_folder));
    let env = PhysiCellEnv::with_settings(cfg, settings, sim, DrugDoseModel::default())
        .context("Failed to build environment")?;

    let dose = if cli.random_dose {
        DosePolicy::Random
    } else {
        DosePolicy::Fixed(cli.dose)
    };
    let drift = DriftConfig::default()
        .with_episodes(cli.episodes)
        .with_seed(cli.seed)
        .with_dose(dose)
        .with_plot(!cli.no_plot);

    let report = DriftHarness::new(drift, env)
        .run()
        .context("Drift run failed")?;

    println!("{report}");
    if report.is_clean() {
        println!("ok: every episode reproduces the baseline episode");
    } else {
        println!("drift: {} finding(s)", report.findings.len());
    }
    info!(clean = report.is_clean(), "finish");
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    if json {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}
