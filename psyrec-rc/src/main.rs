//! psyrec-rc - questionnaire event reconciliation batch tool
//!
//! Loads settings and the PSC1/PSC2 crosswalk, reads one JSON-lines export
//! per instrument, reconciles every subject and writes a JSON report.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use psyrec_common::config::ConfigResolver;
use psyrec_common::logging::init_tracing;
use psyrec_rc::deidentify::{DeidentifiedSubject, Deidentifier};
use psyrec_rc::statistics::BatchStatistics;
use psyrec_rc::types::RawRow;
use psyrec_rc::{BatchReconciler, BatchReport, Crosswalk, InstrumentInput, ReconcileSettings};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "psyrec-rc")]
#[command(about = "Reconcile Psytools questionnaire exports into canonical subject records")]
#[command(version)]
struct Args {
    /// Settings file (overrides PSYREC_CONFIG and default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Crosswalk file (overrides the settings file)
    #[arg(long)]
    crosswalk: Option<PathBuf>,

    /// Report file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of reconciliation workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Re-key subjects to secondary codes and replace dates by ages in days
    #[arg(long)]
    deidentify: bool,
}

/// Report with subjects re-keyed to secondary codes
#[derive(Serialize)]
struct DeidentifiedReport<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    crosswalk_digest: Option<&'a str>,
    subjects: Vec<DeidentifiedSubject>,
    statistics: &'a BatchStatistics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = ConfigResolver::new("psyrec-rc");
    let config_path = resolver.resolve(args.config.as_deref());
    let mut settings: ReconcileSettings = resolver
        .load(args.config.as_deref())
        .context("Failed to load settings")?;
    settings.resolve_paths(config_path.as_ref().map(|(path, _)| path.as_path()));
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }

    init_tracing(&settings.logging).context("Failed to initialize logging")?;

    info!(
        "Starting psyrec-rc v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some((path, source)) => info!("Settings: {} ({})", path.display(), source),
        None => info!("Settings: compiled defaults"),
    }

    settings.validate().context("Invalid settings")?;

    let crosswalk_path = match args.crosswalk.or_else(|| settings.crosswalk.clone()) {
        Some(path) => path,
        None => bail!("No crosswalk file configured (use --crosswalk or the 'crosswalk' setting)"),
    };
    let crosswalk = Crosswalk::load(&crosswalk_path)
        .with_context(|| format!("Failed to load crosswalk {}", crosswalk_path.display()))?;
    let crosswalk = Arc::new(crosswalk);

    let mut inputs = Vec::new();
    for spec in &settings.instruments {
        match &spec.events {
            Some(path) => {
                let rows = read_rows(path)?;
                info!(instrument = %spec.name, rows = rows.len(), "Read {}", path.display());
                inputs.push(InstrumentInput {
                    spec: spec.clone(),
                    rows,
                });
            }
            None => warn!(instrument = %spec.name, "No events file configured; skipping"),
        }
    }

    let cancel_token = CancellationToken::new();
    let interrupt_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; waiting for submitted batches");
            interrupt_token.cancel();
        }
    });

    let deidentify_fact = settings.deidentify.date_of_birth_fact.clone();
    let reconciler = BatchReconciler::new(Arc::clone(&crosswalk), Arc::new(settings));
    let report = reconciler
        .run(inputs, cancel_token)
        .await
        .context("Reconciliation failed")?;

    if args.deidentify {
        let deidentifier = Deidentifier::new(Arc::clone(&crosswalk), deidentify_fact);
        let subjects = report
            .subjects
            .iter()
            .filter_map(|subject| match deidentifier.deidentify(subject) {
                Ok(deidentified) => Some(deidentified),
                Err(e) => {
                    error!("Cannot de-identify {}: {}", subject.subject, e);
                    None
                }
            })
            .collect();
        write_report(
            args.output.as_deref(),
            &DeidentifiedReport {
                run_id: report.run_id,
                started_at: report.started_at,
                finished_at: report.finished_at,
                crosswalk_digest: report.crosswalk_digest.as_deref(),
                subjects,
                statistics: &report.statistics,
            },
        )?;
    } else {
        write_report::<BatchReport>(args.output.as_deref(), &report)?;
    }

    info!("Done: {}", report.statistics.display_string());
    Ok(())
}

/// Read a JSON-lines export, one raw row per line
fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: RawRow = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid row", path.display(), index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

fn write_report<T: Serialize>(output: Option<&Path>, report: &T) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, report)?;
            writer.flush()?;
            info!("Report written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, report)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
