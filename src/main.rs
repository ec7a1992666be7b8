mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cli::{AnalyzeArgs, Cli, Command};
use zmetrics::api::{self, ApiState};
use zmetrics::capture::{open_source, SyntheticConfig, SyntheticTraffic};
use zmetrics::config::{Config, CONFIG_FILE};
use zmetrics::logger::{init_logging, RecordLogger};
use zmetrics::persistence::{PersistenceSink, RecordFilter, SqliteStore};
use zmetrics::pipeline::{Pipeline, RunOutcome};
use zmetrics::render::{JsonFileRenderer, SharedReportRenderer, TerminalRenderer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_logging(config.log_mode, &config.log_level);

    match cli.command {
        Command::Analyze { args, json } => {
            let outcome = analyze(config, &args, !json, None).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.report)?);
            }
            report_sink_errors(&outcome);
            Ok(())
        }
        Command::Query {
            db,
            protocol,
            min_length,
            max_length,
        } => {
            let path = db.unwrap_or_else(|| PathBuf::from(&config.database_path));
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Impossible d'ouvrir la base {}", path.display()))?;
            let rows = store.query(&RecordFilter {
                protocol,
                min_length,
                max_length,
            })?;

            if rows.is_empty() {
                println!("Aucun enregistrement pour ces critères.");
            } else {
                for row in &rows {
                    println!("{}", row);
                }
                println!("\n{} enregistrements trouvés.", rows.len());
            }
            Ok(())
        }
        Command::InitDb { db } => {
            let path = db.unwrap_or_else(|| PathBuf::from(&config.database_path));
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Impossible d'initialiser la base {}", path.display()))?;
            println!(
                "Base {} prête ({} enregistrements).",
                store.location(),
                store.count()?
            );
            Ok(())
        }
        Command::Simulate { output, count, seed } => simulate(&output, count, seed),
        Command::Serve { args, addr } => {
            let shared = SharedReportRenderer::new();
            let outcome = analyze(config.clone(), &args, true, Some(shared.clone())).await?;
            report_sink_errors(&outcome);

            let store: Option<Arc<dyn PersistenceSink>> = if args.no_db {
                None
            } else {
                let path = args.db.clone().unwrap_or_else(|| PathBuf::from(&config.database_path));
                Some(Arc::new(SqliteStore::open(&path)?))
            };

            api::serve(addr, ApiState::new(shared, store)).await?;
            Ok(())
        }
    }
}

/// Fichier explicite (créé s'il manque), sinon le fichier système s'il existe, sinon les défauts
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None if Path::new(CONFIG_FILE).exists() => Config::load(),
        None => Ok(Config::default()),
    }
}

/// Applique les options de la ligne de commande puis exécute le pipeline
async fn analyze(
    mut config: Config,
    args: &AnalyzeArgs,
    print_table: bool,
    shared: Option<SharedReportRenderer>,
) -> Result<RunOutcome> {
    if let Some(sent) = args.sent_packets {
        config.sent_packets = Some(sent);
    }
    if let Some(threshold) = args.threshold {
        config.z_score_threshold = threshold;
    }
    if args.parallel {
        config.parallel_accumulation = true;
    }
    if let Some(report) = &args.report {
        config.report_file = Some(report.display().to_string());
    }
    if let Some(db) = &args.db {
        config.database_path = db.display().to_string();
    }
    config.validate()?;

    if config.sent_packets.is_none() {
        warn!("sent_packets non défini : la perte UDP ne pourra pas être calculée");
    }

    let mut pipeline = Pipeline::new(config.clone());

    if !args.no_db {
        let store = SqliteStore::open(&config.database_path)
            .with_context(|| format!("Impossible d'ouvrir la base {}", config.database_path))?;
        pipeline = pipeline.with_persistence(Arc::new(store));
    }
    if let Some(path) = &config.record_log_file {
        pipeline = pipeline.with_record_logger(Arc::new(RecordLogger::new(path.clone())));
    }
    if print_table {
        pipeline = pipeline.with_renderer(Arc::new(TerminalRenderer));
    }
    if let Some(path) = &config.report_file {
        pipeline = pipeline.with_renderer(Arc::new(JsonFileRenderer::new(path)));
    }
    if let Some(shared) = shared {
        pipeline = pipeline.with_renderer(Arc::new(shared));
    }

    let source = open_source(&args.input, args.format)?;
    let outcome = pipeline.run(source).await?;
    Ok(outcome)
}

fn report_sink_errors(outcome: &RunOutcome) {
    for error in &outcome.sink_errors {
        eprintln!("AVERTISSEMENT: {}", error);
    }
}

fn simulate(output: &Path, count: u64, seed: u64) -> Result<()> {
    let file = File::create(output)
        .with_context(|| format!("Impossible de créer {}", output.display()))?;
    let mut writer = BufWriter::new(file);

    let generator = SyntheticTraffic::new(SyntheticConfig {
        packet_count: count,
        seed,
        ..Default::default()
    });

    let mut udp_sent = 0u64;
    for event in generator {
        if event.has_layer("udp") {
            udp_sent += 1;
        }
        serde_json::to_writer(&mut writer, &event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!("{} événements écrits dans {}", count, output.display());
    println!(
        "{} événements écrits dans {} dont {} paquets UDP (à passer en --sent-packets).",
        count,
        output.display(),
        udp_sent
    );
    Ok(())
}
