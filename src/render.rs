use chrono::Utc;
use log::info;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::anomaly::AnomalyMap;
use crate::error::{MetricsError, Result};
use crate::models::{MetricsReport, PacketType, RunSummary, Timestamp};

/// Libellés dont la valeur est un compte entier
const COUNT_LABELS: [&str; 4] = ["Captured Packets", "Retransmissions", "RTT Samples", "Latency Count"];

/// Une métrique libellée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
}

impl MetricEntry {
    pub fn is_count(&self) -> bool {
        COUNT_LABELS.contains(&self.name.as_str())
    }
}

/// Tableau final : métriques libellées par protocole et échecs de finalisation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    pub metrics: BTreeMap<PacketType, Vec<MetricEntry>>,
    pub failures: BTreeMap<PacketType, String>,
    pub summary: RunSummary,
}

impl MetricsTable {
    pub fn from_report(report: &MetricsReport) -> Self {
        let metrics = report
            .snapshots
            .iter()
            .map(|(protocol, snapshot)| {
                let entries = snapshot
                    .labeled()
                    .into_iter()
                    .map(|(name, value)| MetricEntry {
                        name: name.to_string(),
                        value,
                    })
                    .collect();
                (*protocol, entries)
            })
            .collect();

        Self {
            metrics,
            failures: report.failures.clone(),
            summary: report.summary.clone(),
        }
    }

    pub fn get(&self, protocol: PacketType, name: &str) -> Option<f64> {
        self.metrics
            .get(&protocol)?
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value)
    }
}

/// Ce qu'un puits de rendu a reçu, horodaté
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub generated_at: Timestamp,
    pub table: MetricsTable,
    pub anomalies: Option<AnomalyMap>,
}

impl RenderedReport {
    pub fn new(table: &MetricsTable, anomalies: Option<&AnomalyMap>) -> Self {
        Self {
            generated_at: Utc::now(),
            table: table.clone(),
            anomalies: anomalies.cloned(),
        }
    }
}

/// Puits de rendu du tableau de métriques final
pub trait RenderSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn render(&self, table: &MetricsTable, anomalies: Option<&AnomalyMap>) -> Result<()>;
}

/// Affichage texte sur la sortie standard
#[derive(Debug, Default)]
pub struct TerminalRenderer;

impl RenderSink for TerminalRenderer {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn render(&self, table: &MetricsTable, anomalies: Option<&AnomalyMap>) -> Result<()> {
        print!("{}", format_table(table, anomalies));
        Ok(())
    }
}

fn format_value(entry: &MetricEntry) -> String {
    if entry.is_count() && entry.value >= 0.0 {
        (entry.value as u64).to_formatted_string(&Locale::fr)
    } else {
        entry.value.to_string()
    }
}

/// Rendu texte du tableau, un bloc par protocole
pub fn format_table(table: &MetricsTable, anomalies: Option<&AnomalyMap>) -> String {
    let mut out = String::new();
    let summary = &table.summary;

    let _ = writeln!(out, "\n=== MÉTRIQUES DU TRAFIC ===");
    let _ = writeln!(
        out,
        "Événements lus: {} | classifiés: {} | ignorés: {}",
        summary.events_read.to_formatted_string(&Locale::fr),
        summary.records_classified.to_formatted_string(&Locale::fr),
        summary.skipped().to_formatted_string(&Locale::fr)
    );

    for (protocol, entries) in &table.metrics {
        let _ = writeln!(out, "\n{} Metrics:", protocol);
        for entry in entries {
            let _ = writeln!(out, "  {}: {}", entry.name, format_value(entry));
        }
    }

    for (protocol, reason) in &table.failures {
        let _ = writeln!(out, "\n{} Metrics: indisponibles ({})", protocol, reason);
    }

    if let Some(anomalies) = anomalies {
        for (series, set) in anomalies {
            let _ = writeln!(
                out,
                "\nAnomalies {} (seuil {}, moyenne {:.2}, écart-type {:.2}): {}",
                series,
                set.threshold,
                set.mean,
                set.std_dev,
                if set.is_empty() {
                    "aucune".to_string()
                } else {
                    format!("{:?}", set.values)
                }
            );
        }
    }

    let _ = writeln!(out, "===========================");
    out
}

/// Écrit le rapport au format JSON
#[derive(Debug, Clone)]
pub struct JsonFileRenderer {
    path: PathBuf,
}

impl JsonFileRenderer {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RenderSink for JsonFileRenderer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn render(&self, table: &MetricsTable, anomalies: Option<&AnomalyMap>) -> Result<()> {
        let report = RenderedReport::new(table, anomalies);
        let json = serde_json::to_string_pretty(&report).map_err(|e| MetricsError::sink("json", e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| MetricsError::sink("json", format!("{}: {}", parent.display(), e)))?;
            }
        }
        fs::write(&self.path, json)
            .map_err(|e| MetricsError::sink("json", format!("{}: {}", self.path.display(), e)))?;

        info!("Rapport écrit dans {}", self.path.display());
        Ok(())
    }
}

/// Dernier rapport rendu, partagé avec l'API HTTP
#[derive(Debug, Clone, Default)]
pub struct SharedReportRenderer {
    latest: Arc<RwLock<Option<RenderedReport>>>,
}

impl SharedReportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<RenderedReport> {
        self.latest.read().ok().and_then(|guard| guard.clone())
    }
}

impl RenderSink for SharedReportRenderer {
    fn name(&self) -> &'static str {
        "partagé"
    }

    fn render(&self, table: &MetricsTable, anomalies: Option<&AnomalyMap>) -> Result<()> {
        let mut guard = self
            .latest
            .write()
            .map_err(|_| MetricsError::sink("partagé", "verrou empoisonné"))?;
        *guard = Some(RenderedReport::new(table, anomalies));
        Ok(())
    }
}
