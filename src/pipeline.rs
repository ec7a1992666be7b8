//! Orchestrateur d'une exécution : capture -> classification -> accumulation
//! -> finalisation -> anomalies -> puits.
//!
//! La classification tourne dans une tâche bloquante et alimente une file
//! bornée ; l'accumulation consomme la file dans l'ordre de la capture.

use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::accumulators::{accumulator_for, Accumulator, FinalizeParams};
use crate::anomaly::ZScoreDetector;
use crate::capture::CaptureSource;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::{MetricsError, Result};
use crate::logger::RecordLogger;
use crate::models::{MetricsReport, PacketRecord, PacketType, RunSummary};
use crate::persistence::PersistenceSink;
use crate::render::{MetricsTable, RenderSink};

/// Série des longueurs de paquets, tous protocoles confondus
pub const PACKET_LENGTH_SERIES: &str = "packet_length";

/// Résultat d'une exécution complète. Les échecs de puits n'invalident pas le rapport.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: MetricsReport,
    pub sink_errors: Vec<MetricsError>,
}

/// Ce que le producteur a observé
struct ClassificationStats {
    events_read: u64,
    classifier: Classifier,
}

/// État de l'accumulation à l'épuisement de la file
///
/// Seules les longueurs sont conservées pour la détection d'anomalies ; les
/// enregistrements complets ne sont gardés que si un puits de persistance attend le lot.
#[derive(Default)]
struct Routed {
    accumulators: BTreeMap<PacketType, Box<dyn Accumulator>>,
    failures: BTreeMap<PacketType, String>,
    per_protocol: BTreeMap<PacketType, u64>,
    lengths: Vec<f64>,
    keep_batch: bool,
    batch: Vec<PacketRecord>,
}

impl Routed {
    fn new(keep_batch: bool) -> Self {
        Self {
            keep_batch,
            ..Default::default()
        }
    }

    fn note(&mut self, record: &PacketRecord) {
        *self.per_protocol.entry(record.protocol).or_insert(0) += 1;
        self.lengths.push(record.length as f64);
    }

    fn retain(&mut self, record: PacketRecord) {
        if self.keep_batch {
            self.batch.push(record);
        }
    }
}

pub struct Pipeline {
    config: Config,
    persistence: Option<Arc<dyn PersistenceSink>>,
    renderers: Vec<Arc<dyn RenderSink>>,
    record_logger: Option<Arc<RecordLogger>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            persistence: None,
            renderers: Vec::new(),
            record_logger: None,
        }
    }

    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn with_renderer(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.renderers.push(sink);
        self
    }

    pub fn with_record_logger(mut self, logger: Arc<RecordLogger>) -> Self {
        self.record_logger = Some(logger);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Exécute un passage complet sur `source`.
    ///
    /// Une source illisible fait échouer l'exécution entière, sans rapport
    /// partiel ni écriture dans les puits. Chaque exécution crée ses propres
    /// accumulateurs : une nouvelle source suffit pour relancer.
    ///
    /// La file bornée limite la lecture en avance, pas la mémoire totale : la
    /// série des longueurs grandit avec la capture et, si un puits de persistance
    /// est configuré, le lot complet est gardé jusqu'à la fin pour n'être écrit
    /// qu'après une lecture réussie.
    pub async fn run(&self, source: Box<dyn CaptureSource>) -> Result<RunOutcome> {
        let description = source.describe();
        info!("Analyse de {}", description);

        let (record_tx, mut record_rx) = mpsc::channel::<PacketRecord>(self.config.queue_size.max(1));
        let producer = tokio::task::spawn_blocking(move || classify_source(source, record_tx));

        let routed = if self.config.parallel_accumulation {
            self.consume_parallel(&mut record_rx).await
        } else {
            self.consume_sequential(&mut record_rx).await
        };

        let stats = producer
            .await
            .map_err(|e| MetricsError::SourceUnavailable(format!("{}: tâche de lecture interrompue ({})", description, e)))??;

        let report = self.assemble(routed.accumulators, routed.failures, routed.per_protocol, &routed.lengths, stats);
        info!(
            "{} enregistrements classifiés, {} ignorés",
            report.summary.records_classified,
            report.summary.skipped()
        );

        let sink_errors = self.deliver(&report, routed.batch).await;
        Ok(RunOutcome { report, sink_errors })
    }

    async fn consume_sequential(&self, record_rx: &mut mpsc::Receiver<PacketRecord>) -> Routed {
        let mut routed = Routed::new(self.persistence.is_some());

        while let Some(record) = record_rx.recv().await {
            routed.note(&record);
            if let Some(logger) = &self.record_logger {
                logger.log_record(&record);
            }

            if !routed.accumulators.contains_key(&record.protocol) {
                if let Some(accumulator) = accumulator_for(record.protocol, &self.config) {
                    routed.accumulators.insert(record.protocol, accumulator);
                }
            }
            if let Some(accumulator) = routed.accumulators.get_mut(&record.protocol) {
                accumulator.ingest(&record);
            }

            routed.retain(record);
        }

        routed
    }

    /// Une tâche par protocole : chaque accumulateur reçoit sa propre
    /// sous-séquence, dans l'ordre d'origine.
    async fn consume_parallel(&self, record_rx: &mut mpsc::Receiver<PacketRecord>) -> Routed {
        let mut routed = Routed::new(self.persistence.is_some());
        let mut senders: BTreeMap<PacketType, mpsc::Sender<PacketRecord>> = BTreeMap::new();
        let mut workers: Vec<(PacketType, JoinHandle<Box<dyn Accumulator>>)> = Vec::new();

        while let Some(record) = record_rx.recv().await {
            routed.note(&record);
            if let Some(logger) = &self.record_logger {
                logger.log_record(&record);
            }

            if !senders.contains_key(&record.protocol) {
                if let Some(mut accumulator) = accumulator_for(record.protocol, &self.config) {
                    let (tx, mut rx) = mpsc::channel::<PacketRecord>(self.config.queue_size.max(1));
                    let handle = tokio::spawn(async move {
                        while let Some(record) = rx.recv().await {
                            accumulator.ingest(&record);
                        }
                        accumulator
                    });
                    senders.insert(record.protocol, tx);
                    workers.push((record.protocol, handle));
                }
            }

            if let Some(sender) = senders.get(&record.protocol) {
                if sender.send(record.clone()).await.is_err() {
                    debug!("Tâche {} arrêtée, enregistrement non transmis", record.protocol);
                }
            }

            routed.retain(record);
        }

        // Fermer les files pour terminer les tâches
        drop(senders);

        let (protocols, handles): (Vec<_>, Vec<_>) = workers.into_iter().unzip();
        for (protocol, joined) in protocols.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(accumulator) => {
                    routed.accumulators.insert(protocol, accumulator);
                }
                Err(e) => {
                    error!("Tâche d'accumulation {} interrompue: {}", protocol, e);
                    routed
                        .failures
                        .insert(protocol, format!("tâche d'accumulation interrompue: {}", e));
                }
            }
        }

        routed
    }

    fn assemble(
        &self,
        accumulators: BTreeMap<PacketType, Box<dyn Accumulator>>,
        mut failures: BTreeMap<PacketType, String>,
        per_protocol: BTreeMap<PacketType, u64>,
        lengths: &[f64],
        stats: ClassificationStats,
    ) -> MetricsReport {
        let params = FinalizeParams::from_config(&self.config);
        let mut snapshots = BTreeMap::new();

        for (protocol, accumulator) in &accumulators {
            match accumulator.finalize(&params) {
                Ok(snapshot) => {
                    snapshots.insert(*protocol, snapshot);
                }
                Err(e) => {
                    warn!("Finalisation {} impossible: {}", protocol, e);
                    failures.insert(*protocol, e.to_string());
                }
            }
        }

        let protocol_series: Vec<_> = accumulators.values().flat_map(|a| a.series()).collect();

        let detector = ZScoreDetector::new(self.config.z_score_threshold);
        let anomalies = detector.detect_all(
            std::iter::once((PACKET_LENGTH_SERIES, lengths))
                .chain(protocol_series.iter().map(|(name, values)| (*name, values.as_slice()))),
        );
        for (series, set) in &anomalies {
            if !set.is_empty() {
                info!("{} anomalie(s) sur {}", set.len(), series);
            }
        }

        let mut summary = RunSummary {
            events_read: stats.events_read,
            records_classified: lengths.len() as u64,
            skipped_unclassified: stats.classifier.unclassified,
            skipped_malformed: stats.classifier.malformed,
            per_protocol,
            warnings: Vec::new(),
        };
        for warning in stats.classifier.into_warnings() {
            summary.record_warning(warning);
        }

        MetricsReport {
            snapshots,
            failures,
            anomalies,
            summary,
        }
    }

    /// Persistance du lot puis rendu du tableau ; chaque échec est rapporté sans interrompre les autres puits
    async fn deliver(&self, report: &MetricsReport, batch: Vec<PacketRecord>) -> Vec<MetricsError> {
        let mut sink_errors = Vec::new();

        if let Some(sink) = self.persistence.clone() {
            let name = sink.name();
            let stored = tokio::task::spawn_blocking(move || sink.store_batch(&batch))
                .await
                .map_err(|e| MetricsError::sink(name, e))
                .and_then(|result| result);

            match stored {
                Ok(count) => debug!("{} enregistrements transmis au puits {}", count, name),
                Err(e) => {
                    error!("Erreur lors de la persistance: {}", e);
                    sink_errors.push(e);
                }
            }
        }

        if !self.renderers.is_empty() {
            let table = MetricsTable::from_report(report);
            for renderer in &self.renderers {
                if let Err(e) = renderer.render(&table, Some(&report.anomalies)) {
                    error!("Erreur lors du rendu ({}): {}", renderer.name(), e);
                    sink_errors.push(e);
                }
            }
        }

        sink_errors
    }
}

/// Lit la source jusqu'à épuisement et transmet les enregistrements classifiés.
/// L'envoi bloque quand la file est pleine.
fn classify_source(
    mut source: Box<dyn CaptureSource>,
    record_tx: mpsc::Sender<PacketRecord>,
) -> Result<ClassificationStats> {
    let mut classifier = Classifier::new();
    let mut events_read = 0u64;

    while let Some(event) = source.next_event()? {
        events_read += 1;
        if let Some(record) = classifier.classify(&event) {
            if record_tx.blocking_send(record).is_err() {
                warn!("File d'accumulation fermée, lecture interrompue");
                break;
            }
        }
    }

    debug!("{}: {} événements lus", source.describe(), events_read);
    Ok(ClassificationStats {
        events_read,
        classifier,
    })
}
