use log::debug;
use std::collections::HashMap;
use std::time::Duration;

use super::{Accumulator, FinalizeParams, NamedSeries};
use crate::error::Result;
use crate::models::{
    millis_between, round_to, IcmpMetrics, IcmpType, MetricsSnapshot, PacketRecord, PacketType,
    Timestamp,
};

pub const LATENCY_SERIES: &str = "icmp_latency_ms";

/// Clé de corrélation écho : (identifiant, numéro de séquence)
pub type EchoKey = (u16, u16);

/// Requêtes écho en attente de réponse.
///
/// Une entrée est retirée dès qu'une réponse la consomme. Une nouvelle requête
/// sur la même clé remplace la précédente.
#[derive(Debug, Default, Clone)]
pub struct EchoCorrelationTable {
    pending: HashMap<EchoKey, Timestamp>,
}

impl EchoCorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre une requête ; renvoie l'instant de la requête remplacée, s'il y en avait une
    pub fn record_request(&mut self, key: EchoKey, timestamp: Timestamp) -> Option<Timestamp> {
        self.pending.insert(key, timestamp)
    }

    /// Retire et renvoie l'instant de la requête correspondant à `key`
    pub fn consume(&mut self, key: EchoKey) -> Option<Timestamp> {
        self.pending.remove(&key)
    }

    /// Oublie les requêtes plus anciennes que `ttl` par rapport à `now`
    pub fn evict_expired(&mut self, now: Timestamp, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let before = self.pending.len();
        self.pending.retain(|_, requested_at| now - *requested_at <= ttl);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Latence et taux de perte des échanges écho ICMP
#[derive(Debug, Default, Clone)]
pub struct IcmpAccumulator {
    ingested: u64,
    request_count: u64,
    reply_count: u64,
    latency_samples: Vec<f64>,
    table: EchoCorrelationTable,
    ttl: Option<Duration>,
}

impl IcmpAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les requêtes sans réponse depuis plus de `ttl` sont évincées
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.table.len()
    }

    pub fn latency_samples(&self) -> &[f64] {
        &self.latency_samples
    }
}

impl Accumulator for IcmpAccumulator {
    fn protocol(&self) -> PacketType {
        PacketType::Icmp
    }

    fn ingest(&mut self, record: &PacketRecord) {
        if record.protocol != PacketType::Icmp {
            return;
        }
        self.ingested += 1;

        let Some(details) = &record.icmp else {
            return;
        };
        let key = (details.id, details.sequence);

        if let Some(ttl) = self.ttl {
            let evicted = self.table.evict_expired(record.timestamp, ttl);
            if evicted > 0 {
                debug!("{} requête(s) écho expirée(s)", evicted);
            }
        }

        match details.icmp_type {
            IcmpType::EchoRequest => {
                self.request_count += 1;
                self.table.record_request(key, record.timestamp);
            }
            IcmpType::EchoReply => {
                self.reply_count += 1;
                match self.table.consume(key) {
                    Some(requested_at) => {
                        self.latency_samples
                            .push(millis_between(requested_at, record.timestamp));
                    }
                    None => debug!("Réponse écho sans requête: id={} seq={}", key.0, key.1),
                }
            }
            IcmpType::Other => {}
        }
    }

    /// Le taux de perte n'est pas borné : plus de réponses que de requêtes
    /// donne un taux négatif.
    fn finalize(&self, params: &FinalizeParams) -> Result<MetricsSnapshot> {
        let latency_count = self.latency_samples.len() as u64;
        let average_latency = if latency_count > 0 {
            self.latency_samples.iter().sum::<f64>() / latency_count as f64
        } else {
            0.0
        };

        let loss_rate = if self.request_count > 0 {
            (self.request_count as f64 - self.reply_count as f64) * 100.0 / self.request_count as f64
        } else {
            0.0
        };

        Ok(MetricsSnapshot::Icmp(IcmpMetrics {
            latency_count,
            average_latency_ms: round_to(average_latency, params.precision.latency),
            loss_rate_pct: round_to(loss_rate, params.precision.loss_rate),
            request_count: self.request_count,
            reply_count: self.reply_count,
        }))
    }

    fn ingested(&self) -> u64 {
        self.ingested
    }

    fn series(&self) -> Vec<NamedSeries> {
        vec![(LATENCY_SERIES, self.latency_samples.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IcmpDetails;
    use chrono::{TimeZone, Utc};

    fn echo(icmp_type: IcmpType, sequence: u16, offset_ms: i64) -> PacketRecord {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        PacketRecord::new(
            t0 + chrono::Duration::milliseconds(offset_ms),
            PacketType::Icmp,
            98,
            "192.168.1.9",
            "192.168.1.1",
        )
        .with_icmp(IcmpDetails {
            icmp_type,
            id: 1,
            sequence,
        })
    }

    fn icmp_metrics(acc: &IcmpAccumulator) -> IcmpMetrics {
        match acc.finalize(&FinalizeParams::default()).unwrap() {
            MetricsSnapshot::Icmp(m) => m,
            other => panic!("instantané ICMP attendu: {:?}", other),
        }
    }

    #[test]
    fn test_matched_echoes() {
        let mut acc = IcmpAccumulator::new();
        for seq in 0..5u16 {
            let t = i64::from(seq) * 1000;
            acc.ingest(&echo(IcmpType::EchoRequest, seq, t));
            acc.ingest(&echo(IcmpType::EchoReply, seq, t + 10));
        }

        let metrics = icmp_metrics(&acc);
        assert_eq!(metrics.loss_rate_pct, 0.0);
        assert_eq!(metrics.latency_count, 5);
        assert_eq!(metrics.average_latency_ms, 10.0);
        assert_eq!(acc.pending_requests(), 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut acc = IcmpAccumulator::new();
        acc.ingest(&echo(IcmpType::EchoRequest, 0, 0));
        acc.ingest(&echo(IcmpType::EchoReply, 0, 15));
        acc.ingest(&echo(IcmpType::EchoRequest, 1, 1000));
        let params = FinalizeParams::default();
        assert_eq!(acc.finalize(&params).unwrap(), acc.finalize(&params).unwrap());
        assert_eq!(acc.pending_requests(), 1);
    }

    #[test]
    fn test_unsolicited_reply_gives_negative_loss() {
        let mut acc = IcmpAccumulator::new();
        for seq in 0..5u16 {
            let t = i64::from(seq) * 1000;
            acc.ingest(&echo(IcmpType::EchoRequest, seq, t));
            acc.ingest(&echo(IcmpType::EchoReply, seq, t + 10));
        }
        acc.ingest(&echo(IcmpType::EchoReply, 99, 6000));

        let metrics = icmp_metrics(&acc);
        assert_eq!(metrics.loss_rate_pct, -20.0);
        assert_eq!(metrics.reply_count, 6);
        assert_eq!(metrics.latency_count, 5);
    }

    #[test]
    fn test_orphan_requests_count_as_loss() {
        let mut acc = IcmpAccumulator::new();
        for seq in 0..4u16 {
            acc.ingest(&echo(IcmpType::EchoRequest, seq, i64::from(seq) * 100));
        }
        acc.ingest(&echo(IcmpType::EchoReply, 0, 450));

        let metrics = icmp_metrics(&acc);
        assert_eq!(metrics.loss_rate_pct, 75.0);
        assert_eq!(metrics.average_latency_ms, 450.0);
        assert_eq!(acc.pending_requests(), 3);
    }

    #[test]
    fn test_last_request_wins() {
        let mut acc = IcmpAccumulator::new();
        acc.ingest(&echo(IcmpType::EchoRequest, 7, 0));
        acc.ingest(&echo(IcmpType::EchoRequest, 7, 100));
        acc.ingest(&echo(IcmpType::EchoReply, 7, 130));
        // La seconde réponse ne trouve plus la clé consommée
        acc.ingest(&echo(IcmpType::EchoReply, 7, 140));

        assert_eq!(acc.latency_samples(), &[30.0]);
        let metrics = icmp_metrics(&acc);
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.reply_count, 2);
        assert_eq!(metrics.loss_rate_pct, 0.0);
    }

    #[test]
    fn test_ttl_evicts_stale_requests() {
        let mut acc = IcmpAccumulator::with_ttl(Duration::from_secs(1));
        acc.ingest(&echo(IcmpType::EchoRequest, 1, 0));
        acc.ingest(&echo(IcmpType::EchoRequest, 2, 1500));
        assert_eq!(acc.pending_requests(), 1);

        acc.ingest(&echo(IcmpType::EchoReply, 1, 1600));
        assert!(acc.latency_samples().is_empty());
    }

    #[test]
    fn test_correlation_table() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut table = EchoCorrelationTable::new();
        assert_eq!(table.record_request((1, 1), t0), None);
        assert_eq!(table.record_request((1, 1), t0), Some(t0));
        assert_eq!(table.consume((1, 1)), Some(t0));
        assert_eq!(table.consume((1, 1)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_no_requests() {
        let acc = IcmpAccumulator::new();
        let metrics = icmp_metrics(&acc);
        assert_eq!(metrics.loss_rate_pct, 0.0);
        assert_eq!(metrics.average_latency_ms, 0.0);
    }
}
