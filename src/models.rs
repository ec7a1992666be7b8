use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::anomaly::AnomalySet;

/// Instant d'observation d'un paquet (précision à la nanoseconde)
pub type Timestamp = DateTime<Utc>;

/// Famille de protocole d'un enregistrement classifié
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketType {
    Udp,
    Tcp,
    Icmp,
    Other,
}

impl PacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Udp => "UDP",
            PacketType::Tcp => "TCP",
            PacketType::Icmp => "ICMP",
            PacketType::Other => "OTHER",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UDP" => Ok(PacketType::Udp),
            "TCP" => Ok(PacketType::Tcp),
            "ICMP" | "ICMPV6" => Ok(PacketType::Icmp),
            "OTHER" => Ok(PacketType::Other),
            other => Err(format!("protocole inconnu: {}", other)),
        }
    }
}

/// Type de message ICMP utile à la corrélation écho
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IcmpType {
    EchoRequest,
    EchoReply,
    Other,
}

/// Champs propres à TCP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpDetails {
    pub is_retransmission: bool,
    /// RTT mesuré entre un segment et l'ACK qui le couvre
    pub ack_rtt: Option<Duration>,
}

/// Champs propres à ICMP ; `(id, sequence)` sert de clé de corrélation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpDetails {
    pub icmp_type: IcmpType,
    pub id: u16,
    pub sequence: u16,
}

/// Représentation canonique d'un paquet observé, indépendante du protocole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub timestamp: Timestamp,
    pub protocol: PacketType,
    pub length: u64,
    pub source: String,
    pub destination: String,
    pub tcp: Option<TcpDetails>,
    pub icmp: Option<IcmpDetails>,
}

impl PacketRecord {
    pub fn new(
        timestamp: Timestamp,
        protocol: PacketType,
        length: u64,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            protocol,
            length,
            source: source.into(),
            destination: destination.into(),
            tcp: None,
            icmp: None,
        }
    }

    pub fn with_tcp(mut self, details: TcpDetails) -> Self {
        self.tcp = Some(details);
        self
    }

    pub fn with_icmp(mut self, details: IcmpDetails) -> Self {
        self.icmp = Some(details);
        self
    }
}

/// Métriques UDP finalisées
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpMetrics {
    pub throughput_mbps: f64,
    pub packet_loss_pct: f64,
    pub duration_secs: f64,
    pub avg_packet_size: f64,
    pub captured_packets: u64,
    pub total_bytes: u64,
}

/// Métriques TCP finalisées
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpMetrics {
    pub retransmissions: u64,
    pub average_rtt_ms: f64,
    pub rtt_sample_count: u64,
}

/// Métriques ICMP finalisées. `loss_rate_pct` peut être négatif
/// (réponses dupliquées ou non sollicitées).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpMetrics {
    pub latency_count: u64,
    pub average_latency_ms: f64,
    pub loss_rate_pct: f64,
    pub request_count: u64,
    pub reply_count: u64,
}

/// Instantané produit par un accumulateur
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "UPPERCASE")]
pub enum MetricsSnapshot {
    Udp(UdpMetrics),
    Tcp(TcpMetrics),
    Icmp(IcmpMetrics),
}

impl MetricsSnapshot {
    pub fn protocol(&self) -> PacketType {
        match self {
            MetricsSnapshot::Udp(_) => PacketType::Udp,
            MetricsSnapshot::Tcp(_) => PacketType::Tcp,
            MetricsSnapshot::Icmp(_) => PacketType::Icmp,
        }
    }

    /// Métriques sous forme (libellé, valeur), dans l'ordre d'affichage
    pub fn labeled(&self) -> Vec<(&'static str, f64)> {
        match self {
            MetricsSnapshot::Udp(m) => vec![
                ("Throughput (Mbps)", m.throughput_mbps),
                ("Packet Loss (%)", m.packet_loss_pct),
                ("Duration (seconds)", m.duration_secs),
                ("Average Packet Size (bytes)", m.avg_packet_size),
                ("Captured Packets", m.captured_packets as f64),
            ],
            MetricsSnapshot::Tcp(m) => vec![
                ("Retransmissions", m.retransmissions as f64),
                ("Average RTT (ms)", m.average_rtt_ms),
                ("RTT Samples", m.rtt_sample_count as f64),
            ],
            MetricsSnapshot::Icmp(m) => vec![
                ("Latency Count", m.latency_count as f64),
                ("Average Latency (ms)", m.average_latency_ms),
                ("Loss Rate (%)", m.loss_rate_pct),
            ],
        }
    }
}

/// Bilan d'une exécution du pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub events_read: u64,
    pub records_classified: u64,
    pub skipped_unclassified: u64,
    pub skipped_malformed: u64,
    pub per_protocol: BTreeMap<PacketType, u64>,
    /// Premiers avertissements rencontrés (tronqués à `MAX_STORED_WARNINGS`)
    pub warnings: Vec<String>,
}

pub const MAX_STORED_WARNINGS: usize = 100;

impl RunSummary {
    pub fn record_warning(&mut self, message: String) {
        if self.warnings.len() < MAX_STORED_WARNINGS {
            self.warnings.push(message);
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_unclassified + self.skipped_malformed
    }
}

/// Rapport complet d'une exécution : instantanés, échecs par protocole et anomalies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsReport {
    pub snapshots: BTreeMap<PacketType, MetricsSnapshot>,
    pub failures: BTreeMap<PacketType, String>,
    /// Anomalies par série (`packet_length`, `icmp_latency_ms`, `tcp_rtt_ms`)
    pub anomalies: BTreeMap<String, AnomalySet>,
    pub summary: RunSummary,
}

impl MetricsReport {
    pub fn udp(&self) -> Option<&UdpMetrics> {
        match self.snapshots.get(&PacketType::Udp) {
            Some(MetricsSnapshot::Udp(m)) => Some(m),
            _ => None,
        }
    }

    pub fn tcp(&self) -> Option<&TcpMetrics> {
        match self.snapshots.get(&PacketType::Tcp) {
            Some(MetricsSnapshot::Tcp(m)) => Some(m),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpMetrics> {
        match self.snapshots.get(&PacketType::Icmp) {
            Some(MetricsSnapshot::Icmp(m)) => Some(m),
            _ => None,
        }
    }
}

/// Secondes écoulées entre deux instants (négatif si `end` précède `start`)
pub fn seconds_between(start: Timestamp, end: Timestamp) -> f64 {
    let delta = end - start;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// Millisecondes écoulées entre deux instants
pub fn millis_between(start: Timestamp, end: Timestamp) -> f64 {
    let delta = end - start;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e3,
        None => delta.num_milliseconds() as f64,
    }
}

/// Arrondi à `decimals` décimales
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_packet_type_parsing() {
        assert_eq!("udp".parse::<PacketType>().unwrap(), PacketType::Udp);
        assert_eq!(" TCP ".parse::<PacketType>().unwrap(), PacketType::Tcp);
        assert_eq!("ICMPv6".parse::<PacketType>().unwrap(), PacketType::Icmp);
        assert!("ARP".parse::<PacketType>().is_err());
        assert_eq!(PacketType::Other.to_string(), "OTHER");
    }

    #[test]
    fn test_time_helpers() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(2_500);
        assert_eq!(seconds_between(start, end), 2.5);
        assert_eq!(millis_between(start, end), 2500.0);
        assert_eq!(seconds_between(end, start), -2.5);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.014_449, 4), 0.0144);
        assert_eq!(round_to(10.004, 2), 10.0);
        assert_eq!(round_to(-20.0, 2), -20.0);
    }
}
