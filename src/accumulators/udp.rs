use super::{Accumulator, FinalizeParams};
use crate::config::Precision;
use crate::error::{MetricsError, Result};
use crate::models::{
    round_to, seconds_between, MetricsSnapshot, PacketRecord, PacketType, Timestamp, UdpMetrics,
};

/// Débit, perte, durée et taille moyenne des datagrammes UDP
#[derive(Debug, Default, Clone)]
pub struct UdpAccumulator {
    captured_packets: u64,
    total_bytes: u64,
    first_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
}

impl UdpAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured_packets(&self) -> u64 {
        self.captured_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Durée observée en secondes, nulle sous deux enregistrements
    pub fn duration_secs(&self) -> f64 {
        if self.captured_packets < 2 {
            return 0.0;
        }
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => seconds_between(first, last),
            _ => 0.0,
        }
    }

    /// Calcule l'instantané pour `sent_packets` paquets émis.
    ///
    /// La perte est bornée à zéro : plus de paquets capturés qu'émis ne donne
    /// pas de perte négative.
    pub fn finalize_with(&self, sent_packets: i64, precision: &Precision) -> Result<UdpMetrics> {
        if sent_packets <= 0 {
            return Err(MetricsError::InvalidDenominator {
                protocol: PacketType::Udp,
                value: sent_packets,
            });
        }

        let duration = self.duration_secs();
        let throughput = if duration > 0.0 {
            (self.total_bytes as f64 * 8.0) / (duration * 1e6)
        } else {
            0.0
        };

        let missing = sent_packets as f64 - self.captured_packets as f64;
        let packet_loss = (missing * 100.0 / sent_packets as f64).max(0.0);

        let avg_packet_size = if self.captured_packets > 0 {
            self.total_bytes as f64 / self.captured_packets as f64
        } else {
            0.0
        };

        Ok(UdpMetrics {
            throughput_mbps: round_to(throughput, precision.throughput),
            packet_loss_pct: round_to(packet_loss, precision.packet_loss),
            duration_secs: round_to(duration, precision.duration),
            avg_packet_size: round_to(avg_packet_size, precision.packet_size),
            captured_packets: self.captured_packets,
            total_bytes: self.total_bytes,
        })
    }
}

impl Accumulator for UdpAccumulator {
    fn protocol(&self) -> PacketType {
        PacketType::Udp
    }

    fn ingest(&mut self, record: &PacketRecord) {
        if record.protocol != PacketType::Udp {
            return;
        }

        self.captured_packets += 1;
        self.total_bytes += record.length;

        // Bornes min/max : tolère une source légèrement désordonnée
        self.first_timestamp = Some(match self.first_timestamp {
            Some(first) => first.min(record.timestamp),
            None => record.timestamp,
        });
        self.last_timestamp = Some(match self.last_timestamp {
            Some(last) => last.max(record.timestamp),
            None => record.timestamp,
        });
    }

    fn finalize(&self, params: &FinalizeParams) -> Result<MetricsSnapshot> {
        let sent = params.sent_packets.unwrap_or(0);
        self.finalize_with(sent, &params.precision).map(MetricsSnapshot::Udp)
    }

    fn ingested(&self) -> u64 {
        self.captured_packets
    }
}
