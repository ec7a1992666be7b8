use super::{Accumulator, FinalizeParams, NamedSeries};
use crate::error::Result;
use crate::models::{round_to, MetricsSnapshot, PacketRecord, PacketType, TcpMetrics};

pub const RTT_SERIES: &str = "tcp_rtt_ms";

/// Retransmissions et RTT moyen des segments TCP
#[derive(Debug, Default, Clone)]
pub struct TcpAccumulator {
    ingested: u64,
    retransmissions: u64,
    rtt_sum_ms: f64,
    rtt_samples: Vec<f64>,
}

impl TcpAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    pub fn rtt_sample_count(&self) -> u64 {
        self.rtt_samples.len() as u64
    }
}

impl Accumulator for TcpAccumulator {
    fn protocol(&self) -> PacketType {
        PacketType::Tcp
    }

    fn ingest(&mut self, record: &PacketRecord) {
        if record.protocol != PacketType::Tcp {
            return;
        }
        self.ingested += 1;

        let Some(details) = &record.tcp else {
            return;
        };

        // Un même segment peut être retransmis et porter un RTT
        if details.is_retransmission {
            self.retransmissions += 1;
        }
        if let Some(rtt) = details.ack_rtt {
            let rtt_ms = rtt.as_nanos() as f64 / 1e6;
            self.rtt_sum_ms += rtt_ms;
            self.rtt_samples.push(rtt_ms);
        }
    }

    fn finalize(&self, params: &FinalizeParams) -> Result<MetricsSnapshot> {
        let count = self.rtt_sample_count();
        let average = if count > 0 {
            self.rtt_sum_ms / count as f64
        } else {
            0.0
        };

        Ok(MetricsSnapshot::Tcp(TcpMetrics {
            retransmissions: self.retransmissions,
            average_rtt_ms: round_to(average, params.precision.rtt),
            rtt_sample_count: count,
        }))
    }

    fn ingested(&self) -> u64 {
        self.ingested
    }

    fn series(&self) -> Vec<NamedSeries> {
        vec![(RTT_SERIES, self.rtt_samples.clone())]
    }
}
