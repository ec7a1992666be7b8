use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{CaptureSource, RawCaptureEvent};
use crate::error::Result;
use crate::models::Timestamp;

/// Paramètres du générateur de trafic de test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub packet_count: u64,
    pub seed: u64,
    pub source: String,
    pub destination: String,
    /// Part des paquets UDP / TCP (le reste est ICMP), en pourcentage
    pub udp_share: u32,
    pub tcp_share: u32,
    /// Probabilité qu'une requête écho reste sans réponse
    pub echo_loss: f64,
    /// Probabilité qu'un segment TCP soit une retransmission
    pub retransmission_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            packet_count: 20,
            seed: 42,
            source: "192.168.1.9".to_string(),
            destination: "192.168.1.1".to_string(),
            udp_share: 50,
            tcp_share: 35,
            echo_loss: 0.1,
            retransmission_rate: 0.05,
        }
    }
}

/// Générateur déterministe (graine) d'événements de capture.
///
/// Les horodatages sont croissants ; chaque réponse écho suit sa requête.
pub struct SyntheticTraffic {
    config: SyntheticConfig,
    rng: StdRng,
    clock: Timestamp,
    emitted: u64,
    pending: VecDeque<RawCaptureEvent>,
    echo_sequence: u16,
}

impl SyntheticTraffic {
    pub fn new(config: SyntheticConfig) -> Self {
        Self::starting_at(config, Utc::now())
    }

    pub fn starting_at(config: SyntheticConfig, start: Timestamp) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            clock: start,
            emitted: 0,
            pending: VecDeque::new(),
            echo_sequence: 0,
        }
    }

    fn base_event(&self, layers: &[&str], length: u32, forward: bool) -> RawCaptureEvent {
        let (source, destination) = if forward {
            (&self.config.source, &self.config.destination)
        } else {
            (&self.config.destination, &self.config.source)
        };

        RawCaptureEvent {
            timestamp: Some(self.clock.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
            layers: layers.iter().map(|l| l.to_string()).collect(),
            length: Some(length.to_string()),
            source: Some(source.clone()),
            destination: Some(destination.clone()),
            ..Default::default()
        }
    }

    fn generate(&mut self) -> RawCaptureEvent {
        let step_ms = self.rng.random_range(1..20);
        self.clock += chrono::Duration::milliseconds(step_ms);

        let roll = self.rng.random_range(0..100);
        if roll < self.config.udp_share {
            let length = self.rng.random_range(64..1500);
            self.base_event(&["eth", "ip", "udp"], length, true)
        } else if roll < self.config.udp_share + self.config.tcp_share {
            let length = self.rng.random_range(54..1500);
            let mut event = self.base_event(&["eth", "ip", "tcp"], length, true);
            event.tcp_retransmission = self.rng.random_bool(self.config.retransmission_rate);
            if self.rng.random_bool(0.3) {
                let rtt_us: u64 = self.rng.random_range(1_000..80_000);
                event.tcp_ack_rtt = Some(format!("{}.{:06}", rtt_us / 1_000_000, rtt_us % 1_000_000));
            }
            event
        } else {
            self.echo_sequence = self.echo_sequence.wrapping_add(1);
            let mut request = self.base_event(&["eth", "ip", "icmp"], 98, true);
            request.icmp_type = Some("8".to_string());
            request.icmp_id = Some("1".to_string());
            request.icmp_seq = Some(self.echo_sequence.to_string());

            if !self.rng.random_bool(self.config.echo_loss) {
                // La réponse est émise au prochain appel, l'horloge avance jusqu'à elle
                let latency_us = self.rng.random_range(500..50_000);
                self.clock += chrono::Duration::microseconds(latency_us);
                let mut reply = self.base_event(&["eth", "ip", "icmp"], 98, false);
                reply.icmp_type = Some("0".to_string());
                reply.icmp_id = Some("1".to_string());
                reply.icmp_seq = Some(self.echo_sequence.to_string());
                self.pending.push_back(reply);
            }
            request
        }
    }
}

impl Iterator for SyntheticTraffic {
    type Item = RawCaptureEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted >= self.config.packet_count {
            return None;
        }
        self.emitted += 1;

        if let Some(reply) = self.pending.pop_front() {
            return Some(reply);
        }
        Some(self.generate())
    }
}

impl CaptureSource for SyntheticTraffic {
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>> {
        Ok(self.next())
    }

    fn describe(&self) -> String {
        format!("trafic synthétique (graine {})", self.config.seed)
    }
}
