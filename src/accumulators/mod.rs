//! Accumulateurs de métriques par famille de protocole.
//!
//! Chaque accumulateur ingère les enregistrements d'un seul protocole, dans
//! l'ordre de la capture, puis produit un instantané à la finalisation.
//! La finalisation ne modifie pas l'état : la rappeler sans nouvel `ingest`
//! donne le même instantané.

pub mod icmp;
pub mod tcp;
pub mod udp;

pub use icmp::{EchoCorrelationTable, IcmpAccumulator};
pub use tcp::TcpAccumulator;
pub use udp::UdpAccumulator;

use std::time::Duration;

use crate::config::{Config, Precision};
use crate::error::Result;
use crate::models::{MetricsSnapshot, PacketRecord, PacketType};

/// Série nommée de valeurs par paquet, transmise au détecteur d'anomalies
pub type NamedSeries = (&'static str, Vec<f64>);

/// Paramètres fournis par l'orchestrateur au moment de la finalisation
#[derive(Debug, Clone, Default)]
pub struct FinalizeParams {
    /// Paquets émis par le générateur, dénominateur de la perte UDP
    pub sent_packets: Option<i64>,
    pub precision: Precision,
}

impl FinalizeParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sent_packets: config.sent_packets,
            precision: config.precision,
        }
    }
}

/// Réducteur à état d'une famille de protocole
pub trait Accumulator: Send {
    fn protocol(&self) -> PacketType;

    /// Intègre un enregistrement ; les enregistrements d'un autre protocole sont ignorés
    fn ingest(&mut self, record: &PacketRecord);

    fn finalize(&self, params: &FinalizeParams) -> Result<MetricsSnapshot>;

    /// Nombre d'enregistrements intégrés
    fn ingested(&self) -> u64;

    /// Séries par paquet propres au protocole (RTT, latence)
    fn series(&self) -> Vec<NamedSeries> {
        Vec::new()
    }
}

/// Crée l'accumulateur d'un protocole. OTHER n'a pas de métriques propres.
pub fn accumulator_for(protocol: PacketType, config: &Config) -> Option<Box<dyn Accumulator>> {
    match protocol {
        PacketType::Udp => Some(Box::new(UdpAccumulator::new())),
        PacketType::Tcp => Some(Box::new(TcpAccumulator::new())),
        PacketType::Icmp => {
            let accumulator = match config.echo_ttl_secs {
                Some(ttl) => IcmpAccumulator::with_ttl(Duration::from_secs(ttl)),
                None => IcmpAccumulator::new(),
            };
            Some(Box::new(accumulator))
        }
        PacketType::Other => None,
    }
}
