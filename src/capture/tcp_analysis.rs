use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use crate::models::Timestamp;

pub const TCP_FIN: u16 = 0x01;
pub const TCP_SYN: u16 = 0x02;
pub const TCP_RST: u16 = 0x04;
pub const TCP_ACK: u16 = 0x10;

/// Segments en attente d'acquittement conservés par flux
const MAX_OUTSTANDING: usize = 4096;

type FlowKey = (IpAddr, u16, IpAddr, u16);

/// En-tête TCP réduit aux champs utiles à l'analyse
#[derive(Debug, Clone, Copy)]
pub struct TcpSegment {
    pub source: IpAddr,
    pub source_port: u16,
    pub destination: IpAddr,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    pub flags: u16,
    pub payload_len: u32,
}

/// Résultat de l'analyse d'un segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TcpObservation {
    pub retransmission: bool,
    pub ack_rtt: Option<Duration>,
}

#[derive(Debug, Default)]
struct FlowState {
    /// Fin de séquence la plus haute émise sur ce flux
    highest_seq_end: Option<u32>,
    /// (fin de séquence, instant d'émission) des segments non acquittés
    outstanding: VecDeque<(u32, Timestamp)>,
    fin_seen: bool,
}

impl FlowState {
    /// Retire les segments couverts par `ack` et renvoie l'instant d'émission
    /// du segment acquitté (correspondance exacte, sinon le plus récent couvert)
    fn acknowledge(&mut self, ack: u32) -> Option<Timestamp> {
        let mut exact = None;
        let mut latest = None;

        while let Some(&(seq_end, sent_at)) = self.outstanding.front() {
            if !seq_le(seq_end, ack) {
                break;
            }
            self.outstanding.pop_front();
            if seq_end == ack {
                exact = Some(sent_at);
            }
            latest = Some(sent_at);
        }

        exact.or(latest)
    }

    fn forget(&mut self, seq_end: u32) {
        self.outstanding.retain(|&(end, _)| end != seq_end);
    }

    /// FIN émis et tout le flux acquitté
    fn is_closed(&self) -> bool {
        self.fin_seen && self.outstanding.is_empty()
    }
}

/// Suivi des flux TCP d'une capture hors ligne.
///
/// Un segment qui n'avance pas la séquence de son flux est une retransmission ;
/// un ACK du sens inverse qui couvre un segment en attente fournit un RTT.
/// Les segments retransmis ne produisent pas d'échantillon RTT. Une connexion
/// est oubliée sur RST, ou quand les deux sens ont émis un FIN acquitté.
#[derive(Debug, Default)]
pub struct TcpFlowTracker {
    flows: HashMap<FlowKey, FlowState>,
}

impl TcpFlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn observe(&mut self, timestamp: Timestamp, segment: &TcpSegment) -> TcpObservation {
        let mut observation = TcpObservation::default();
        let key = (
            segment.source,
            segment.source_port,
            segment.destination,
            segment.destination_port,
        );
        let reverse = (
            segment.destination,
            segment.destination_port,
            segment.source,
            segment.source_port,
        );

        if segment.flags & TCP_ACK != 0 {
            if let Some(state) = self.flows.get_mut(&reverse) {
                if let Some(sent_at) = state.acknowledge(segment.acknowledgement) {
                    observation.ack_rtt = (timestamp - sent_at).to_std().ok();
                }
            }
        }

        // SYN et FIN consomment chacun un numéro de séquence
        let consumed = segment.payload_len
            + u32::from(segment.flags & TCP_SYN != 0)
            + u32::from(segment.flags & TCP_FIN != 0);

        if consumed > 0 {
            let state = self.flows.entry(key).or_default();
            let seq_end = segment.sequence.wrapping_add(consumed);
            if segment.flags & TCP_FIN != 0 {
                state.fin_seen = true;
            }

            match state.highest_seq_end {
                Some(highest) if seq_le(seq_end, highest) => {
                    observation.retransmission = true;
                    state.forget(seq_end);
                }
                _ => {
                    state.highest_seq_end = Some(seq_end);
                    state.outstanding.push_back((seq_end, timestamp));
                    if state.outstanding.len() > MAX_OUTSTANDING {
                        state.outstanding.pop_front();
                    }
                }
            }
        }

        let closed = [key, reverse]
            .iter()
            .all(|k| self.flows.get(k).is_some_and(FlowState::is_closed));

        if closed || segment.flags & TCP_RST != 0 {
            self.flows.remove(&key);
            self.flows.remove(&reverse);
        }

        observation
    }
}

/// `a <= b` en arithmétique de séquence modulo 2^32
fn seq_le(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) >= 0
}
