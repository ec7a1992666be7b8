use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use super::{parse_flag, CaptureSource, RawCaptureEvent};
use crate::error::{MetricsError, Result};

/// Journal texte, une ligne par paquet :
/// `Time: 2024-01-01 10:00:00.000000, Protocol: UDP, Length: 200, Source: a, Destination: b`
///
/// Clés optionnelles : `Retransmission`, `AckRtt`, `IcmpType`, `IcmpId`, `IcmpSeq`.
pub struct TextLogSource {
    lines: Lines<BufReader<File>>,
    path: String,
    line_number: u64,
}

impl TextLogSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            MetricsError::SourceUnavailable(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self {
            lines: BufReader::new(file).lines(),
            path: path.display().to_string(),
            line_number: 0,
        })
    }
}

impl CaptureSource for TextLogSource {
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>> {
        loop {
            let line = match self.lines.next() {
                None => return Ok(None),
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return Err(MetricsError::SourceUnavailable(format!(
                        "{} ligne {}: {}",
                        self.path,
                        self.line_number + 1,
                        e
                    )))
                }
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(parse_line(&line)));
        }
    }

    fn describe(&self) -> String {
        format!("journal texte {}", self.path)
    }
}

/// Découpe une ligne `Clé: valeur, Clé: valeur` en événement brut
pub fn parse_line(line: &str) -> RawCaptureEvent {
    let mut event = RawCaptureEvent::default();

    for part in line.split(',') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }

        match key.trim().to_ascii_lowercase().as_str() {
            "time" => event.timestamp = Some(value),
            "protocol" => event.layers = layers_for_protocol(&value),
            "length" => event.length = Some(value),
            "source" => event.source = Some(value),
            "destination" => event.destination = Some(value),
            "retransmission" => event.tcp_retransmission = parse_flag(&value),
            "ackrtt" | "ack_rtt" => event.tcp_ack_rtt = Some(value),
            "icmptype" | "icmp_type" => event.icmp_type = Some(value),
            "icmpid" | "icmp_id" => event.icmp_id = Some(value),
            "icmpseq" | "icmp_seq" => event.icmp_seq = Some(value),
            _ => {}
        }
    }

    event
}

/// Pile de couches implicite d'un nom de protocole (couche la plus haute en dernier)
fn layers_for_protocol(protocol: &str) -> Vec<String> {
    let name = protocol.to_ascii_lowercase();
    let stack: &[&str] = match name.as_str() {
        "udp" => &["ip", "udp"],
        "tcp" => &["ip", "tcp"],
        "icmp" => &["ip", "icmp"],
        "icmpv6" => &["ipv6", "icmpv6"],
        "dns" | "mdns" | "dhcp" | "ntp" | "quic" | "ssdp" | "snmp" => &["ip", "udp"],
        "http" | "tls" | "ssh" | "ftp" | "smtp" | "imap" => &["ip", "tcp"],
        "arp" | "lldp" | "stp" | "cdp" => &[],
        _ => return vec!["ip".to_string(), name],
    };

    let mut layers: Vec<String> = stack.iter().map(|l| l.to_string()).collect();
    if !matches!(name.as_str(), "udp" | "tcp" | "icmp" | "icmpv6") {
        layers.push(name);
    }
    layers
}
