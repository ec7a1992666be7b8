use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use std::time::Duration;

use crate::capture::RawCaptureEvent;
use crate::error::{MetricsError, Result};
use crate::models::{IcmpDetails, IcmpType, PacketRecord, PacketType, TcpDetails, Timestamp};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Couches qui attestent la présence d'un en-tête IP
const NETWORK_LAYERS: [&str; 3] = ["ip", "ipv4", "ipv6"];

/// Classifie un événement brut en enregistrement typé.
///
/// La couche transport la plus haute l'emporte : TCP et UDP priment sur ICMP,
/// qui prime sur OTHER. Un événement sans couche IP ni transport est rejeté.
pub fn classify(event: &RawCaptureEvent) -> Result<PacketRecord> {
    let protocol = protocol_of(event)?;

    let raw_timestamp = event
        .timestamp
        .as_deref()
        .ok_or_else(|| MetricsError::malformed("timestamp", "<absent>"))?;
    let timestamp =
        parse_timestamp(raw_timestamp).ok_or_else(|| MetricsError::malformed("timestamp", raw_timestamp))?;

    let raw_length = event
        .length
        .as_deref()
        .ok_or_else(|| MetricsError::malformed("length", "<absent>"))?;
    let length = raw_length
        .trim()
        .parse::<u64>()
        .map_err(|_| MetricsError::malformed("length", raw_length))?;

    let record = PacketRecord::new(
        timestamp,
        protocol,
        length,
        event.source.clone().unwrap_or_default(),
        event.destination.clone().unwrap_or_default(),
    );

    match protocol {
        PacketType::Tcp => Ok(record.with_tcp(tcp_details(event)?)),
        PacketType::Icmp => Ok(record.with_icmp(icmp_details(event)?)),
        _ => Ok(record),
    }
}

fn protocol_of(event: &RawCaptureEvent) -> Result<PacketType> {
    // Couche transport la plus haute de la pile
    let transport = event.layers.iter().rev().find_map(|layer| {
        match layer.to_ascii_lowercase().as_str() {
            "tcp" => Some(PacketType::Tcp),
            "udp" => Some(PacketType::Udp),
            _ => None,
        }
    });
    if let Some(protocol) = transport {
        return Ok(protocol);
    }

    if event.has_layer("icmp") || event.has_layer("icmpv6") {
        return Ok(PacketType::Icmp);
    }

    if NETWORK_LAYERS.iter().any(|l| event.has_layer(l)) {
        return Ok(PacketType::Other);
    }

    Err(MetricsError::UnclassifiedRecord(if event.layers.is_empty() {
        "aucune couche".to_string()
    } else {
        event.layers.join("/")
    }))
}

fn tcp_details(event: &RawCaptureEvent) -> Result<TcpDetails> {
    let ack_rtt = match event.tcp_ack_rtt.as_deref() {
        None => None,
        Some(raw) => Some(parse_seconds(raw).ok_or_else(|| MetricsError::malformed("tcp_ack_rtt", raw))?),
    };

    Ok(TcpDetails {
        is_retransmission: event.tcp_retransmission,
        ack_rtt,
    })
}

fn icmp_details(event: &RawCaptureEvent) -> Result<IcmpDetails> {
    let icmp_type = match event.icmp_type.as_deref() {
        None => IcmpType::Other,
        Some(raw) => parse_icmp_type(raw),
    };

    let id = parse_u16_field("icmp_id", event.icmp_id.as_deref())?;
    let sequence = parse_u16_field("icmp_seq", event.icmp_seq.as_deref())?;

    // La corrélation d'un écho exige les deux clés
    if icmp_type != IcmpType::Other && (id.is_none() || sequence.is_none()) {
        let missing = if id.is_none() { "icmp_id" } else { "icmp_seq" };
        return Err(MetricsError::malformed(missing, "<absent>"));
    }

    Ok(IcmpDetails {
        icmp_type,
        id: id.unwrap_or(0),
        sequence: sequence.unwrap_or(0),
    })
}

fn parse_u16_field(field: &'static str, raw: Option<&str>) -> Result<Option<u16>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| MetricsError::malformed(field, raw)),
    }
}

/// Types 8/0 (ICMPv4) et 128/129 (ICMPv6), ou leur nom
fn parse_icmp_type(raw: &str) -> IcmpType {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.as_str() {
        "8" | "128" | "echorequest" | "request" => IcmpType::EchoRequest,
        "0" | "129" | "echoreply" | "reply" => IcmpType::EchoReply,
        _ => IcmpType::Other,
    }
}

/// Horodatage : secondes epoch décimales, RFC 3339 ou `YYYY-mm-dd HH:MM:SS.ffffff` (UTC)
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let (seconds, nanos) = split_decimal(raw)?;
        return DateTime::from_timestamp(i64::try_from(seconds).ok()?, nanos);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Durée en secondes décimales, sans perte de précision
pub fn parse_seconds(raw: &str) -> Option<Duration> {
    let (seconds, nanos) = split_decimal(raw.trim())?;
    Some(Duration::new(seconds, nanos))
}

/// Sépare `123.456` en (123, 456_000_000) ; au plus 9 décimales significatives
fn split_decimal(raw: &str) -> Option<(u64, u32)> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let seconds = if whole.is_empty() { 0 } else { whole.parse::<u64>().ok()? };
    let digits: String = fraction.chars().take(9).collect();
    let nanos = if digits.is_empty() {
        0
    } else {
        digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32)
    };

    Some((seconds, nanos))
}

/// Classifieur avec collecte des avertissements
#[derive(Debug, Default)]
pub struct Classifier {
    pub unclassified: u64,
    pub malformed: u64,
    warnings: Vec<String>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifie l'événement ; en cas de rejet, l'avertissement est enregistré
    /// et `None` est renvoyé sans interrompre le lot.
    pub fn classify(&mut self, event: &RawCaptureEvent) -> Option<PacketRecord> {
        match classify(event) {
            Ok(record) => Some(record),
            Err(e @ MetricsError::UnclassifiedRecord(_)) => {
                debug!("Enregistrement ignoré: {}", e);
                self.unclassified += 1;
                self.warnings.push(e.to_string());
                None
            }
            Err(e) => {
                warn!("Enregistrement ignoré: {}", e);
                self.malformed += 1;
                self.warnings.push(e.to_string());
                None
            }
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}
