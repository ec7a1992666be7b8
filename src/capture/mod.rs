//! Sources de capture : séquences paresseuses, finies et non redémarrables
//! d'événements bruts.
//!
//! Formats supportés :
//! - fichiers pcap/pcapng (libpcap + pnet)
//! - journaux texte `Time: ..., Protocol: ..., Length: ...`
//! - JSON lines, un événement par ligne
//! - trafic synthétique (génération de données de test)

mod jsonl;
mod pcap_file;
mod synthetic;
mod tcp_analysis;
mod text;

pub use jsonl::JsonLinesSource;
pub use pcap_file::PcapFileSource;
pub use synthetic::{SyntheticConfig, SyntheticTraffic};
pub use tcp_analysis::{TcpFlowTracker, TcpObservation, TcpSegment};
pub use text::{parse_line, TextLogSource};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

/// Métadonnées d'un paquet telles que fournies par la source.
///
/// Les valeurs restent textuelles : c'est le classifieur qui les interprète.
/// Un champ indisponible est `None`, jamais une erreur.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCaptureEvent {
    #[serde(deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    /// Couches reconnues, de la plus basse à la plus haute (`eth`, `ip`, `udp`, ...)
    pub layers: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub length: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub source: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub destination: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    pub tcp_retransmission: bool,
    /// RTT de l'ACK, en secondes
    #[serde(deserialize_with = "lenient_string")]
    pub tcp_ack_rtt: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub icmp_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub icmp_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub icmp_seq: Option<String>,
}

impl RawCaptureEvent {
    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l.eq_ignore_ascii_case(name))
    }
}

/// Accepte une chaîne, un nombre ou un booléen JSON
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Accepte un booléen, un nombre ou une chaîne ; une valeur illisible vaut absente (`false`)
fn lenient_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.is_some_and(|value| parse_flag(&value)))
}

/// `true`, `yes` ou `1` (casse ignorée)
pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

/// Source d'événements de capture
pub trait CaptureSource: Send {
    /// Événement suivant ; `Ok(None)` en fin de flux.
    /// Une erreur signifie que la source est devenue illisible.
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>>;

    /// Description courte pour les journaux
    fn describe(&self) -> String;
}

/// Adapte un itérateur d'événements en source de capture
pub struct IterSource<I> {
    events: I,
    label: String,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = RawCaptureEvent> + Send,
{
    pub fn new(events: I, label: impl Into<String>) -> Self {
        Self {
            events,
            label: label.into(),
        }
    }
}

impl<I> CaptureSource for IterSource<I>
where
    I: Iterator<Item = RawCaptureEvent> + Send,
{
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>> {
        Ok(self.events.next())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Format d'un fichier de capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureFormat {
    Pcap,
    Text,
    JsonLines,
}

impl CaptureFormat {
    /// Déduit le format de l'extension du fichier (texte par défaut)
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pcap") | Some("pcapng") | Some("cap") => CaptureFormat::Pcap,
            Some("jsonl") | Some("json") | Some("ndjson") => CaptureFormat::JsonLines,
            _ => CaptureFormat::Text,
        }
    }
}

impl FromStr for CaptureFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcap" | "pcapng" => Ok(CaptureFormat::Pcap),
            "text" | "txt" => Ok(CaptureFormat::Text),
            "jsonl" | "json" | "ndjson" => Ok(CaptureFormat::JsonLines),
            other => Err(format!("format de capture inconnu: {}", other)),
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureFormat::Pcap => "pcap",
            CaptureFormat::Text => "text",
            CaptureFormat::JsonLines => "jsonl",
        };
        f.write_str(name)
    }
}

/// Ouvre une source de capture fichier
pub fn open_source(path: &Path, format: Option<CaptureFormat>) -> Result<Box<dyn CaptureSource>> {
    let format = format.unwrap_or_else(|| CaptureFormat::from_path(path));
    log::info!("Ouverture de {} (format {})", path.display(), format);

    match format {
        CaptureFormat::Pcap => Ok(Box::new(PcapFileSource::open(path)?)),
        CaptureFormat::Text => Ok(Box::new(TextLogSource::open(path)?)),
        CaptureFormat::JsonLines => Ok(Box::new(JsonLinesSource::open(path)?)),
    }
}
