use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::log_mode::LogMode;

pub const CONFIG_FILE: &str = "/etc/zmetrics/config.json";

/// Décimales du débit (Mbps)
pub const THROUGHPUT_DECIMALS: u32 = 4;
/// Décimales de toutes les autres métriques
pub const DEFAULT_DECIMALS: u32 = 2;
/// Seuil z-score par défaut du détecteur d'anomalies
pub const DEFAULT_Z_SCORE_THRESHOLD: f64 = 3.0;

/// Nombre de décimales conservées pour chaque métrique
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Precision {
    pub throughput: u32,
    pub packet_loss: u32,
    pub duration: u32,
    pub packet_size: u32,
    pub rtt: u32,
    pub latency: u32,
    pub loss_rate: u32,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            throughput: THROUGHPUT_DECIMALS,
            packet_loss: DEFAULT_DECIMALS,
            duration: DEFAULT_DECIMALS,
            packet_size: DEFAULT_DECIMALS,
            rtt: DEFAULT_DECIMALS,
            latency: DEFAULT_DECIMALS,
            loss_rate: DEFAULT_DECIMALS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Nombre de paquets émis par le générateur (requis pour la perte UDP)
    pub sent_packets: Option<i64>,

    /// Seuil |z| au-delà duquel un échantillon est anormal
    pub z_score_threshold: f64,

    /// Précision d'arrondi par métrique
    pub precision: Precision,

    /// Taille de la file bornée entre classification et accumulation
    pub queue_size: usize,

    /// Une tâche par accumulateur de protocole
    pub parallel_accumulation: bool,

    /// Durée de vie (secondes) d'une requête écho non appariée, si définie
    pub echo_ttl_secs: Option<u64>,

    /// Chemin de la base SQLite des enregistrements
    pub database_path: String,

    /// Niveau de log
    pub log_level: String,

    /// Mode de journalisation (stderr ou systemd-journal)
    pub log_mode: LogMode,

    /// Journal des enregistrements classifiés, un par ligne
    pub record_log_file: Option<String>,

    /// Rapport JSON écrit à la fin de l'analyse
    pub report_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sent_packets: None,
            z_score_threshold: DEFAULT_Z_SCORE_THRESHOLD,
            precision: Precision::default(),
            queue_size: 1024,
            parallel_accumulation: false,
            echo_ttl_secs: None,
            database_path: "traffic_records.db".to_string(),
            log_level: "info".to_string(),
            log_mode: LogMode::File,
            record_log_file: None,
            report_file: None,
        }
    }
}

impl Config {
    /// Charge la configuration depuis le fichier par défaut
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Charge la configuration ; crée le fichier avec les valeurs par défaut s'il n'existe pas
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let default_config = Config::default();
            default_config.save_to(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Impossible de lire {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Configuration invalide dans {}", path.display()))?;
        config.validate()?;

        Ok(config)
    }

    /// Sauvegarde la configuration dans le fichier
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Impossible de créer {}", parent.display()))?;
            }
        }

        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(path, config_json)
            .with_context(|| format!("Impossible d'écrire {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.z_score_threshold.is_finite() || self.z_score_threshold <= 0.0 {
            bail!("z_score_threshold doit être strictement positif ({})", self.z_score_threshold);
        }
        if self.queue_size == 0 {
            bail!("queue_size doit être supérieur à zéro");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_precision() {
        let precision = Precision::default();
        assert_eq!(precision.throughput, 4);
        assert_eq!(precision.packet_loss, 2);
        assert_eq!(precision.latency, 2);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.z_score_threshold, 3.0);
        assert_eq!(config.sent_packets, None);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "sent_packets": 20, "precision": { "throughput": 6 } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sent_packets, Some(20));
        assert_eq!(config.precision.throughput, 6);
        assert_eq!(config.precision.duration, 2);
        assert_eq!(config.queue_size, 1024);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "z_score_threshold": 0.0 }"#).unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
