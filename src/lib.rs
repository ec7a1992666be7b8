//! Bibliothèque zmetrics : métriques de performance du trafic réseau capturé
//!
//! À partir d'une capture enregistrée, le pipeline classe chaque paquet par
//! protocole (UDP, TCP, ICMP, OTHER), calcule les indicateurs propres à chaque
//! famille (débit, perte, durée, retransmissions, RTT, latence écho) puis
//! signale les échantillons anormaux par z-score.

// Modèle et erreurs
pub mod error;  // Taxonomie des erreurs du pipeline
pub mod models; // Enregistrements, instantanés et rapport

// Configuration et journalisation
pub mod config;   // Configuration du système
pub mod log_mode; // Modes de journalisation
pub mod logger;   // Journalisation des événements

// Chaîne de traitement
pub mod capture;      // Sources de capture (pcap, texte, JSON lines, synthétique)
pub mod classifier;   // Classification par protocole
pub mod accumulators; // Accumulateurs UDP / TCP / ICMP
pub mod anomaly;      // Détection d'anomalies par z-score
pub mod pipeline;     // Orchestration d'une exécution

// Puits
pub mod persistence; // Stockage des enregistrements (SQLite)
pub mod render;      // Rendu du tableau de métriques
pub mod api;         // API HTTP en lecture seule

// Re-export des structures principales pour faciliter l'utilisation
pub use config::Config;
pub use error::{MetricsError, Result};
pub use log_mode::LogMode;
pub use models::{MetricsReport, MetricsSnapshot, PacketRecord, PacketType};
pub use pipeline::{Pipeline, RunOutcome};
