use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use zmetrics::capture::CaptureFormat;
use zmetrics::models::PacketType;

#[derive(Parser, Debug)]
#[command(name = "zmetrics")]
#[command(author, version, about = "Métriques de performance du trafic réseau capturé")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Fichier de configuration (défaut: /etc/zmetrics/config.json s'il existe)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Niveau de log (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Options communes aux commandes qui analysent une capture
#[derive(clap::Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Fichier de capture (pcap, journal texte ou JSON lines)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Format du fichier (déduit de l'extension sinon)
    #[arg(short, long)]
    pub format: Option<CaptureFormat>,

    /// Nombre de paquets émis, pour la perte UDP
    #[arg(short, long)]
    pub sent_packets: Option<i64>,

    /// Seuil z-score des anomalies
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Base SQLite où persister les enregistrements
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Ne pas persister les enregistrements
    #[arg(long)]
    pub no_db: bool,

    /// Écrire le rapport JSON dans ce fichier
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Une tâche d'accumulation par protocole
    #[arg(long)]
    pub parallel: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyser une capture et afficher les métriques
    Analyze {
        #[command(flatten)]
        args: AnalyzeArgs,

        /// Afficher le rapport complet en JSON au lieu du tableau
        #[arg(long)]
        json: bool,
    },

    /// Interroger les enregistrements persistés
    Query {
        /// Base SQLite
        #[arg(long)]
        db: Option<PathBuf>,

        /// Protocole (UDP, TCP, ICMP, OTHER)
        #[arg(short, long)]
        protocol: Option<PacketType>,

        /// Longueur minimale (octets)
        #[arg(long)]
        min_length: Option<u64>,

        /// Longueur maximale (octets)
        #[arg(long)]
        max_length: Option<u64>,
    },

    /// Créer la base et la table traffic_records si absentes
    InitDb {
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Générer une capture synthétique au format JSON lines
    Simulate {
        /// Fichier de sortie
        #[arg(short, long)]
        output: PathBuf,

        /// Nombre de paquets
        #[arg(short = 'n', long, default_value = "20")]
        count: u64,

        /// Graine du générateur
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Analyser une capture puis servir le rapport en HTTP
    Serve {
        #[command(flatten)]
        args: AnalyzeArgs,

        /// Adresse d'écoute
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
}
