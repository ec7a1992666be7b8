use crate::log_mode::LogMode;
use crate::models::PacketRecord;
use log::error;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Initialise le logger global selon le mode configuré
pub fn init_logging(log_mode: LogMode, log_level: &str) {
    match log_mode {
        LogMode::File => {
            let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
                .try_init();
        }
        LogMode::SystemdJournal => {
            #[cfg(feature = "systemd")]
            {
                use systemd_journal_logger::JournalLog;

                let level = match log_level.to_lowercase().as_str() {
                    "trace" => log::LevelFilter::Trace,
                    "debug" => log::LevelFilter::Debug,
                    "warn" => log::LevelFilter::Warn,
                    "error" => log::LevelFilter::Error,
                    _ => log::LevelFilter::Info,
                };

                match JournalLog::new() {
                    Ok(logger) => {
                        if let Err(e) = logger
                            .with_syslog_identifier("zmetrics".to_string())
                            .install()
                        {
                            eprintln!("Erreur lors de l'installation du logger systemd: {}", e);
                            let _ = env_logger::Builder::from_env(
                                env_logger::Env::default().default_filter_or(log_level),
                            )
                            .try_init();
                        } else {
                            log::set_max_level(level);
                        }
                    }
                    Err(e) => {
                        eprintln!("Erreur lors de l'initialisation du logger systemd: {}", e);
                        let _ = env_logger::Builder::from_env(
                            env_logger::Env::default().default_filter_or(log_level),
                        )
                        .try_init();
                    }
                }
            }

            #[cfg(not(feature = "systemd"))]
            {
                eprintln!("AVERTISSEMENT: le mode SystemdJournal n'est pas disponible (feature 'systemd' non activée). Utilisation du logger standard.");
                let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
                    .try_init();
            }
        }
    }
}

/// Journal d'audit des enregistrements classifiés, une ligne par paquet
pub struct RecordLogger {
    log_file: Mutex<Option<File>>,
    log_path: String,
}

impl RecordLogger {
    pub fn new(log_path: String) -> Self {
        if let Some(parent) = Path::new(&log_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Erreur lors de la création du répertoire de logs: {}", e);
                }
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => Some(file),
            Err(e) => {
                error!("Erreur lors de l'ouverture du fichier de log {}: {}", log_path, e);
                None
            }
        };

        Self {
            log_file: Mutex::new(file),
            log_path,
        }
    }

    pub fn path(&self) -> &str {
        &self.log_path
    }

    pub fn log_record(&self, record: &PacketRecord) {
        let line = format!(
            "[{}] {} -> {} | Protocol: {} | Length: {} bytes\n",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            record.source,
            record.destination,
            record.protocol,
            record.length,
        );
        self.write_to_log(&line);
    }

    fn write_to_log(&self, message: &str) {
        let mut guard = match self.log_file.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!("Erreur lors de l'acquisition du verrou pour le fichier de log: {}", e);
                return;
            }
        };

        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(message.as_bytes()) {
                error!("Erreur lors de l'écriture dans le fichier de log: {}", e);

                // Essayer de réouvrir le fichier
                *guard = match OpenOptions::new().create(true).append(true).open(&self.log_path) {
                    Ok(file) => Some(file),
                    Err(e) => {
                        error!("Erreur lors de la réouverture du fichier de log: {}", e);
                        None
                    }
                };
            }
        }
    }
}
