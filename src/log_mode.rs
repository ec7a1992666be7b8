use serde::{Deserialize, Serialize};

/// Destination des journaux du binaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogMode {
    /// Sortie standard d'erreur via env_logger
    #[default]
    File,
    /// Journal via systemd-journal (feature `systemd`)
    SystemdJournal,
}
