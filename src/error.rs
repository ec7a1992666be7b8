use crate::models::PacketType;
use thiserror::Error;

/// Erreurs du pipeline de métriques
///
/// Les deux premières variantes sont locales à un enregistrement : l'orchestrateur
/// les journalise puis continue le lot. Les autres remontent à l'appelant.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// L'événement ne possède ni couche IP ni couche transport reconnue
    #[error("enregistrement non classifiable: {0}")]
    UnclassifiedRecord(String),

    /// Champ numérique ou horodatage illisible (ou absent)
    #[error("champ {field} invalide: {value:?}")]
    MalformedField { field: &'static str, value: String },

    /// Dénominateur nul ou négatif fourni à une finalisation
    #[error("dénominateur invalide pour {protocol}: {value}")]
    InvalidDenominator { protocol: PacketType, value: i64 },

    /// La source de capture ne peut pas être ouverte ou lue
    #[error("source de capture indisponible: {0}")]
    SourceUnavailable(String),

    /// Un puits (persistance ou rendu) a refusé une écriture
    #[error("échec du puits {sink}: {reason}")]
    SinkFailure { sink: &'static str, reason: String },

    #[error("erreur d'entrée/sortie: {0}")]
    Io(#[from] std::io::Error),
}

impl MetricsError {
    pub fn malformed(field: &'static str, value: impl Into<String>) -> Self {
        Self::MalformedField {
            field,
            value: value.into(),
        }
    }

    pub fn sink(sink: &'static str, reason: impl ToString) -> Self {
        Self::SinkFailure {
            sink,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MetricsError>;
