use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DEFAULT_Z_SCORE_THRESHOLD;

/// Anomalies détectées par série, indexées par nom de série
pub type AnomalyMap = BTreeMap<String, AnomalySet>;

/// Valeurs d'une série dont le z-score dépasse le seuil, dans l'ordre d'origine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalySet {
    pub values: Vec<f64>,
    pub mean: f64,
    pub std_dev: f64,
    pub threshold: f64,
    pub sample_count: usize,
}

impl AnomalySet {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Moyenne et écart-type de population
pub fn mean_and_std_dev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn is_constant(samples: &[f64]) -> bool {
    match samples.first() {
        Some(first) => samples.iter().all(|x| x == first),
        None => true,
    }
}

/// Renvoie les valeurs telles que |(x - moyenne) / écart-type| > `threshold`.
///
/// Une série constante ne contient aucune anomalie, quel que soit le seuil.
/// L'écart-type calculé sur une telle série peut être un résidu d'arrondi non nul.
pub fn detect_anomalies(samples: &[f64], threshold: f64) -> AnomalySet {
    let (mean, mut std_dev) = mean_and_std_dev(samples);
    if is_constant(samples) {
        std_dev = 0.0;
    }

    let values = if std_dev > 0.0 && std_dev.is_finite() {
        samples
            .iter()
            .copied()
            .filter(|x| ((x - mean) / std_dev).abs() > threshold)
            .collect()
    } else {
        Vec::new()
    };

    AnomalySet {
        values,
        mean,
        std_dev,
        threshold,
        sample_count: samples.len(),
    }
}

/// Détecteur z-score à seuil fixe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScoreDetector {
    threshold: f64,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self::new(DEFAULT_Z_SCORE_THRESHOLD)
    }
}

impl ZScoreDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, samples: &[f64]) -> AnomalySet {
        detect_anomalies(samples, self.threshold)
    }

    /// Applique le détecteur à chaque série nommée ; les séries vides sont ignorées
    pub fn detect_all<'a, I>(&self, series: I) -> AnomalyMap
    where
        I: IntoIterator<Item = (&'a str, &'a [f64])>,
    {
        series
            .into_iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(name, samples)| (name.to_string(), self.detect(samples)))
            .collect()
    }
}
