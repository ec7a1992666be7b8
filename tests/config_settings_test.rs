use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::RwLock;
use zmetrics::config::{Config, Precision};
use zmetrics::LogMode;

#[tokio::test]
async fn test_update_settings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    let config_arc = Arc::new(RwLock::new(Config::load_from(&path).unwrap()));

    // Test 1: Définir le nombre de paquets émis
    {
        let mut config = config_arc.write().await;
        config.sent_packets = Some(20);
        assert_eq!(config.sent_packets, Some(20));
    }

    // Test 2: Changer le seuil et la précision du débit
    {
        let mut config = config_arc.write().await;
        config.z_score_threshold = 2.5;
        config.precision = Precision {
            throughput: 6,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    // Test 3: Passer en journalisation systemd
    {
        let mut config = config_arc.write().await;
        config.log_mode = LogMode::SystemdJournal;
        config.save_to(&path).unwrap();
    }

    // Test 4: Relire le fichier sauvegardé
    let reloaded = Config::load_from(&path).unwrap();
    assert_eq!(reloaded.sent_packets, Some(20));
    assert_eq!(reloaded.z_score_threshold, 2.5);
    assert_eq!(reloaded.precision.throughput, 6);
    assert_eq!(reloaded.precision.latency, 2);
    assert_eq!(reloaded.log_mode, LogMode::SystemdJournal);
}

#[tokio::test]
async fn test_invalid_queue_size_rejected() {
    let config = Config {
        queue_size: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
