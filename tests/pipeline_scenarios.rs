use chrono::{TimeZone, Utc};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

use zmetrics::capture::{open_source, CaptureFormat, CaptureSource, IterSource, RawCaptureEvent, SyntheticConfig, SyntheticTraffic};
use zmetrics::classifier::classify;
use zmetrics::config::Config;
use zmetrics::error::{MetricsError, Result};
use zmetrics::models::{PacketRecord, PacketType};
use zmetrics::persistence::{MemoryStore, PersistenceSink, RecordFilter, SqliteStore, TrafficRow};
use zmetrics::pipeline::{Pipeline, PACKET_LENGTH_SERIES};
use zmetrics::render::SharedReportRenderer;

const BASE_SECONDS: u64 = 1_700_000_000;

fn close_enough(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn event(offset_ms: u64, layers: &[&str], length: u64) -> RawCaptureEvent {
    let seconds = BASE_SECONDS + offset_ms / 1000;
    let nanos = (offset_ms % 1000) * 1_000_000;
    RawCaptureEvent {
        timestamp: Some(format!("{}.{:09}", seconds, nanos)),
        layers: layers.iter().map(|l| l.to_string()).collect(),
        length: Some(length.to_string()),
        source: Some("192.168.1.9".to_string()),
        destination: Some("192.168.1.1".to_string()),
        ..Default::default()
    }
}

fn echo(offset_ms: u64, icmp_type: &str, sequence: u16) -> RawCaptureEvent {
    let mut e = event(offset_ms, &["eth", "ip", "icmp"], 98);
    e.icmp_type = Some(icmp_type.to_string());
    e.icmp_id = Some("1".to_string());
    e.icmp_seq = Some(sequence.to_string());
    e
}

fn source(events: Vec<RawCaptureEvent>) -> Box<dyn CaptureSource> {
    Box::new(IterSource::new(events.into_iter(), "événements de test"))
}

fn udp_events() -> Vec<RawCaptureEvent> {
    // 18 datagrammes de 200 octets sur 2,0 s
    (0..18u64)
        .map(|i| event(i * 2000 / 17, &["eth", "ip", "udp"], 200))
        .collect()
}

fn tcp_events() -> Vec<RawCaptureEvent> {
    let rtts = ["0.010", "0.020", "0.030", "0.040"];
    (0..10u64)
        .map(|i| {
            let mut e = event(i * 5, &["eth", "ip", "tcp"], 60);
            e.tcp_retransmission = matches!(i, 1 | 4 | 7);
            if let Some(rtt) = rtts.get(i as usize) {
                e.tcp_ack_rtt = Some(rtt.to_string());
            }
            e
        })
        .collect()
}

fn config_with_sent(sent: i64) -> Config {
    Config {
        sent_packets: Some(sent),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_udp_reference_run() {
    let pipeline = Pipeline::new(config_with_sent(20));
    let outcome = pipeline.run(source(udp_events())).await.unwrap();

    let udp = outcome.report.udp().unwrap();
    assert!(close_enough(udp.packet_loss_pct, 10.0));
    assert!(close_enough(udp.avg_packet_size, 200.0));
    assert!(close_enough(udp.throughput_mbps, 0.0144));
    assert!(close_enough(udp.duration_secs, 2.0));
    assert!(outcome.sink_errors.is_empty());
}

#[tokio::test]
async fn test_icmp_matched_echoes() {
    let events: Vec<_> = (0..5u16)
        .flat_map(|seq| {
            let t = u64::from(seq) * 1000;
            [echo(t, "8", seq), echo(t + 10, "0", seq)]
        })
        .collect();

    let outcome = Pipeline::new(Config::default()).run(source(events)).await.unwrap();
    let icmp = outcome.report.icmp().unwrap();
    assert!(close_enough(icmp.loss_rate_pct, 0.0));
    assert_eq!(icmp.latency_count, 5);
    assert!(close_enough(icmp.average_latency_ms, 10.0));
}

#[tokio::test]
async fn test_icmp_unsolicited_reply_is_not_clamped() {
    let mut events: Vec<_> = (0..5u16)
        .flat_map(|seq| {
            let t = u64::from(seq) * 1000;
            [echo(t, "8", seq), echo(t + 10, "0", seq)]
        })
        .collect();
    events.push(echo(6000, "0", 42));

    let outcome = Pipeline::new(Config::default()).run(source(events)).await.unwrap();
    let icmp = outcome.report.icmp().unwrap();
    assert!(close_enough(icmp.loss_rate_pct, -20.0));
    assert_eq!(icmp.reply_count, 6);
}

#[tokio::test]
async fn test_udp_loss_is_clamped() {
    let outcome = Pipeline::new(config_with_sent(10))
        .run(source(udp_events()))
        .await
        .unwrap();
    assert!(close_enough(outcome.report.udp().unwrap().packet_loss_pct, 0.0));
}

#[tokio::test]
async fn test_tcp_retransmissions_and_rtt() {
    let outcome = Pipeline::new(Config::default()).run(source(tcp_events())).await.unwrap();
    let tcp = outcome.report.tcp().unwrap();
    assert_eq!(tcp.retransmissions, 3);
    assert!(close_enough(tcp.average_rtt_ms, 25.0));
    assert_eq!(tcp.rtt_sample_count, 4);
}

#[tokio::test]
async fn test_missing_sent_packets_fails_udp_only() {
    let mut events = udp_events();
    events.extend(tcp_events());

    let outcome = Pipeline::new(Config::default()).run(source(events)).await.unwrap();
    let report = outcome.report;
    assert!(report.udp().is_none());
    assert!(report.failures.contains_key(&PacketType::Udp));
    assert_eq!(report.tcp().unwrap().retransmissions, 3);
    assert_eq!(report.summary.per_protocol.get(&PacketType::Udp), Some(&18));
}

#[tokio::test]
async fn test_bad_records_are_skipped() {
    let mut events = udp_events();
    let mut bad_length = event(500, &["ip", "udp"], 0);
    bad_length.length = Some("abc".to_string());
    events.insert(3, bad_length);
    events.insert(5, event(600, &["eth", "arp"], 42));
    events.insert(7, event(700, &["ip", "igmp"], 46));

    let outcome = Pipeline::new(config_with_sent(20)).run(source(events)).await.unwrap();
    let summary = &outcome.report.summary;
    assert_eq!(summary.events_read, 21);
    assert_eq!(summary.records_classified, 19);
    assert_eq!(summary.skipped_malformed, 1);
    assert_eq!(summary.skipped_unclassified, 1);
    assert_eq!(summary.warnings.len(), 2);
    assert_eq!(summary.per_protocol.get(&PacketType::Other), Some(&1));
    assert_eq!(outcome.report.udp().unwrap().captured_packets, 18);
}

#[tokio::test]
async fn test_constant_lengths_have_no_anomaly() {
    let outcome = Pipeline::new(config_with_sent(20)).run(source(udp_events())).await.unwrap();
    let lengths = outcome.report.anomalies.get(PACKET_LENGTH_SERIES).unwrap();
    assert!(lengths.is_empty());
    assert_eq!(lengths.sample_count, 18);
}

#[tokio::test]
async fn test_length_outlier_flagged() {
    let mut events: Vec<_> = (0..20u64).map(|i| event(i * 10, &["ip", "udp"], 10)).collect();
    events.push(event(300, &["ip", "udp"], 100));

    let outcome = Pipeline::new(config_with_sent(21)).run(source(events)).await.unwrap();
    let lengths = outcome.report.anomalies.get(PACKET_LENGTH_SERIES).unwrap();
    assert_eq!(lengths.values, vec![100.0]);
}

#[tokio::test]
async fn test_persistence_round_trip_in_order() {
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let mut events = udp_events();
    events.extend(tcp_events());
    let expected: Vec<TrafficRow> = events
        .iter()
        .map(|e| TrafficRow::from(&classify(e).unwrap()))
        .collect();

    let pipeline = Pipeline::new(config_with_sent(20)).with_persistence(store.clone());
    let outcome = pipeline.run(source(events)).await.unwrap();
    assert!(outcome.sink_errors.is_empty());

    let rows = store.query(&RecordFilter::default()).unwrap();
    assert_eq!(rows, expected);

    let tcp_rows = store
        .query(&RecordFilter {
            protocol: Some(PacketType::Tcp),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(tcp_rows.len(), 10);
}

/// Source qui devient illisible après quelques événements
struct BrokenSource {
    remaining: u32,
}

impl CaptureSource for BrokenSource {
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>> {
        if self.remaining == 0 {
            return Err(MetricsError::SourceUnavailable("lecture impossible".to_string()));
        }
        self.remaining -= 1;
        Ok(Some(event(u64::from(self.remaining), &["ip", "udp"], 100)))
    }

    fn describe(&self) -> String {
        "source défaillante".to_string()
    }
}

#[tokio::test]
async fn test_source_unavailable_gives_no_partial_report() {
    let store = Arc::new(MemoryStore::new());
    let renderer = SharedReportRenderer::new();
    let pipeline = Pipeline::new(config_with_sent(5))
        .with_persistence(store.clone())
        .with_renderer(Arc::new(renderer.clone()));

    let result = pipeline.run(Box::new(BrokenSource { remaining: 3 })).await;
    assert!(matches!(result, Err(MetricsError::SourceUnavailable(_))));
    assert!(store.query(&RecordFilter::default()).unwrap().is_empty());
    assert!(renderer.latest().is_none());
}

#[tokio::test]
async fn test_missing_capture_file() {
    let result = open_source(std::path::Path::new("/nonexistent/traffics.txt"), Some(CaptureFormat::Text));
    assert!(matches!(result, Err(MetricsError::SourceUnavailable(_))));
}

/// Puits qui refuse toute écriture
struct RejectingStore;

impl PersistenceSink for RejectingStore {
    fn name(&self) -> &'static str {
        "rejet"
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn store_batch(&self, _records: &[PacketRecord]) -> Result<usize> {
        Err(MetricsError::sink("rejet", "disque plein"))
    }

    fn query(&self, _filter: &RecordFilter) -> Result<Vec<TrafficRow>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_sink_failure_keeps_report() {
    let renderer = SharedReportRenderer::new();
    let pipeline = Pipeline::new(config_with_sent(20))
        .with_persistence(Arc::new(RejectingStore))
        .with_renderer(Arc::new(renderer.clone()));

    let outcome = pipeline.run(source(udp_events())).await.unwrap();
    assert_eq!(outcome.sink_errors.len(), 1);
    assert!(matches!(outcome.sink_errors[0], MetricsError::SinkFailure { .. }));
    assert!(close_enough(outcome.report.udp().unwrap().packet_loss_pct, 10.0));

    // Le rendu a lieu malgré l'échec de la persistance
    let rendered = renderer.latest().unwrap();
    assert_eq!(rendered.table.get(PacketType::Udp, "Packet Loss (%)"), Some(10.0));
}

#[tokio::test]
async fn test_parallel_matches_sequential() {
    let start = Utc.timestamp_opt(BASE_SECONDS as i64, 0).unwrap();
    let synthetic = || {
        let traffic = SyntheticTraffic::starting_at(
            SyntheticConfig {
                packet_count: 500,
                seed: 7,
                ..Default::default()
            },
            start,
        );
        Box::new(traffic) as Box<dyn CaptureSource>
    };

    let sequential = Pipeline::new(Config {
        queue_size: 1,
        ..config_with_sent(500)
    })
    .run(synthetic())
    .await
    .unwrap();

    let parallel = Pipeline::new(Config {
        parallel_accumulation: true,
        queue_size: 8,
        ..config_with_sent(500)
    })
    .run(synthetic())
    .await
    .unwrap();

    assert_eq!(sequential.report.snapshots, parallel.report.snapshots);
    assert_eq!(sequential.report.anomalies, parallel.report.anomalies);
    assert_eq!(sequential.report.summary, parallel.report.summary);
    assert_eq!(sequential.report.summary.records_classified, 500);
}

#[tokio::test]
async fn test_pipeline_reused_with_fresh_source() {
    let pipeline = Pipeline::new(config_with_sent(20));
    let first = pipeline.run(source(udp_events())).await.unwrap();
    let second = pipeline.run(source(udp_events())).await.unwrap();
    assert_eq!(first.report.snapshots, second.report.snapshots);
    assert_eq!(second.report.udp().unwrap().captured_packets, 18);
}

#[tokio::test]
async fn test_text_log_end_to_end() {
    let mut file = NamedTempFile::new().unwrap();
    // 17 datagrammes dans la première seconde, le dernier à +2,0 s
    for i in 0..18u32 {
        let time = if i == 17 {
            "2024-01-01 10:00:02.000000".to_string()
        } else {
            format!("2024-01-01 10:00:00.{:06}", i * 50_000)
        };
        writeln!(
            file,
            "Time: {}, Protocol: UDP, Length: 200, Source: 192.168.1.9, Destination: 192.168.1.1",
            time
        )
        .unwrap();
    }
    writeln!(file, "Time: 2024-01-01 10:00:01.500000, Protocol: ARP, Length: 42, Source: a, Destination: b").unwrap();

    let source = open_source(file.path(), Some(CaptureFormat::Text)).unwrap();
    let outcome = Pipeline::new(config_with_sent(20)).run(source).await.unwrap();

    let udp = outcome.report.udp().unwrap();
    assert_eq!(udp.captured_packets, 18);
    assert!(close_enough(udp.packet_loss_pct, 10.0));
    assert!(close_enough(udp.avg_packet_size, 200.0));
    assert!(close_enough(udp.duration_secs, 2.0));
    assert!(close_enough(udp.throughput_mbps, 0.0144));
    assert_eq!(outcome.report.summary.skipped_unclassified, 1);
}
