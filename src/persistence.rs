use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MetricsError, Result};
use crate::models::{PacketRecord, PacketType};

const SQLITE_SINK: &str = "sqlite";
const MEMORY_SINK: &str = "mémoire";

/// Ligne persistée : les cinq colonnes communes à tous les protocoles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRow {
    pub time: String,
    pub protocol: String,
    pub length: u64,
    pub source: String,
    pub destination: String,
}

impl From<&PacketRecord> for TrafficRow {
    fn from(record: &PacketRecord) -> Self {
        Self {
            time: record
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            protocol: record.protocol.to_string(),
            length: record.length,
            source: record.source.clone(),
            destination: record.destination.clone(),
        }
    }
}

impl fmt::Display for TrafficRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {}, Protocol: {}, Length: {}, Source: {}, Destination: {}",
            self.time, self.protocol, self.length, self.source, self.destination
        )
    }
}

/// Filtre de lecture ; un critère absent ne filtre rien
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub protocol: Option<PacketType>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
}

impl RecordFilter {
    pub fn matches(&self, row: &TrafficRow) -> bool {
        self.protocol
            .map_or(true, |p| row.protocol.eq_ignore_ascii_case(p.as_str()))
            && self.min_length.map_or(true, |min| row.length >= min)
            && self.max_length.map_or(true, |max| row.length <= max)
    }
}

/// Puits de persistance des enregistrements classifiés
pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Crée le stockage s'il n'existe pas ; peut être appelé plusieurs fois
    fn init(&self) -> Result<()>;

    /// Ajoute un lot ; renvoie le nombre de lignes écrites
    fn store_batch(&self, records: &[PacketRecord]) -> Result<usize>;

    /// Lignes correspondant au filtre, dans l'ordre d'insertion
    fn query(&self, filter: &RecordFilter) -> Result<Vec<TrafficRow>>;
}

/// Base SQLite, table `traffic_records`
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteStore {
    /// Ouvre ou crée la base au chemin donné
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| MetricsError::sink(SQLITE_SINK, format!("{}: {}", path.display(), e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            location: path.display().to_string(),
        };
        store.init()?;
        Ok(store)
    }

    /// Base en mémoire (tests)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            location: ":memory:".to_string(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM traffic_records", [], |row| row.get(0))
            .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;
        Ok(count.max(0) as u64)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MetricsError::sink(SQLITE_SINK, "verrou de connexion empoisonné"))
    }
}

impl PersistenceSink for SqliteStore {
    fn name(&self) -> &'static str {
        SQLITE_SINK
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS traffic_records (
                time TEXT NOT NULL,
                protocol TEXT NOT NULL,
                length INTEGER NOT NULL,
                source TEXT NOT NULL,
                destination TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_traffic_protocol ON traffic_records(protocol);
            "#,
        )
        .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;

        debug!("Schéma traffic_records prêt ({})", self.location);
        Ok(())
    }

    fn store_batch(&self, records: &[PacketRecord]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO traffic_records (time, protocol, length, source, destination)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;

            for record in records {
                let row = TrafficRow::from(record);
                let length = i64::try_from(row.length)
                    .map_err(|_| MetricsError::sink(SQLITE_SINK, format!("longueur hors limite: {}", row.length)))?;
                stmt.execute(params![row.time, row.protocol, length, row.source, row.destination])
                    .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;
            }
        }

        tx.commit().map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;
        info!("{} enregistrements persistés dans {}", records.len(), self.location);
        Ok(records.len())
    }

    fn query(&self, filter: &RecordFilter) -> Result<Vec<TrafficRow>> {
        let mut sql =
            String::from("SELECT time, protocol, length, source, destination FROM traffic_records WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(protocol) = filter.protocol {
            sql.push_str(" AND protocol = ?");
            values.push(Value::Text(protocol.to_string()));
        }
        if let Some(min) = filter.min_length {
            sql.push_str(" AND length >= ?");
            values.push(Value::Integer(i64::try_from(min).unwrap_or(i64::MAX)));
        }
        if let Some(max) = filter.max_length {
            sql.push_str(" AND length <= ?");
            values.push(Value::Integer(i64::try_from(max).unwrap_or(i64::MAX)));
        }
        sql.push_str(" ORDER BY rowid");

        debug!("Requête: {}", sql);

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let length: i64 = row.get(2)?;
                Ok(TrafficRow {
                    time: row.get(0)?,
                    protocol: row.get(1)?,
                    length: length.max(0) as u64,
                    source: row.get(3)?,
                    destination: row.get(4)?,
                })
            })
            .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MetricsError::sink(SQLITE_SINK, e))?;

        Ok(rows)
    }
}

/// Stockage en mémoire, même contrat que la base SQLite
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<TrafficRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<TrafficRow>>> {
        self.rows
            .lock()
            .map_err(|_| MetricsError::sink(MEMORY_SINK, "verrou empoisonné"))
    }
}

impl PersistenceSink for MemoryStore {
    fn name(&self) -> &'static str {
        MEMORY_SINK
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn store_batch(&self, records: &[PacketRecord]) -> Result<usize> {
        let mut rows = self.lock()?;
        rows.extend(records.iter().map(TrafficRow::from));
        Ok(records.len())
    }

    fn query(&self, filter: &RecordFilter) -> Result<Vec<TrafficRow>> {
        let rows = self.lock()?;
        Ok(rows.iter().filter(|row| filter.matches(row)).cloned().collect())
    }
}
