use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::anomaly::AnomalyMap;
use crate::error::{MetricsError, Result};
use crate::models::PacketType;
use crate::persistence::{PersistenceSink, RecordFilter, TrafficRow};
use crate::render::{RenderedReport, SharedReportRenderer};

/// État partagé des routes : dernier rapport et, si configurée, la base
#[derive(Clone)]
pub struct ApiState {
    pub report: SharedReportRenderer,
    pub store: Option<Arc<dyn PersistenceSink>>,
}

impl ApiState {
    pub fn new(report: SharedReportRenderer, store: Option<Arc<dyn PersistenceSink>>) -> Self {
        Self { report, store }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }

    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
            data: None,
        })
    }
}

/// Paramètres de `GET /api/v1/records`
#[derive(Debug, Default, Deserialize)]
pub struct RecordsQuery {
    pub protocol: Option<String>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/metrics", get(get_metrics))
        .route("/api/v1/anomalies", get(get_anomalies))
        .route("/api/v1/records", get(get_records))
        .with_state(state)
}

/// Sert l'API jusqu'à Ctrl+C
pub async fn serve(addr: SocketAddr, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API disponible sur http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Arrêt de l'API demandé");
        })
        .await?;

    Ok(())
}

async fn get_metrics(State(state): State<ApiState>) -> Json<ApiResponse<RenderedReport>> {
    match state.report.latest() {
        Some(report) => ApiResponse::ok("Dernier rapport", report),
        None => ApiResponse::error("Aucun rapport disponible"),
    }
}

async fn get_anomalies(State(state): State<ApiState>) -> Json<ApiResponse<AnomalyMap>> {
    match state.report.latest() {
        Some(report) => ApiResponse::ok("Anomalies du dernier rapport", report.anomalies.unwrap_or_default()),
        None => ApiResponse::error("Aucun rapport disponible"),
    }
}

async fn get_records(
    State(state): State<ApiState>,
    Query(params): Query<RecordsQuery>,
) -> Json<ApiResponse<Vec<TrafficRow>>> {
    let Some(store) = state.store.clone() else {
        return ApiResponse::error("Persistance désactivée");
    };

    let protocol = match params.protocol.as_deref().map(str::parse::<PacketType>) {
        None => None,
        Some(Ok(protocol)) => Some(protocol),
        Some(Err(e)) => return ApiResponse::error(e),
    };
    let filter = RecordFilter {
        protocol,
        min_length: params.min_length,
        max_length: params.max_length,
    };

    // rusqlite est bloquant
    let result = tokio::task::spawn_blocking(move || store.query(&filter))
        .await
        .map_err(|e| MetricsError::sink("api", e));

    match result.and_then(|rows| rows) {
        Ok(rows) => {
            let count = rows.len();
            ApiResponse::ok(format!("{} enregistrements trouvés", count), rows)
        }
        Err(e) => ApiResponse::error(format!("Erreur lors de la requête: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricsReport, PacketRecord};
    use crate::persistence::MemoryStore;
    use crate::render::{MetricsTable, RenderSink};
    use chrono::Utc;

    fn state_with_store() -> ApiState {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .store_batch(&[
                PacketRecord::new(now, PacketType::Udp, 200, "a", "b"),
                PacketRecord::new(now, PacketType::Tcp, 60, "a", "b"),
            ])
            .unwrap();
        ApiState::new(SharedReportRenderer::new(), Some(Arc::new(store)))
    }

    #[tokio::test]
    async fn test_metrics_before_and_after_render() {
        let state = state_with_store();
        let Json(empty) = get_metrics(State(state.clone())).await;
        assert!(!empty.success);

        let table = MetricsTable::from_report(&MetricsReport::default());
        state.report.render(&table, Some(&AnomalyMap::new())).unwrap();

        let Json(response) = get_metrics(State(state.clone())).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap().table, table);

        let Json(anomalies) = get_anomalies(State(state)).await;
        assert!(anomalies.success);
        assert!(anomalies.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_filtered() {
        let state = state_with_store();
        let query = RecordsQuery {
            protocol: Some("udp".to_string()),
            ..Default::default()
        };
        let Json(response) = get_records(State(state.clone()), Query(query)).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap().len(), 1);

        let bad = RecordsQuery {
            protocol: Some("arp".to_string()),
            ..Default::default()
        };
        let Json(response) = get_records(State(state), Query(bad)).await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_records_without_store() {
        let state = ApiState::new(SharedReportRenderer::new(), None);
        let Json(response) = get_records(State(state), Query(RecordsQuery::default())).await;
        assert!(!response.success);
    }
}
