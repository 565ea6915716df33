use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::event::{self, EventDecision};
use crate::gemini::GeminiConfig;
use crate::orchestrator::Orchestrator;
use crate::pipeline::OcrPipeline;
use crate::storage::ObjectStore;
use crate::taxonomy::SqliteRiskRepository;

/// Shared collaborators for the push endpoint. The risk repository is not
/// held here: it is routed per event from the event's bucket.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub pipeline: Arc<dyn OcrPipeline>,
    pub gemini: GeminiConfig,
    pub work_dir: PathBuf,
    pub output_bucket: Option<String>,
    pub pipeline_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pubsub/push", post(handle_push))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {addr}: {err}"))?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Push subscription endpoint. Only a malformed envelope earns a 400 and a
/// broker retry; every other outcome, including processing failure, is
/// acknowledged with 200 so the delivery-attempt ceiling stays the sole
/// retry control.
async fn handle_push(
    State(state): State<AppState>,
    Json(envelope): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let decision = match event::parse_push_envelope(&envelope) {
        Ok(decision) => decision,
        Err(err) => {
            tracing::warn!(err = format!("{err:#}"), "rejecting malformed push envelope");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("{err:#}") })),
            );
        }
    };

    let event = match decision {
        EventDecision::Ignore { reason } => {
            tracing::info!(reason, "ignoring push event");
            return (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "ignored", "reason": reason })),
            );
        }
        EventDecision::Process(event) => event,
    };

    tracing::info!(
        bucket = %event.bucket,
        object = %event.object_path,
        workspace_id = %event.workspace_id,
        project_id = %event.project_id,
        delivery_attempt = event.delivery_attempt,
        "processing push event"
    );

    let orchestrator = Orchestrator {
        store: Arc::clone(&state.store),
        pipeline: Arc::clone(&state.pipeline),
        repository: Arc::new(SqliteRiskRepository::for_bucket(&event.bucket)),
        gemini: state.gemini.clone(),
        work_dir: state.work_dir.clone(),
        output_bucket: state.output_bucket.clone(),
        pipeline_timeout: state.pipeline_timeout,
    };

    let outcome = orchestrator.process_single_pdf(&event).await;
    let body = serde_json::to_value(&outcome).unwrap_or_else(|err| {
        serde_json::json!({ "success": false, "error": format!("serialize outcome: {err}") })
    });
    (StatusCode::OK, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFsObjectStore;

    struct NeverPipeline;

    #[async_trait::async_trait]
    impl OcrPipeline for NeverPipeline {
        async fn run(
            &self,
            _pdf_path: &std::path::Path,
            _output_dir: &std::path::Path,
        ) -> anyhow::Result<crate::pipeline::PipelineSummary> {
            anyhow::bail!("pipeline must not run for these requests");
        }
    }

    fn state(dir: &std::path::Path) -> AppState {
        AppState {
            store: Arc::new(LocalFsObjectStore::new(dir.join("store"))),
            pipeline: Arc::new(NeverPipeline),
            gemini: GeminiConfig::new(
                "http://127.0.0.1:1",
                "key".to_owned(),
                "gemini-test".to_owned(),
                Duration::from_secs(1),
            )
            .unwrap(),
            work_dir: dir.join("work"),
            output_bucket: None,
            pipeline_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn malformed_envelope_is_rejected_with_400() {
        let dir = tempfile::tempdir().unwrap();
        let (status, Json(body)) =
            handle_push(State(state(dir.path())), Json(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("message"));
    }

    #[tokio::test]
    async fn ignorable_envelope_is_acknowledged_with_200() {
        use base64::Engine as _;

        let object = serde_json::json!({
            "id": "bucket/ws/proj/readme.txt/1",
            "name": "ws/proj/readme.txt",
            "bucket": "bucket",
        });
        let data = base64::engine::general_purpose::STANDARD.encode(object.to_string());
        let envelope = serde_json::json!({ "message": { "data": data } });

        let dir = tempfile::tempdir().unwrap();
        let (status, Json(body)) = handle_push(State(state(dir.path())), Json(envelope)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");
    }
}
