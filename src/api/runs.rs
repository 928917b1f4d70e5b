use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::{
    app::AppState,
    pipeline::{PipelineError, StartRun},
    store::types::RunRecord,
};

#[derive(Debug, Deserialize)]
pub(crate) struct StartRunRequest {
    #[serde(default)]
    requester_id: Option<String>,
    #[serde(default)]
    run_category: Option<String>,
    #[serde(default = "default_input")]
    input: Value,
}

fn default_input() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Serialize)]
struct StartRunResponse {
    run_id: Uuid,
    status: String,
}

#[derive(Debug, Serialize)]
struct RunStatusResponse {
    run_id: Uuid,
    name: String,
    status: String,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl RunStatusResponse {
    fn from_record(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id,
            name: record.run_category.clone(),
            status: record.status.as_str().to_string(),
            progress: record.progress(),
            error_message: record.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UnitRunsResponse {
    unit_id: String,
    runs: Vec<RunStatusResponse>,
}

#[derive(Debug, Serialize)]
struct RequesterRunsResponse {
    requester_id: String,
    runs: Vec<RunStatusResponse>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn not_found(run_id: Uuid) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("run {run_id} not found"),
        }),
    )
}

fn internal(error: &PipelineError) -> (StatusCode, Json<ErrorResponse>) {
    error!(%error, "run operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
        }),
    )
}

/// POST /v1/units/{unit_id}/runs
/// 実行レコードを作成し、チェーンを投入して202で応答する。
pub(crate) async fn start_run(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Json(payload): Json<StartRunRequest>,
) -> impl IntoResponse {
    let request = StartRun {
        unit_id,
        requester_id: payload.requester_id.unwrap_or_else(|| "api".to_string()),
        run_category: payload
            .run_category
            .unwrap_or_else(|| "thread_insight".to_string()),
        input: payload.input,
    };

    match state.orchestrator().start(request).await {
        Ok(record) => {
            let body = Json(StartRunResponse {
                run_id: record.run_id,
                status: record.status.as_str().to_string(),
            });
            (StatusCode::ACCEPTED, body).into_response()
        }
        Err(PipelineError::Internal(error)) => {
            error!(error = ?error, "failed to start run");
            let body = Json(ErrorResponse {
                error: format!("failed to start run: {error:#}"),
            });
            (StatusCode::BAD_REQUEST, body).into_response()
        }
        Err(error @ PipelineError::NotFound(_)) => internal(&error).into_response(),
    }
}

/// GET /v1/runs/{run_id}
pub(crate) async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator().get_status(run_id).await {
        Ok(Some(record)) => {
            (StatusCode::OK, Json(RunStatusResponse::from_record(&record))).into_response()
        }
        Ok(None) => not_found(run_id).into_response(),
        Err(error) => internal(&error).into_response(),
    }
}

/// POST /v1/runs/{run_id}/cancel
/// 既に終端状態の実行に対しても成功として応答する。
pub(crate) async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator().cancel(run_id).await {
        Ok(()) => {
            let body = Json(serde_json::json!({ "status": "cancellation_requested" }));
            (StatusCode::OK, body).into_response()
        }
        Err(PipelineError::NotFound(_)) => not_found(run_id).into_response(),
        Err(error) => internal(&error).into_response(),
    }
}

/// GET /v1/runs/{run_id}/cluster
pub(crate) async fn get_cluster_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator().get_cluster_run(run_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => not_found(run_id).into_response(),
        Err(error) => internal(&error).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListRunsQuery {
    #[serde(default)]
    category: Option<String>,
}

/// GET /v1/units/{unit_id}/runs
pub(crate) async fn list_unit_runs(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Query(query): Query<ListRunsQuery>,
) -> impl IntoResponse {
    match state
        .orchestrator()
        .list_runs_by_unit(&unit_id, query.category.as_deref())
        .await
    {
        Ok(records) => {
            let runs = records.iter().map(RunStatusResponse::from_record).collect();
            (StatusCode::OK, Json(UnitRunsResponse { unit_id, runs })).into_response()
        }
        Err(error) => internal(&error).into_response(),
    }
}

/// GET /v1/requesters/{requester_id}/runs
pub(crate) async fn list_requester_runs(
    State(state): State<AppState>,
    Path(requester_id): Path<String>,
) -> impl IntoResponse {
    match state
        .orchestrator()
        .list_runs_by_requester(&requester_id)
        .await
    {
        Ok(records) => {
            let runs = records.iter().map(RunStatusResponse::from_record).collect();
            (
                StatusCode::OK,
                Json(RequesterRunsResponse { requester_id, runs }),
            )
                .into_response()
        }
        Err(error) => internal(&error).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::{
        api,
        app::{AppState, ComponentRegistry},
        pipeline::stage::{PipelineStage, StageContext, StageData, StagePayload},
        store::types::RunStatus,
    };

    struct InstantStage {
        name: &'static str,
        running: RunStatus,
        completed: RunStatus,
    }

    #[async_trait]
    impl PipelineStage for InstantStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn running_status(&self) -> RunStatus {
            self.running
        }

        fn completed_status(&self) -> RunStatus {
            self.completed
        }

        async fn execute(&self, _ctx: &StageContext, input: StageData) -> Result<StageData> {
            if !input.is_success() {
                return Ok(input);
            }
            Ok(StageData::success(StagePayload::Report(
                serde_json::json!({ "stage": self.name }),
            )))
        }
    }

    fn test_state() -> AppState {
        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(InstantStage {
                name: "ingest",
                running: RunStatus::RunningIngest,
                completed: RunStatus::IngestDone,
            }),
            Arc::new(InstantStage {
                name: "cluster",
                running: RunStatus::RunningCluster,
                completed: RunStatus::ClusterDone,
            }),
            Arc::new(InstantStage {
                name: "analyze",
                running: RunStatus::RunningAnalyze,
                completed: RunStatus::Completed,
            }),
        ];
        AppState::new(ComponentRegistry::for_tests(stages))
    }

    #[tokio::test]
    async fn start_run_returns_accepted_with_run_id() {
        let app = api::router(test_state());

        let request = Request::post("/v1/units/unit-7/runs")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .expect("request builds");

        let response = app.oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");

        assert!(
            payload["run_id"]
                .as_str()
                .and_then(|id| Uuid::parse_str(id).ok())
                .is_some()
        );
        // 投入時点でPENDINGへ遷移済みの状態が返る
        assert_eq!(payload["status"], "PENDING");
    }

    #[tokio::test]
    async fn get_unknown_run_is_not_found() {
        let app = api::router(test_state());

        let request = Request::get(format!("/v1/runs/{}", Uuid::new_v4()))
            .body(Body::empty())
            .expect("request builds");

        let response = app.oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_not_found() {
        let app = api::router(test_state());

        let request = Request::post(format!("/v1/runs/{}/cancel", Uuid::new_v4()))
            .body(Body::empty())
            .expect("request builds");

        let response = app.oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cluster_result_of_unknown_run_is_not_found() {
        let app = api::router(test_state());

        let request = Request::get(format!("/v1/runs/{}/cluster", Uuid::new_v4()))
            .body(Body::empty())
            .expect("request builds");

        let response = app.oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unit_listing_includes_started_run() {
        let state = test_state();
        let app = api::router(state.clone());

        let start = Request::post("/v1/units/unit-9/runs")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"run_category":"nightly"}"#))
            .expect("request builds");
        let response = app
            .clone()
            .oneshot(start)
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let list = Request::get("/v1/units/unit-9/runs")
            .body(Body::empty())
            .expect("request builds");
        let response = app.clone().oneshot(list).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(payload["unit_id"], "unit-9");
        let runs = payload["runs"].as_array().expect("runs array");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["name"], "nightly");

        let filtered = Request::get("/v1/units/unit-9/runs?category=adhoc")
            .body(Body::empty())
            .expect("request builds");
        let response = app.oneshot(filtered).await.expect("request succeeds");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");
        assert!(payload["runs"].as_array().expect("runs array").is_empty());
    }

    #[tokio::test]
    async fn requester_listing_includes_started_run() {
        let state = test_state();
        let app = api::router(state.clone());

        let start = Request::post("/v1/units/unit-3/runs")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"requester_id":"user-42"}"#))
            .expect("request builds");
        let response = app
            .clone()
            .oneshot(start)
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let list = Request::get("/v1/requesters/user-42/runs")
            .body(Body::empty())
            .expect("request builds");
        let response = app.clone().oneshot(list).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(payload["requester_id"], "user-42");
        assert_eq!(payload["runs"].as_array().expect("runs array").len(), 1);

        let other = Request::get("/v1/requesters/someone-else/runs")
            .body(Body::empty())
            .expect("request builds");
        let response = app.oneshot(other).await.expect("request succeeds");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");
        assert!(payload["runs"].as_array().expect("runs array").is_empty());
    }

    #[tokio::test]
    async fn health_and_metrics_respond() {
        let app = api::router(test_state());

        for path in ["/health/live", "/health/ready", "/metrics"] {
            let request = Request::get(path).body(Body::empty()).expect("request builds");
            let response = app
                .clone()
                .oneshot(request)
                .await
                .expect("request succeeds");
            assert_eq!(response.status(), StatusCode::OK, "path {path}");
        }
    }
}
