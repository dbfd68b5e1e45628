//! HTTP admin API of the meta server
//!
//! JSON endpoints over [`ClusterState`]. Partition config reports from the
//! replication layer come in on the same router.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::common::error::ErrorCode;
use crate::meta::app_state::PartitionConfig;
use crate::meta::cluster_state::{ClusterState, CreateAppOptions};
use crate::meta::duplication::DupId;
use crate::meta::env::AppEnvRequest;
use crate::meta::messages::*;

const MAX_BODY_BYTES: usize = 1024 * 1024;

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct MetaState {
    pub cluster: Arc<ClusterState>,
    /// Applied when a drop request carries no grace period
    pub default_drop_grace: Duration,
}

impl MetaState {
    pub fn new(cluster: Arc<ClusterState>, default_drop_grace: Duration) -> Self {
        Self {
            cluster,
            default_drop_grace,
        }
    }
}

pub fn create_router(state: MetaState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/apps", get(list_apps).post(create_app))
        .route("/apps/:app", get(get_app).delete(drop_app))
        .route("/apps/:app/envs", axum::routing::post(update_envs))
        .route(
            "/apps/:app/duplications",
            get(query_duplication).post(add_duplication),
        )
        .route(
            "/apps/:app/duplications/:dupid",
            put(change_duplication_status),
        )
        // `:app` is the numeric app id here
        .route(
            "/apps/:app/partitions/:index",
            put(update_partition_config),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<MetaState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "err": ErrorCode::Ok,
            "status": "ok",
            "version": crate::VERSION,
            "apps": state.cluster.list_apps(false).len(),
        })),
    )
}

async fn list_apps(
    State(state): State<MetaState>,
    Query(query): Query<ListAppsQuery>,
) -> Json<ListAppsResponse> {
    let apps = state
        .cluster
        .list_apps(query.include_dropped)
        .iter()
        .map(AppView::from)
        .collect();
    Json(ListAppsResponse {
        err: ErrorCode::Ok,
        apps,
    })
}

async fn create_app(
    State(state): State<MetaState>,
    Json(req): Json<CreateAppRequest>,
) -> ApiResult<Json<CreateAppResponse>> {
    let app_id = state
        .cluster
        .create_app(CreateAppOptions {
            app_name: req.app_name,
            app_type: req.app_type,
            partition_count: req.partition_count,
            replica_count: req.replica_count,
            envs: req.envs,
        })
        .await?;
    Ok(Json(CreateAppResponse {
        err: ErrorCode::Ok,
        app_id,
    }))
}

async fn get_app(
    State(state): State<MetaState>,
    Path(app): Path<String>,
) -> ApiResult<Json<QueryAppResponse>> {
    let snapshot = state.cluster.get_app(&app)?;
    Ok(Json(QueryAppResponse {
        err: ErrorCode::Ok,
        app: AppView::from(&snapshot),
    }))
}

async fn drop_app(
    State(state): State<MetaState>,
    Path(app): Path<String>,
    Query(query): Query<DropAppQuery>,
) -> ApiResult<Json<StatusResponse>> {
    let grace = query
        .grace_secs
        .map(Duration::from_secs)
        .unwrap_or(state.default_drop_grace);
    state.cluster.drop_app(&app, grace).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn update_envs(
    State(state): State<MetaState>,
    Path(app): Path<String>,
    Json(mut req): Json<AppEnvRequest>,
) -> ApiResult<Json<StatusResponse>> {
    req.app_name = app;
    // Runs as a tracked task so a dropped connection does not abandon the
    // write half way.
    state
        .cluster
        .submit_app_env(req)
        .await
        .map_err(crate::Error::from)??;
    Ok(Json(StatusResponse::ok()))
}

async fn query_duplication(
    State(state): State<MetaState>,
    Path(app): Path<String>,
) -> ApiResult<Json<QueryDuplicationResponse>> {
    let (app_id, entries) = state.cluster.query_duplication(&app)?;
    Ok(Json(QueryDuplicationResponse {
        err: ErrorCode::Ok,
        app_id,
        entries,
    }))
}

async fn add_duplication(
    State(state): State<MetaState>,
    Path(app): Path<String>,
    Json(req): Json<AddDuplicationRequest>,
) -> ApiResult<Json<AddDuplicationResponse>> {
    let (app_id, dupid) = state
        .cluster
        .add_duplication(&app, &req.remote, req.freezed)
        .await?;
    Ok(Json(AddDuplicationResponse {
        err: ErrorCode::Ok,
        app_id,
        dupid,
    }))
}

async fn change_duplication_status(
    State(state): State<MetaState>,
    Path((app, dupid)): Path<(String, DupId)>,
    Json(req): Json<ChangeDuplicationRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state
        .cluster
        .change_duplication_status(&app, dupid, req.status)
        .await?;
    Ok(Json(StatusResponse::ok()))
}

async fn update_partition_config(
    State(state): State<MetaState>,
    Path((app, index)): Path<(String, i32)>,
    Json(config): Json<PartitionConfig>,
) -> ApiResult<Json<PartitionConfigResponse>> {
    let app_id: i32 = app
        .parse()
        .map_err(|_| crate::Error::MalformedRequest(format!("invalid app id {:?}", app)))?;
    let config = state
        .cluster
        .update_partition_config(app_id, index, config)
        .await?;
    Ok(Json(PartitionConfigResponse {
        err: ErrorCode::Ok,
        config,
    }))
}
