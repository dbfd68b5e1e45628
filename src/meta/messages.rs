//! Request and response bodies of the admin API
//!
//! Every response carries an `err` code; `ErrorCode::Ok` on success.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::error::ErrorCode;
use crate::meta::app_state::{AppState, PartitionConfig};
use crate::meta::duplication::{DupId, DuplicationEntry, DuplicationStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppRequest {
    pub app_name: String,
    pub app_type: String,
    pub partition_count: i32,
    #[serde(default)]
    pub replica_count: i32,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppResponse {
    pub err: ErrorCode,
    pub app_id: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropAppQuery {
    /// Seconds before the dropped app may be reclaimed
    pub grace_secs: Option<u64>,
}

/// Body of responses that carry nothing but the code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub err: ErrorCode,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { err: ErrorCode::Ok }
    }
}

/// App metadata with its partition configs inlined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppView {
    #[serde(flatten)]
    pub app: AppState,
    pub partitions: Vec<PartitionConfig>,
}

impl From<&Arc<AppState>> for AppView {
    fn from(app: &Arc<AppState>) -> Self {
        Self {
            partitions: app.partitions.clone(),
            app: (**app).clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAppResponse {
    pub err: ErrorCode,
    pub app: AppView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAppsQuery {
    #[serde(default)]
    pub include_dropped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAppsResponse {
    pub err: ErrorCode,
    pub apps: Vec<AppView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDuplicationRequest {
    pub remote: String,
    #[serde(default)]
    pub freezed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDuplicationResponse {
    pub err: ErrorCode,
    pub app_id: i32,
    pub dupid: DupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDuplicationResponse {
    pub err: ErrorCode,
    pub app_id: i32,
    pub entries: Vec<DuplicationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDuplicationRequest {
    pub status: DuplicationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfigResponse {
    pub err: ErrorCode,
    pub config: PartitionConfig,
}

/// Error body: code, message, and for stale ballots the stored config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub err: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<PartitionConfig>,
}

/// Wraps a crate error so handlers can return it with `?`
pub struct ApiError(pub crate::Error);

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        let current = match &self.0 {
            crate::Error::StaleBallot { current, .. } => Some((**current).clone()),
            _ => None,
        };
        let body = ErrorResponse {
            err: self.0.code(),
            message: self.0.to_string(),
            current,
        };
        (status, axum::Json(body)).into_response()
    }
}
