//! HTTP routes over [`IdAllocationService`].
//!
//! | Method   | Path                                 | Response         |
//! |----------|--------------------------------------|------------------|
//! | `POST`   | `/v1/ids/{businessType}`             | `{ "id" }`       |
//! | `POST`   | `/v1/ids/{businessType}/batch?count` | `{ "ids" }`      |
//! | `POST`   | `/v1/ids/{businessType}/segment?size`| `IdSegment`      |
//! | `GET`    | `/v1/counters`                       | `[IdStatus]`     |
//! | `GET`    | `/v1/counters/{businessType}`        | `IdStatus`       |
//! | `POST`   | `/v1/counters/{businessType}`        | `IdStatus`       |
//! | `PUT`    | `/v1/counters/{businessType}/reset`  | `IdStatus`       |
//! | `DELETE` | `/v1/counters/{businessType}`        | `204 No Content` |
//! | `GET`    | `/health`                            | `{ "status" }`   |

use crate::server::service::error::ApiError;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    routing::{get, post, put},
};
use sequin::{IdAllocationService, IdSegment, IdStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    service: Arc<IdAllocationService>,
}

impl AppState {
    pub fn new(service: Arc<IdAllocationService>) -> Self {
        Self { service }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct IdResponse {
    pub id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct IdsResponse {
    pub ids: Vec<i64>,
}

#[derive(Deserialize, Debug)]
pub struct BatchParams {
    pub count: i32,
}

#[derive(Deserialize, Debug)]
pub struct SegmentParams {
    pub size: i32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub start_value: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default = "default_start_value")]
    pub start_value: i64,
}

impl Default for InitRequest {
    fn default() -> Self {
        Self {
            start_value: default_start_value(),
        }
    }
}

const fn default_start_value() -> i64 {
    1
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
}

/// Builds the application router with permissive CORS.
pub fn router(service: Arc<IdAllocationService>) -> Router {
    Router::new()
        .route("/v1/ids/{business_type}", post(generate_id))
        .route("/v1/ids/{business_type}/batch", post(generate_ids))
        .route("/v1/ids/{business_type}/segment", post(generate_id_segment))
        .route("/v1/counters", get(get_all_id_status))
        .route(
            "/v1/counters/{business_type}",
            get(get_id_status)
                .post(init_business_type)
                .delete(remove_business_type),
        )
        .route("/v1/counters/{business_type}/reset", put(reset_id_counter))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(AppState::new(service))
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(state)))]
async fn generate_id(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
) -> ApiResult<Json<IdResponse>> {
    let id = state.service.generate_id(&business_type).await?;
    Ok(Json(IdResponse { id }))
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(state)))]
async fn generate_ids(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
    params: Result<Query<BatchParams>, QueryRejection>,
) -> ApiResult<Json<IdsResponse>> {
    let Query(params) = params?;
    let ids = state
        .service
        .generate_ids(&business_type, params.count)
        .await?;
    Ok(Json(IdsResponse { ids }))
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(state)))]
async fn generate_id_segment(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
    params: Result<Query<SegmentParams>, QueryRejection>,
) -> ApiResult<Json<IdSegment>> {
    let Query(params) = params?;
    let segment = state
        .service
        .generate_id_segment(&business_type, params.size)
        .await?;
    Ok(Json(segment))
}

async fn get_all_id_status(State(state): State<AppState>) -> ApiResult<Json<Vec<IdStatus>>> {
    Ok(Json(state.service.get_all_id_status().await?))
}

async fn get_id_status(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
) -> ApiResult<Json<IdStatus>> {
    Ok(Json(state.service.get_id_status(&business_type).await?))
}

/// An empty body initializes at 1.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(state, body)))]
async fn init_business_type(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
    body: Bytes,
) -> ApiResult<Json<IdStatus>> {
    let request: InitRequest = if body.is_empty() {
        InitRequest::default()
    } else {
        decode(&body)?
    };
    state
        .service
        .init_business_type(&business_type, request.start_value)
        .await?;
    Ok(Json(state.service.get_id_status(&business_type).await?))
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(state, body)))]
async fn reset_id_counter(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
    body: Bytes,
) -> ApiResult<Json<IdStatus>> {
    let request: ResetRequest = decode(&body)?;
    state
        .service
        .reset_id_counter(&business_type, request.start_value)
        .await?;
    Ok(Json(state.service.get_id_status(&business_type).await?))
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(state)))]
async fn remove_business_type(
    State(state): State<AppState>,
    Path(business_type): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.remove_business_type(&business_type).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "SERVING".to_owned(),
    })
}

// Bodies are decoded by hand, and query rejections converted, so malformed
// input gets the same error shape as every other failure.
fn decode<'a, T: Deserialize<'a>>(body: &'a [u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|err| ApiError::InvalidRequest {
        reason: err.to_string(),
    })
}
