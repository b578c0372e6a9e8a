use std::{str::FromStr, sync::Arc};

use axum::{
    Json, Router,
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use netconv_core::{
    ConvergenceEngine, ConvergenceRecord, DesiredState, Error, IdentityKey, InterfaceType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;


#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConvergenceEngine>,
}

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
}

impl ApiError {
    fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", StatusCode::NOT_FOUND, message)
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::new("device_error", StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        match value {
            Error::NotFound(_) => ApiError::not_found(value.to_string()),
            Error::Session { .. } | Error::DeviceRejected { .. } => {
                ApiError::device(value.to_string())
            }
            _ if value.is_client_error() => ApiError::invalid_request(value.to_string()),
            _ => ApiError::internal(value.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = self.code, "request failed: {}", self.message);
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// JSON body extractor whose rejections use the API error shape
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S>,
    <axum::Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        Ok(Self(value))
    }
}

/// Optional identity selector for `GET /items/:name`
#[derive(Debug, Default, Deserialize)]
struct ItemQuery {
    #[serde(rename = "type", default)]
    intf_type: Option<String>,
    #[serde(default)]
    number: Option<String>,
}

impl ItemQuery {
    fn identity_key(&self, host: &str) -> Result<Option<IdentityKey>, ApiError> {
        match (&self.intf_type, &self.number) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(ApiError::invalid_request(
                "query parameter 'number' requires 'type'",
            )),
            (Some(intf_type), number) => {
                let intf_type = InterfaceType::from_str(intf_type)
                    .map_err(|e| ApiError::invalid_request(e.to_string()))?;
                let number = number.clone().unwrap_or_else(|| "0".to_string());
                Ok(Some(IdentityKey::new(host, intf_type, number)))
            }
        }
    }
}

pub fn build_router(engine: Arc<ConvergenceEngine>) -> Router {
    let app_state = AppState { engine };

    Router::new()
        .route("/healthz", get(health))
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/:name",
            get(get_item).put(update_item).delete(delete_item),
        )
        .fallback(fallback_not_found)
        .with_state(app_state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn fallback_not_found() -> ApiError {
    ApiError::not_found("not found")
}

async fn list_items(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConvergenceRecord>>, ApiError> {
    Ok(Json(state.engine.list().await?))
}

async fn get_item(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ItemQuery>,
) -> Result<Json<Option<ConvergenceRecord>>, ApiError> {
    let record = match query.identity_key(&name)? {
        Some(key) => state.engine.read(&key).await?,
        None => state.engine.read_host(&name).await?,
    };
    Ok(Json(record))
}

async fn create_item(
    State(state): State<AppState>,
    ApiJson(item): ApiJson<DesiredState>,
) -> Result<Json<ConvergenceRecord>, ApiError> {
    Ok(Json(state.engine.create(item).await?))
}

async fn update_item(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(item): ApiJson<DesiredState>,
) -> Result<Json<ConvergenceRecord>, ApiError> {
    Ok(Json(state.engine.update(&name, item).await?))
}

async fn delete_item(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(item): ApiJson<DesiredState>,
) -> Result<String, ApiError> {
    Ok(state.engine.delete(&name, item).await?)
}
