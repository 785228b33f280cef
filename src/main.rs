mod catalog;
mod http;
mod media;
mod metrics;
mod models;
mod pipeline;
mod rows;
mod sheet;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::StoredProduct;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, IngestReport, ProductPayload};
use pipeline::{Catalog, ServiceError, ServiceErrorKind};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "catalog.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let catalog = Catalog::from_env()
        .ok_or("SUPABASE_URL and a service key must be set to start the catalog service")?;
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let state = AppState {
        catalog,
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/products/bulk-upload", post(bulk_upload))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "catalog.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    catalog: Catalog,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-api-rs",
    }))
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredProduct>>, AppError> {
    crate::metrics::inc_requests("/products");
    Ok(Json(state.catalog.list_products().await?))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredProduct>, AppError> {
    let id = parse_product_id(&id)?;
    Ok(Json(state.catalog.get_product(id).await?))
}

/// Create one product from a JSON payload carrying a remote image URL.
///
/// - Method: `POST`
/// - Path: `/products`
async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<ProductPayload>,
) -> Result<(StatusCode, Json<StoredProduct>), AppError> {
    crate::metrics::inc_requests("/products");
    let product = state.catalog.create_product(payload).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ProductPayload>,
) -> Result<Json<StoredProduct>, AppError> {
    let id = parse_product_id(&id)?;
    Ok(Json(state.catalog.update_product(id, payload).await?))
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_product_id(&id)?;
    state.catalog.delete_product(id).await?;
    Ok(Json(json!({ "message": "Product deleted successfully" })))
}

/// Bulk-ingest a spreadsheet of product rows.
///
/// - Method: `POST`
/// - Path: `/products/bulk-upload`
/// - Body: multipart with a `file` field (CSV or XLSX)
///
/// The uploaded file is staged to a temp path for the duration of the
/// pipeline run and removed afterwards regardless of the outcome.
async fn bulk_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, AppError> {
    crate::metrics::inc_requests("/products/bulk-upload");

    let mut staged: Option<PathBuf> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AppError::from(ServiceError::invalid_input("bulk_upload", err.to_string()))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let extension = field
            .file_name()
            .and_then(|name| {
                std::path::Path::new(name)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            })
            .ok_or_else(|| {
                AppError::from(ServiceError::invalid_input(
                    "bulk_upload",
                    "Please upload a CSV or XLSX file",
                ))
            })?;
        let bytes = field.bytes().await.map_err(|err| {
            AppError::from(ServiceError::invalid_input("bulk_upload", err.to_string()))
        })?;
        let path = std::env::temp_dir().join(format!(
            "catalog-upload-{}{extension}",
            Uuid::new_v4().simple()
        ));
        tokio::fs::write(&path, &bytes).await.map_err(|err| {
            AppError::from(ServiceError::internal("bulk_upload", err.to_string()))
        })?;
        staged = Some(path);
        break;
    }

    let Some(path) = staged else {
        return Err(AppError::from(ServiceError::invalid_input(
            "bulk_upload",
            "Please upload a CSV or XLSX file",
        )));
    };

    let result = state.catalog.ingest_spreadsheet(&path).await;
    tokio::fs::remove_file(&path).await.ok();
    Ok(Json(result?))
}

fn parse_product_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| {
        AppError::from(ServiceError::invalid_input(
            "products",
            "invalid product id supplied",
        ))
    })
}

#[derive(Debug)]
enum AppError {
    Service(ServiceError),
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Service(err) => {
                let status = match err.kind() {
                    ServiceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    ServiceErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ServiceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(8 * 1024 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
