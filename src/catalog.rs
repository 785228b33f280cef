use crate::http::build_client;
use crate::models::Variant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use urlencoding::encode;
use uuid::Uuid;

/// A persisted catalog product. `name` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProduct {
    pub id: Uuid,
    pub name: String,
    pub material_of_construction: String,
    pub cap_type: String,
    pub image_url: String,
    pub image_public_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
}

/// Write-side shape of a product: what an insert, update or upsert carries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub name: String,
    pub material_of_construction: String,
    pub cap_type: String,
    pub image_url: String,
    pub image_public_id: String,
    pub description: String,
    pub variants: Vec<Variant>,
}

/// Outcome of a bulk upsert, translated by the adapter into this one
/// explicit shape. The core never inspects an engine-specific result.
///
/// `failed` indexes correlate positionally with the submitted record
/// sequence; an empty list means every operation succeeded.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub matched: u64,
    pub failed: Vec<WriteFailure>,
}

#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("catalog engine returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
}

impl CatalogError {
    /// Unique-key conflicts surface as client errors upstream.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CatalogError::Status { status: 409, .. })
    }
}

/// Persistence contract the ingestion core runs against.
///
/// No per-name lock exists anywhere: the engine's unique-name constraint is
/// the only concurrency control, and concurrent writers targeting the same
/// name race with last-write-wins semantics.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list(&self) -> Result<Vec<StoredProduct>, CatalogError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredProduct>, CatalogError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredProduct>, CatalogError>;
    async fn insert(&self, record: &ProductRecord) -> Result<StoredProduct, CatalogError>;
    async fn update(
        &self,
        id: Uuid,
        record: &ProductRecord,
    ) -> Result<Option<StoredProduct>, CatalogError>;
    async fn delete(&self, id: Uuid) -> Result<Option<StoredProduct>, CatalogError>;

    /// Submits every record as an independent upsert-by-name with unordered
    /// execution: one failing operation never blocks the others. `Err` is
    /// reserved for failures with no per-operation detail (connectivity,
    /// non-2xx with no row attribution) — those are fatal for the batch.
    async fn bulk_upsert(&self, records: &[ProductRecord]) -> Result<BulkOutcome, CatalogError>;
}

/// Supabase PostgREST adapter. CRUD goes through `/rest/v1/{table}`; the
/// bulk upsert calls an RPC that performs unordered per-row upserts server
/// side and reports per-index errors back.
#[derive(Debug, Clone)]
pub struct SupabaseCatalog {
    base_url: String,
    service_key: String,
    table: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct RpcBulkResult {
    #[serde(default)]
    inserted: u64,
    #[serde(default)]
    updated: u64,
    #[serde(default)]
    matched: u64,
    #[serde(default)]
    errors: Vec<RpcWriteError>,
}

#[derive(Debug, Deserialize)]
struct RpcWriteError {
    index: usize,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn translate_bulk_result(raw: RpcBulkResult) -> BulkOutcome {
    let failed = raw
        .errors
        .into_iter()
        .map(|err| WriteFailure {
            index: err.index,
            reason: err
                .message
                .filter(|m| !m.trim().is_empty())
                .or(err.code)
                .unwrap_or_else(|| "Unknown bulk write error".to_string()),
        })
        .collect();
    BulkOutcome {
        inserted: raw.inserted,
        updated: raw.updated,
        matched: raw.matched,
        failed,
    }
}

impl SupabaseCatalog {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let table = std::env::var("CATALOG_TABLE").unwrap_or_else(|_| "products".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            table,
            http: build_client(),
        })
    }

    fn table_url(&self, query: &str) -> String {
        format!("{}/rest/v1/{}{}", self.base_url, self.table, query)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn check(&self, response: Response) -> Result<Response, CatalogError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(CatalogError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    async fn rows(&self, response: Response) -> Result<Vec<StoredProduct>, CatalogError> {
        let response = self.check(response).await?;
        response
            .json()
            .await
            .map_err(|err| CatalogError::Deserialize(err.to_string()))
    }
}

#[async_trait]
impl CatalogStore for SupabaseCatalog {
    async fn list(&self) -> Result<Vec<StoredProduct>, CatalogError> {
        let url = self.table_url("?select=*&order=created_at.desc");
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        self.rows(response).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredProduct>, CatalogError> {
        let url = self.table_url(&format!("?id=eq.{id}&select=*&limit=1"));
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        Ok(self.rows(response).await?.pop())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<StoredProduct>, CatalogError> {
        let url = self.table_url(&format!("?name=eq.{}&select=*&limit=1", encode(name)));
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        Ok(self.rows(response).await?.pop())
    }

    async fn insert(&self, record: &ProductRecord) -> Result<StoredProduct, CatalogError> {
        let url = self.table_url("");
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "return=representation")
            .json(record)
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        self.rows(response)
            .await?
            .pop()
            .ok_or_else(|| CatalogError::Deserialize("insert returned no row".to_string()))
    }

    async fn update(
        &self,
        id: Uuid,
        record: &ProductRecord,
    ) -> Result<Option<StoredProduct>, CatalogError> {
        let url = self.table_url(&format!("?id=eq.{id}"));
        let response = self
            .authed(self.http.patch(url))
            .header("Prefer", "return=representation")
            .json(record)
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        Ok(self.rows(response).await?.pop())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<StoredProduct>, CatalogError> {
        let url = self.table_url(&format!("?id=eq.{id}"));
        let response = self
            .authed(self.http.delete(url))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        Ok(self.rows(response).await?.pop())
    }

    async fn bulk_upsert(&self, records: &[ProductRecord]) -> Result<BulkOutcome, CatalogError> {
        let url = format!("{}/rest/v1/rpc/bulk_upsert_products", self.base_url);
        let response = self
            .authed(self.http.post(url))
            .json(&serde_json::json!({ "records": records }))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        let response = self.check(response).await?;
        let raw: RpcBulkResult = response
            .json()
            .await
            .map_err(|err| CatalogError::Deserialize(err.to_string()))?;
        Ok(translate_bulk_result(raw))
    }
}
