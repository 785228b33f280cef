use crate::catalog::{CatalogError, CatalogStore, ProductRecord, StoredProduct, SupabaseCatalog};
use crate::media::{self, MediaStore, SupabaseMediaStore};
use crate::models::{FailedProduct, IngestReport, IngestSummary, ProductPayload};
use crate::rows::{self, ProductGroup};
use crate::sheet;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Catalog service: owns the persistence and media collaborators and runs
/// the ingestion pipeline plus the single-item product flows.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    media: Arc<dyn MediaStore>,
    http: Client,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct ServiceError {
    stage: &'static str,
    message: String,
    kind: ServiceErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidInput,
    NotFound,
    Internal,
}

impl ServiceError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: ServiceErrorKind::InvalidInput,
        }
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: ServiceErrorKind::NotFound,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: ServiceErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// One group, asset-resolved and ready for the batch. Carries its own
/// compensation metadata and write-result slot so nothing correlates three
/// parallel lists by accident: the batch is `Vec<PreparedRecord>` and the
/// engine's failed indexes point straight into it.
#[derive(Debug)]
struct PreparedRecord {
    record: ProductRecord,
    source_rows: Vec<usize>,
    new_public_id: String,
    /// Image id of a pre-existing record with the same name, captured
    /// before the batch executes. Needed to delete the superseded asset
    /// once this operation succeeds; never touched when it fails.
    old_public_id: Option<String>,
    write_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompensationKind {
    /// The operation failed; its freshly uploaded asset was never linked.
    FailedOperation,
    /// The operation succeeded and replaced a previous image.
    SupersededImage,
    /// The whole batch died with no per-operation detail; every new upload
    /// rolls back.
    BatchRollback,
}

#[derive(Debug, Clone)]
struct CompensationTask {
    index: usize,
    product: String,
    public_id: String,
    kind: CompensationKind,
}

#[derive(Debug)]
struct CompensationOutcome {
    task: CompensationTask,
    error: Option<String>,
}

/// Builds the compensation task list from the written batch: delete the new
/// asset of every failed operation, delete the superseded old asset of
/// every succeeded replacement, and nothing otherwise.
fn compensation_tasks(prepared: &[PreparedRecord]) -> Vec<CompensationTask> {
    let mut tasks = Vec::new();
    for (index, entry) in prepared.iter().enumerate() {
        if entry.write_failure.is_some() {
            tasks.push(CompensationTask {
                index,
                product: entry.record.name.clone(),
                public_id: entry.new_public_id.clone(),
                kind: CompensationKind::FailedOperation,
            });
        } else if let Some(old) = &entry.old_public_id {
            tasks.push(CompensationTask {
                index,
                product: entry.record.name.clone(),
                public_id: old.clone(),
                kind: CompensationKind::SupersededImage,
            });
        }
    }
    tasks
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>, media: Arc<dyn MediaStore>) -> Self {
        Self {
            store,
            media,
            http: crate::http::build_client(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let store = SupabaseCatalog::from_env()?;
        let media = SupabaseMediaStore::from_env()?;
        Some(Self::new(Arc::new(store), Arc::new(media)))
    }

    /// Ingests a spreadsheet of product rows end to end.
    ///
    /// Row and per-product failures are absorbed into the report; only a
    /// meaningless batch (empty file, zero valid groups, zero resolvable
    /// products) or a write failure with no per-operation detail terminates
    /// the call with an error. After the call every uploaded asset is
    /// either linked to a persisted record or has been handed to delete.
    pub async fn ingest_spreadsheet(&self, path: &Path) -> Result<IngestReport, ServiceError> {
        let started = Instant::now();

        let raw_rows = sheet::read_rows(path)
            .map_err(|err| ServiceError::invalid_input("read_rows", err.to_string()))?;
        if raw_rows.is_empty() {
            return Err(ServiceError::invalid_input(
                "read_rows",
                "uploaded file is empty",
            ));
        }
        let total_rows = raw_rows.len();

        let grouped = rows::group_rows(&raw_rows);
        crate::metrics::stage_elapsed("group_rows", started.elapsed().as_millis());
        if grouped.groups.is_empty() {
            return Err(ServiceError::invalid_input(
                "group_rows",
                format!(
                    "no valid product rows were found in the uploaded file ({} rows skipped)",
                    grouped.skipped.len()
                ),
            ));
        }

        let mut prepared: Vec<PreparedRecord> = Vec::with_capacity(grouped.groups.len());
        let mut failed_products: Vec<FailedProduct> = Vec::new();
        for group in grouped.groups {
            let name = group.name.clone();
            let source_rows = group.source_rows.clone();
            match self.prepare_group(group).await {
                Ok(entry) => prepared.push(entry),
                Err(reason) => {
                    warn!(
                        target = "catalog.ingest",
                        product = %name,
                        reason = %reason,
                        "product_preparation_failed"
                    );
                    failed_products.push(FailedProduct {
                        product: name,
                        rows: source_rows,
                        reason,
                    });
                }
            }
        }
        crate::metrics::stage_elapsed("prepare_products", started.elapsed().as_millis());

        if prepared.is_empty() {
            return Err(ServiceError::invalid_input(
                "prepare_products",
                "bulk upload failed before inserting any products",
            ));
        }

        let records: Vec<ProductRecord> = prepared
            .iter()
            .map(|entry| entry.record.clone())
            .collect();
        let outcome = match self.store.bulk_upsert(&records).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Fatal: no per-operation detail to attribute, so every
                // upload from this batch rolls back before the error
                // propagates.
                self.rollback_batch(&prepared).await;
                return Err(ServiceError::internal("bulk_upsert", err.to_string()));
            }
        };
        crate::metrics::stage_elapsed("bulk_upsert", started.elapsed().as_millis());

        for failure in &outcome.failed {
            match prepared.get_mut(failure.index) {
                Some(entry) => entry.write_failure = Some(failure.reason.clone()),
                None => warn!(
                    target = "catalog.ingest",
                    index = failure.index,
                    "write_failure_index_out_of_range"
                ),
            }
        }

        let outcomes = self.run_compensation(compensation_tasks(&prepared)).await;
        crate::metrics::stage_elapsed("compensate", started.elapsed().as_millis());

        for entry in &prepared {
            if let Some(reason) = &entry.write_failure {
                failed_products.push(FailedProduct {
                    product: entry.record.name.clone(),
                    rows: entry.source_rows.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let summary = IngestSummary {
            total_rows,
            valid_rows: total_rows - grouped.skipped.len(),
            total_products: prepared.len(),
            inserted: outcome.inserted,
            updated: outcome.updated,
            matched: outcome.matched,
            failed_products: failed_products.len(),
            skipped_rows: grouped.skipped.len(),
            failed_product_details: failed_products,
            skipped_row_details: grouped.skipped,
        };

        info!(
            target = "catalog.ingest",
            total_rows = summary.total_rows,
            products = summary.total_products,
            inserted = summary.inserted,
            updated = summary.updated,
            failed = summary.failed_products,
            compensations = outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk_ingest_finished"
        );

        let message = if summary.failed_products > 0 {
            "Bulk upload completed with some failures"
        } else {
            "Bulk upload processed successfully"
        };
        Ok(IngestReport {
            message: message.to_string(),
            summary,
        })
    }

    /// Resolves one group's image and captures the old-asset id, producing
    /// a batch-ready record. Any failure here excludes the group from the
    /// batch and leaves no unowned upload behind.
    async fn prepare_group(&self, group: ProductGroup) -> Result<PreparedRecord, String> {
        let asset = media::upload_from_url(
            self.media.as_ref(),
            &self.http,
            &group.image_source,
            Some(&group.name),
        )
        .await
        .map_err(|err| err.to_string())?;

        // The lookup must land before the batch executes: a failed upsert
        // must not erase the old-asset knowledge compensation needs.
        let existing = match self.store.find_by_name(&group.name).await {
            Ok(existing) => existing,
            Err(err) => {
                // The upload succeeded but the group cannot join the batch,
                // so the new asset is unowned and goes straight back.
                self.delete_asset_logged(&asset.public_id, "prepare_lookup_failed")
                    .await;
                return Err(format!("existing-product lookup failed: {err}"));
            }
        };
        let old_public_id = existing
            .map(|product| product.image_public_id)
            .filter(|id| !id.is_empty());

        Ok(PreparedRecord {
            record: ProductRecord {
                name: group.name,
                material_of_construction: group.material_of_construction,
                cap_type: group.cap_type,
                image_url: asset.url,
                image_public_id: asset.public_id.clone(),
                description: group.description,
                variants: group.variants,
            },
            source_rows: group.source_rows,
            new_public_id: asset.public_id,
            old_public_id,
            write_failure: None,
        })
    }

    /// Executes compensating deletes concurrently and records each outcome.
    /// Failures are logged, never escalated: the catalog is already
    /// correct, an undeleted orphan is a cost concern.
    async fn run_compensation(&self, tasks: Vec<CompensationTask>) -> Vec<CompensationOutcome> {
        let mut set = JoinSet::new();
        for task in tasks {
            let media = self.media.clone();
            set.spawn(async move {
                let result = media.delete(&task.public_id).await;
                (task, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task, Ok(()))) => {
                    debug!(
                        target = "catalog.ingest",
                        index = task.index,
                        product = %task.product,
                        kind = ?task.kind,
                        public_id = %task.public_id,
                        "compensating_delete_ok"
                    );
                    outcomes.push(CompensationOutcome { task, error: None });
                }
                Ok((task, Err(err))) => {
                    warn!(
                        target = "catalog.ingest",
                        index = task.index,
                        product = %task.product,
                        kind = ?task.kind,
                        public_id = %task.public_id,
                        error = %err,
                        "compensating_delete_failed"
                    );
                    outcomes.push(CompensationOutcome {
                        task,
                        error: Some(err.to_string()),
                    });
                }
                Err(err) => warn!(
                    target = "catalog.ingest",
                    error = %err,
                    "compensating_delete_panicked"
                ),
            }
        }
        outcomes
    }

    /// Full rollback of resolution side effects after a fatal write error.
    async fn rollback_batch(&self, prepared: &[PreparedRecord]) {
        let tasks = prepared
            .iter()
            .enumerate()
            .map(|(index, entry)| CompensationTask {
                index,
                product: entry.record.name.clone(),
                public_id: entry.new_public_id.clone(),
                kind: CompensationKind::BatchRollback,
            })
            .collect();
        self.run_compensation(tasks).await;
    }

    async fn delete_asset_logged(&self, public_id: &str, context: &'static str) {
        if let Err(err) = self.media.delete(public_id).await {
            warn!(
                target = "catalog.ingest",
                public_id = %public_id,
                context = context,
                error = %err,
                "asset_delete_failed"
            );
        }
    }

    pub async fn list_products(&self) -> Result<Vec<StoredProduct>, ServiceError> {
        self.store
            .list()
            .await
            .map_err(|err| ServiceError::internal("list_products", err.to_string()))
    }

    pub async fn get_product(&self, id: Uuid) -> Result<StoredProduct, ServiceError> {
        self.store
            .find_by_id(id)
            .await
            .map_err(|err| ServiceError::internal("get_product", err.to_string()))?
            .ok_or_else(|| ServiceError::not_found("get_product", "product not found"))
    }

    /// Single-item create: upload the image, insert, and delete the upload
    /// if the insert fails — the n=1 case of the batch protocol.
    pub async fn create_product(&self, payload: ProductPayload) -> Result<StoredProduct, ServiceError> {
        let source = payload
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ServiceError::invalid_input("create_product", "product image is required")
            })?;

        let asset = media::upload_from_url(
            self.media.as_ref(),
            &self.http,
            source,
            Some(&payload.name),
        )
        .await
        .map_err(|err| {
            ServiceError::invalid_input(
                "upload_image",
                format!("Failed to upload product image: {err}"),
            )
        })?;

        let record = ProductRecord {
            name: payload.name,
            material_of_construction: payload.material_of_construction,
            cap_type: payload.cap_type,
            image_url: asset.url,
            image_public_id: asset.public_id.clone(),
            description: payload.description.unwrap_or_default(),
            variants: payload.variants.unwrap_or_default(),
        };

        match self.store.insert(&record).await {
            Ok(product) => Ok(product),
            Err(err) => {
                self.delete_asset_logged(&asset.public_id, "create_insert_failed")
                    .await;
                Err(map_write_error("create_product", err))
            }
        }
    }

    /// Single-item update. A new remote image URL (differing from the
    /// stored one) is uploaded first; on write failure the new asset is
    /// deleted, on success the superseded asset is.
    pub async fn update_product(
        &self,
        id: Uuid,
        payload: ProductPayload,
    ) -> Result<StoredProduct, ServiceError> {
        let existing = self
            .store
            .find_by_id(id)
            .await
            .map_err(|err| ServiceError::internal("update_product", err.to_string()))?
            .ok_or_else(|| ServiceError::not_found("update_product", "product not found"))?;

        let requested = payload
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());
        let should_upload = requested.is_some_and(|url| url != existing.image_url);

        let uploaded = if let Some(url) = requested.filter(|_| should_upload) {
            Some(
                media::upload_from_url(self.media.as_ref(), &self.http, url, Some(&payload.name))
                    .await
                    .map_err(|err| {
                        ServiceError::invalid_input(
                            "upload_image",
                            format!("Failed to upload product image: {err}"),
                        )
                    })?,
            )
        } else {
            None
        };

        let (image_url, image_public_id) = match &uploaded {
            Some(asset) => (asset.url.clone(), asset.public_id.clone()),
            None => (existing.image_url.clone(), existing.image_public_id.clone()),
        };
        let record = ProductRecord {
            name: payload.name,
            material_of_construction: payload.material_of_construction,
            cap_type: payload.cap_type,
            image_url,
            image_public_id,
            description: payload
                .description
                .unwrap_or_else(|| existing.description.clone()),
            variants: payload
                .variants
                .unwrap_or_else(|| existing.variants.clone()),
        };

        let updated = match self.store.update(id, &record).await {
            Ok(updated) => updated,
            Err(err) => {
                if let Some(asset) = &uploaded {
                    self.delete_asset_logged(&asset.public_id, "update_write_failed")
                        .await;
                }
                return Err(map_write_error("update_product", err));
            }
        };
        let Some(updated) = updated else {
            if let Some(asset) = &uploaded {
                self.delete_asset_logged(&asset.public_id, "update_target_vanished")
                    .await;
            }
            return Err(ServiceError::not_found("update_product", "product not found"));
        };

        if uploaded.is_some() && !existing.image_public_id.is_empty() {
            self.delete_asset_logged(&existing.image_public_id, "update_superseded_image")
                .await;
        }
        Ok(updated)
    }

    /// Single-item delete: the record goes first, then its asset,
    /// best-effort.
    pub async fn delete_product(&self, id: Uuid) -> Result<StoredProduct, ServiceError> {
        let deleted = self
            .store
            .delete(id)
            .await
            .map_err(|err| ServiceError::internal("delete_product", err.to_string()))?
            .ok_or_else(|| ServiceError::not_found("delete_product", "product not found"))?;

        if !deleted.image_public_id.is_empty() {
            self.delete_asset_logged(&deleted.image_public_id, "delete_product")
                .await;
        }
        Ok(deleted)
    }
}

fn map_write_error(stage: &'static str, err: CatalogError) -> ServiceError {
    if err.is_conflict() {
        ServiceError::invalid_input(stage, err.to_string())
    } else {
        ServiceError::internal(stage, err.to_string())
    }
}
