use crate::http::build_client;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// An image hosted on the managed store. Whoever holds the persisted record
/// referencing `public_id` owns the asset; an asset referenced by nothing
/// must be deleted, not left dangling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub url: String,
    pub public_id: String,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("image fetch failed: {0}")]
    Fetch(String),
    #[error("image fetch returned HTTP {0}")]
    FetchStatus(u16),
    #[error("image staging failed: {0}")]
    Staging(String),
    #[error("image upload failed: {0}")]
    Upload(String),
    #[error("image delete failed: {0}")]
    Delete(String),
}

/// Remote asset store contract. `delete` is idempotent: deleting an id that
/// no longer exists succeeds.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, path: &Path, folder: &str) -> Result<MediaAsset, MediaError>;
    async fn delete(&self, public_id: &str) -> Result<(), MediaError>;
}

static BASE_FOLDER: Lazy<String> = Lazy::new(|| {
    std::env::var("MEDIA_BASE_FOLDER").unwrap_or_else(|_| "catalog/products".to_string())
});

fn sanitize_folder_part(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_' {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out
}

fn resolve_folder(suffix: Option<&str>) -> String {
    match suffix.map(str::trim).filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{}/{}", *BASE_FOLDER, sanitize_folder_part(suffix)),
        None => BASE_FOLDER.clone(),
    }
}

/// Uploads a locally staged file and removes it unconditionally afterwards.
/// The staged file never survives this call, whatever the upload did.
pub async fn upload_from_path(
    store: &dyn MediaStore,
    path: &Path,
    folder_suffix: Option<&str>,
) -> Result<MediaAsset, MediaError> {
    let folder = resolve_folder(folder_suffix);
    let result = store.upload(path, &folder).await;
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::warn!(
            target = "catalog.media",
            path = %path.display(),
            error = %err,
            "staged_file_cleanup_failed"
        );
    }
    result
}

/// Fetches a remote image, stages it to a uniquely named temp file keeping
/// the URL's extension when determinable, and delegates to
/// [`upload_from_path`] (inheriting its cleanup guarantee).
pub async fn upload_from_url(
    store: &dyn MediaStore,
    http: &Client,
    image_url: &str,
    folder_suffix: Option<&str>,
) -> Result<MediaAsset, MediaError> {
    let response = http
        .get(image_url)
        .send()
        .await
        .map_err(|err| MediaError::Fetch(err.to_string()))?;
    if !response.status().is_success() {
        return Err(MediaError::FetchStatus(response.status().as_u16()));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| MediaError::Fetch(err.to_string()))?;

    let temp_path = staging_path(image_url);
    if let Err(err) = tokio::fs::write(&temp_path, &bytes).await {
        // A partial write must not linger either.
        tokio::fs::remove_file(&temp_path).await.ok();
        return Err(MediaError::Staging(err.to_string()));
    }

    upload_from_path(store, &temp_path, folder_suffix).await
}

fn staging_path(image_url: &str) -> PathBuf {
    let extension = extension_from_url(image_url).unwrap_or_else(|| ".tmp".to_string());
    std::env::temp_dir().join(format!(
        "catalog-remote-{}{}",
        Uuid::new_v4().simple(),
        extension
    ))
}

fn extension_from_url(image_url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(image_url).ok()?;
    let ext = Path::new(parsed.path()).extension()?.to_str()?;
    if ext.is_empty() {
        None
    } else {
        Some(format!(".{ext}"))
    }
}

/// Supabase Storage adapter. Objects live under a single bucket; the object
/// path inside the bucket doubles as the asset's public id.
#[derive(Debug, Clone)]
pub struct SupabaseMediaStore {
    base_url: String,
    bucket: String,
    service_key: String,
    http: Client,
}

impl SupabaseMediaStore {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket =
            std::env::var("MEDIA_BUCKET").unwrap_or_else(|_| "product-images".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            service_key,
            http: build_client(),
        })
    }

    fn object_url(&self, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }

    fn public_url(&self, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl MediaStore for SupabaseMediaStore {
    async fn upload(&self, path: &Path, folder: &str) -> Result<MediaAsset, MediaError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| MediaError::Staging(err.to_string()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let object_path = format!("{folder}/{}{extension}", Uuid::new_v4().simple());

        let response = self
            .http
            .post(self.object_url(&object_path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Content-Type", content_type_for(path))
            .body(bytes)
            .send()
            .await
            .map_err(|err| MediaError::Upload(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::Upload(format!("HTTP {status}: {body}")));
        }

        Ok(MediaAsset {
            url: self.public_url(&object_path),
            public_id: object_path,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<(), MediaError> {
        let response = self
            .http
            .delete(self.object_url(public_id))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|err| MediaError::Delete(err.to_string()))?;

        // Deleting an id that is already gone is a success, not an error.
        if response.status().is_success() || response.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(MediaError::Delete(format!("HTTP {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingStore {
        fail_upload: bool,
        uploads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaStore for RecordingStore {
        async fn upload(&self, _path: &Path, folder: &str) -> Result<MediaAsset, MediaError> {
            self.uploads.lock().unwrap().push(folder.to_string());
            if self.fail_upload {
                return Err(MediaError::Upload("corrupt payload".into()));
            }
            Ok(MediaAsset {
                url: format!("https://cdn.example.com/{folder}/a.png"),
                public_id: format!("{folder}/a.png"),
            })
        }

        async fn delete(&self, _public_id: &str) -> Result<(), MediaError> {
            Ok(())
        }
    }

    fn write_staged_file() -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "catalog-media-test-{}.png",
            Uuid::new_v4().simple()
        ));
        std::fs::write(&path, b"png-bytes").expect("write staged file");
        path
    }

    #[test]
    fn sanitizes_folder_suffixes() {
        assert_eq!(sanitize_folder_part("Round Jar 100ml"), "round-jar-100ml");
        assert_eq!(sanitize_folder_part("  PET/Amber  "), "pet-amber");
        assert_eq!(sanitize_folder_part("snake_case-ok"), "snake_case-ok");
    }

    #[test]
    fn extension_is_preserved_when_determinable() {
        assert_eq!(
            extension_from_url("https://img.example.com/a/jar.png?v=2"),
            Some(".png".to_string())
        );
        assert_eq!(extension_from_url("https://img.example.com/no-ext"), None);
        assert_eq!(extension_from_url("not a url"), None);
    }

    #[tokio::test]
    async fn staged_file_is_removed_after_successful_upload() {
        let store = RecordingStore {
            fail_upload: false,
            uploads: Mutex::new(Vec::new()),
        };
        let path = write_staged_file();
        let asset = upload_from_path(&store, &path, Some("Round Jar"))
            .await
            .expect("upload");
        assert!(asset.public_id.ends_with("/a.png"));
        assert!(!path.exists());
        let uploads = store.uploads.lock().unwrap();
        assert!(uploads[0].ends_with("/round-jar"));
    }

    #[tokio::test]
    async fn staged_file_is_removed_even_when_upload_fails() {
        let store = RecordingStore {
            fail_upload: true,
            uploads: Mutex::new(Vec::new()),
        };
        let path = write_staged_file();
        let err = upload_from_path(&store, &path, None)
            .await
            .expect_err("upload should fail");
        assert!(matches!(err, MediaError::Upload(_)));
        assert!(!path.exists());
    }
}
