use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;

/// Object storage boundary. The orchestrator only ever downloads the inbound
/// PDF and publishes artifacts; everything else about the store is opaque.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> anyhow::Result<()>;

    /// Uploads a local file verbatim; returns the stored object's URI.
    async fn upload_file(&self, bucket: &str, object: &str, src: &Path) -> anyhow::Result<String>;

    /// Serializes and uploads a JSON document; returns the stored object's
    /// URI. Re-uploading the same object path overwrites deterministically.
    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<String>;
}

/// Selects the store implementation at deployment time.
/// `OBJECT_STORE_MODE=local` keeps everything under `LOCAL_STORE_ROOT`
/// (default `data/objects`); anything else talks to GCS.
pub fn object_store_from_env() -> anyhow::Result<std::sync::Arc<dyn ObjectStore>> {
    let mode = std::env::var("OBJECT_STORE_MODE").unwrap_or_else(|_| "gcs".to_owned());
    match mode.trim().to_ascii_lowercase().as_str() {
        "local" => {
            let root =
                std::env::var("LOCAL_STORE_ROOT").unwrap_or_else(|_| "data/objects".to_owned());
            Ok(std::sync::Arc::new(LocalFsObjectStore::new(root)))
        }
        "gcs" => Ok(std::sync::Arc::new(GcsObjectStore::new())),
        other => anyhow::bail!("unsupported OBJECT_STORE_MODE: {other}"),
    }
}

/// GCS over the JSON API, authenticated via the instance metadata server.
#[derive(Debug, Clone)]
pub struct GcsObjectStore {
    client: reqwest::Client,
}

impl Default for GcsObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GcsObjectStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        #[derive(Debug, serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let url = "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
        let resp = self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("request metadata access token")?;
        if !resp.status().is_success() {
            anyhow::bail!("metadata token request failed ({})", resp.status());
        }
        let token: TokenResponse = resp.json().await.context("parse metadata token json")?;
        Ok(token.access_token)
    }

    async fn upload_bytes(
        &self,
        bucket: &str,
        object: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<String> {
        let access_token = self.access_token().await.context("get access token")?;
        let object_encoded = percent_encode_rfc3986(object);
        let url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{bucket}/o?uploadType=media&name={object_encoded}"
        );

        let resp = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .context("upload object to gcs")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("gcs upload failed ({status}): {body}");
        }

        Ok(format!("gs://{bucket}/{object}"))
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> anyhow::Result<()> {
        let access_token = self.access_token().await.context("get access token")?;
        let object_encoded = percent_encode_rfc3986(object);
        let url = format!(
            "https://storage.googleapis.com/storage/v1/b/{bucket}/o/{object_encoded}?alt=media"
        );

        let resp = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("download object from gcs")?;
        if !resp.status().is_success() {
            anyhow::bail!("gcs download failed ({}): gs://{bucket}/{object}", resp.status());
        }

        let bytes = resp.bytes().await.context("read gcs object body")?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create download dir: {}", parent.display()))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("write downloaded object: {}", dest.display()))?;
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, object: &str, src: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(src)
            .await
            .with_context(|| format!("read upload source: {}", src.display()))?;
        self.upload_bytes(bucket, object, "application/octet-stream", bytes)
            .await
    }

    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<String> {
        let body = serde_json::to_vec_pretty(value).context("serialize json artifact")?;
        self.upload_bytes(bucket, object, "application/json", body)
            .await
    }
}

/// Filesystem-backed store used by tests and local runs; lays objects out as
/// `{root}/{bucket}/{object}`.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    root: PathBuf,
}

impl LocalFsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, object: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for segment in object.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            path = path.join(segment);
        }
        path
    }

    async fn write_bytes(
        &self,
        bucket: &str,
        object: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let path = self.object_path(bucket, object);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create object dir: {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("write object: {}", path.display()))?;
        Ok(format!("file://{}", path.display()))
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> anyhow::Result<()> {
        let src = self.object_path(bucket, object);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create download dir: {}", parent.display()))?;
        }
        tokio::fs::copy(&src, dest)
            .await
            .with_context(|| format!("copy object: {}", src.display()))?;
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, object: &str, src: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(src)
            .await
            .with_context(|| format!("read upload source: {}", src.display()))?;
        self.write_bytes(bucket, object, &bytes).await
    }

    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<String> {
        let body = serde_json::to_vec_pretty(value).context("serialize json artifact")?;
        self.write_bytes(bucket, object, &body).await
    }
}

fn percent_encode_rfc3986(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        let is_unreserved = matches!(
            b,
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~'
        );
        if is_unreserved {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        }
    }
    out
}
