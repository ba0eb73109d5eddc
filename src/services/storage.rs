use std::path::Path;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};

pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value byte storage organized into named containers.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the backing container if it does not exist.
    async fn ensure_container(&self, container: &str) -> StorageResult<()>;

    /// Write (overwrite) an object and return its URL.
    async fn put(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<String>;

    /// Stream a local file into an object and return its URL.
    async fn put_file(&self, container: &str, key: &str, path: &Path) -> StorageResult<String>;

    async fn get(&self, container: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Stream an object into a local file.
    async fn get_to_file(&self, container: &str, key: &str, path: &Path) -> StorageResult<()>;

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool>;

    /// Keys of every object in the container.
    async fn list(&self, container: &str) -> StorageResult<Vec<String>>;
}

/// Client for S3-compatible object storage (R2, MinIO, AWS).
///
/// Containers map to key prefixes inside a single bucket.
pub struct S3ArtifactStore {
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
}

impl S3ArtifactStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            region,
            credentials,
        })
    }

    fn object_path(container: &str, key: &str) -> String {
        format!("{}/{}", container, key)
    }

    fn check_status(status: u16, container: &str, key: &str) -> StorageResult<()> {
        match status {
            200..=299 => Ok(()),
            404 => Err(StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            }),
            status => Err(StorageError::Status {
                status,
                key: Self::object_path(container, key),
            }),
        }
    }

    fn object_url(&self, container: &str, key: &str) -> String {
        format!(
            "{}/{}",
            self.bucket.url().trim_end_matches('/'),
            Self::object_path(container, key)
        )
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    /// Containers are prefixes, so only the bucket itself needs to exist.
    async fn ensure_container(&self, container: &str) -> StorageResult<()> {
        if self.bucket.exists().await.map_err(StorageError::S3)? {
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket.name(), container, "Creating missing bucket");
        let response = Bucket::create_with_path_style(
            &self.bucket.name(),
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await
        .map_err(StorageError::S3)?;

        if !response.success() && response.response_code != 409 {
            return Err(StorageError::Status {
                status: response.response_code,
                key: self.bucket.name(),
            });
        }
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<String> {
        let response = self
            .bucket
            .put_object_with_content_type(Self::object_path(container, key), data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Self::check_status(response.status_code(), container, key)?;
        Ok(self.object_url(container, key))
    }

    async fn put_file(&self, container: &str, key: &str, path: &Path) -> StorageResult<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let response = self
            .bucket
            .put_object_stream(&mut file, Self::object_path(container, key))
            .await
            .map_err(StorageError::S3)?;
        Self::check_status(response.status_code(), container, key)?;
        Ok(self.object_url(container, key))
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .bucket
            .get_object(Self::object_path(container, key))
            .await
            .map_err(StorageError::S3)?;
        Self::check_status(response.status_code(), container, key)?;
        Ok(response.to_vec())
    }

    async fn get_to_file(&self, container: &str, key: &str, path: &Path) -> StorageResult<()> {
        let mut file = tokio::fs::File::create(path).await?;
        let status = self
            .bucket
            .get_object_to_writer(Self::object_path(container, key), &mut file)
            .await
            .map_err(StorageError::S3)?;
        Self::check_status(status, container, key)
    }

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        match self.bucket.head_object(Self::object_path(container, key)).await {
            Ok((_, status)) if (200..300).contains(&status) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, status)) => Err(StorageError::Status {
                status,
                key: Self::object_path(container, key),
            }),
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    async fn list(&self, container: &str) -> StorageResult<Vec<String>> {
        let prefix = format!("{}/", container);
        let pages = self
            .bucket
            .list(prefix.clone(), None)
            .await
            .map_err(StorageError::S3)?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .filter_map(|object| object.key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object {container}/{key} not found")]
    NotFound { container: String, key: String },

    #[error("Storage returned HTTP {status} for {key}")]
    Status { status: u16, key: String },

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_prefixes_container() {
        assert_eq!(S3ArtifactStore::object_path("raw-videos", "a.mp4"), "raw-videos/a.mp4");
    }

    #[test]
    fn test_check_status_maps_codes() {
        assert!(S3ArtifactStore::check_status(200, "c", "k").is_ok());
        assert!(S3ArtifactStore::check_status(404, "c", "k")
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            S3ArtifactStore::check_status(503, "c", "k"),
            Err(StorageError::Status { status: 503, .. })
        ));
    }
}
