use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Thumbnail transform parameters used in provider URL rewrites.
const THUMBNAIL_WIDTH: u32 = 400;
const THUMBNAIL_QUALITY: u32 = 70;

/// Client for the S3-compatible object store holding original and processed
/// images.
pub struct CloudStorage {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl CloudStorage {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Upload image bytes and return the public URL they are served from.
    pub async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    /// Delete an object by key.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }

    /// Object key for a URL under the managed public base, if it is one.
    pub fn key_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base_url)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|key| !key.is_empty())
    }

    /// Derive a low-quality thumbnail URL by rewriting the delivery URL, for
    /// providers that support on-the-fly transforms (Cloudinary-style
    /// `/upload/<transform>/` segments). Returns `None` when the URL has no
    /// transform point; callers fall back to locally generated thumbnails.
    pub fn derive_thumbnail_url(&self, url: &str) -> Option<String> {
        const MARKER: &str = "/upload/";
        let idx = url.find(MARKER)?;
        let (head, tail) = url.split_at(idx + MARKER.len());
        Some(format!(
            "{head}w_{THUMBNAIL_WIDTH},q_{THUMBNAIL_QUALITY}/{tail}"
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> CloudStorage {
        CloudStorage::new(
            "images",
            "https://storage.example.com",
            "key",
            "secret",
            "https://cdn.example.com/",
        )
        .unwrap()
    }

    #[test]
    fn key_from_url_strips_public_base() {
        let s = storage();
        assert_eq!(
            s.key_from_url("https://cdn.example.com/processed/abc.png"),
            Some("processed/abc.png".to_string())
        );
        assert_eq!(s.key_from_url("https://elsewhere.example.com/x.png"), None);
        assert_eq!(s.key_from_url("https://cdn.example.com/"), None);
    }

    #[test]
    fn thumbnail_url_rewrite() {
        let s = storage();
        assert_eq!(
            s.derive_thumbnail_url("https://res.example.com/demo/image/upload/v1/out.png"),
            Some("https://res.example.com/demo/image/upload/w_400,q_70/v1/out.png".to_string())
        );
        assert_eq!(
            s.derive_thumbnail_url("https://cdn.example.com/processed/out.png"),
            None
        );
    }
}
