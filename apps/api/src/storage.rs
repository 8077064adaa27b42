//! Object storage behind one interface: local disk for development, S3 or
//! MinIO in deployment. Keys are forward-slash paths in both backends.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::path::PathBuf;
use uuid::Uuid;

pub enum ObjectStore {
    Local { root: PathBuf },
    S3 {
        client: aws_sdk_s3::Client,
        bucket: String,
    },
}

impl ObjectStore {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        ObjectStore::Local { root: root.into() }
    }

    pub fn s3(client: aws_sdk_s3::Client, bucket: String) -> Self {
        ObjectStore::S3 { client, bucket }
    }

    pub async fn open(&self, key: &str) -> Result<Bytes> {
        match self {
            ObjectStore::Local { root } => {
                let path = root.join(key);
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("storage read failed for key '{key}'"))?;
                Ok(Bytes::from(data))
            }
            ObjectStore::S3 { client, bucket } => {
                let object = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("storage read failed for key '{key}': {e}"))?;
                let data = object
                    .body
                    .collect()
                    .await
                    .with_context(|| format!("storage read failed for key '{key}'"))?;
                Ok(data.into_bytes())
            }
        }
    }

    pub async fn open_string(&self, key: &str) -> Result<String> {
        let data = self.open(key).await?;
        String::from_utf8(data.to_vec())
            .with_context(|| format!("storage object '{key}' is not valid UTF-8"))
    }

    /// Stores a user upload under a generated key. Returns `(key, size,
    /// content_type)`.
    pub async fn save(
        &self,
        user_id: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<(String, i64, String)> {
        let key = format!("uploads/{user_id}/{}-{name}", Uuid::new_v4());
        let size = self.save_with_key(&key, content_type, data).await?;
        Ok((key, size, content_type.to_string()))
    }

    /// Stores bytes under an exact key, overwriting any prior object.
    pub async fn save_with_key(&self, key: &str, content_type: &str, data: Bytes) -> Result<i64> {
        let size = data.len() as i64;
        match self {
            ObjectStore::Local { root } => {
                let path = root.join(key);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("storage write failed for key '{key}'"))?;
                }
                tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("storage write failed for key '{key}'"))?;
            }
            ObjectStore::S3 { client, bucket } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(ByteStream::from(data))
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("storage write failed for key '{key}': {e}"))?;
            }
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::local(dir.path());

        store
            .save_with_key("documents/d1/extracted.txt", "text/plain", Bytes::from("hello"))
            .await
            .unwrap();

        let read = store.open_string("documents/d1/extracted.txt").await.unwrap();
        assert_eq!(read, "hello");
    }

    #[tokio::test]
    async fn test_local_store_save_generates_unique_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::local(dir.path());

        let (key_a, size, mime) = store
            .save("u1", "resume.pdf", "application/pdf", Bytes::from(&b"pdf"[..]))
            .await
            .unwrap();
        let (key_b, _, _) = store
            .save("u1", "resume.pdf", "application/pdf", Bytes::from(&b"pdf"[..]))
            .await
            .unwrap();

        assert_ne!(key_a, key_b);
        assert_eq!(size, 3);
        assert_eq!(mime, "application/pdf");
        assert!(key_a.starts_with("uploads/u1/"));
    }

    #[tokio::test]
    async fn test_local_store_missing_key_errors_with_storage_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::local(dir.path());

        let err = store.open("nope/missing.txt").await.unwrap_err();
        assert!(err.to_string().contains("storage read failed"));
    }
}
