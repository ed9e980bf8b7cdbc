use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ObjectStore, PresignedRequest};
use crate::{Error, Result};

/// In-process store for tests and single-binary runs; URLs are `memory://<key>`
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn presign(&self, method: &str, key: &str, headers: BTreeMap<String, String>, expires: Duration) -> PresignedRequest {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires).unwrap_or_else(|_| chrono::Duration::zero());
        PresignedRequest {
            url: format!("memory://{}", key),
            method: method.to_string(),
            headers,
            expires_at,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<PresignedRequest> {
        let headers = BTreeMap::from([("content-type".to_string(), content_type.to_string())]);
        Ok(self.presign("PUT", key, headers, expires))
    }

    fn presign_get(&self, key: &str, expires: Duration) -> Result<PresignedRequest> {
        Ok(self.presign("GET", key, BTreeMap::new(), expires))
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(body, _)| body.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryObjectStore::new();
        assert!(matches!(store.get_object("a/b.csv").await, Err(Error::NotFound(_))));

        store
            .put_object("a/b.csv", Bytes::from_static(b"email\n"), "text/csv")
            .await
            .unwrap();
        assert_eq!(store.get_object("a/b.csv").await.unwrap(), Bytes::from_static(b"email\n"));
    }

    #[test]
    fn test_presign_put_carries_content_type() {
        let store = MemoryObjectStore::new();
        let req = store
            .presign_put("k.csv", "text/csv", Duration::from_secs(60))
            .unwrap();
        assert_eq!(req.url, "memory://k.csv");
        assert_eq!(req.method, "PUT");
        assert_eq!(req.headers.get("content-type").map(String::as_str), Some("text/csv"));
        assert!(req.expires_at > Utc::now());
    }
}
