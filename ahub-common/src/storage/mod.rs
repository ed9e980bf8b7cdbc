//! Object storage behind presigned URLs
//!
//! Clients upload straight to the store with a presigned PUT; the import
//! worker reads the object back with `get_object`.

mod memory;
mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AppConfig, StorageKind};
use crate::Result;

/// Longest sanitized filename kept in an object key
pub const MAX_KEY_FILENAME_LEN: usize = 100;

/// A request the client performs itself
#[derive(Debug, Clone, Serialize)]
pub struct PresignedRequest {
    pub url: String,
    pub method: String,
    /// Headers the client must send unchanged (they are part of the signature)
    pub headers: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<PresignedRequest>;

    fn presign_get(&self, key: &str, expires: Duration) -> Result<PresignedRequest>;

    /// Fetch a whole object; a missing key is `NotFound`
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;
}

/// Build the store selected by `storage.kind`
pub fn build_object_store(config: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.storage.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryObjectStore::new())),
        StorageKind::S3 => Ok(Arc::new(S3ObjectStore::from_config(config)?)),
    }
}

/// Keep `[A-Za-z0-9._-]`, replace the rest with `_`, cap the length
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();

    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.len() > MAX_KEY_FILENAME_LEN {
        // keep the extension
        let ext = clean
            .rfind('.')
            .map(|i| clean[i..].to_string())
            .filter(|e| e.len() < MAX_KEY_FILENAME_LEN / 2)
            .unwrap_or_default();
        clean.truncate(MAX_KEY_FILENAME_LEN - ext.len());
        clean.push_str(&ext);
    }
    if clean.trim_matches('.').is_empty() {
        clean = "upload.csv".to_string();
    }
    clean
}

/// `teams/<team_id>/imports/<upload_id>/<sanitized filename>`
pub fn import_object_key(team_id: Uuid, upload_id: Uuid, filename: &str) -> String {
    format!(
        "teams/{}/imports/{}/{}",
        team_id,
        upload_id,
        sanitize_filename(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Contacts (2024).csv"), "My_Contacts__2024_.csv");
        assert_eq!(sanitize_filename("../../etc/passwd.csv"), "passwd.csv");
        assert_eq!(sanitize_filename("C:\\Users\\me\\list.csv"), "list.csv");
        assert_eq!(sanitize_filename("..."), "upload.csv");
    }

    #[test]
    fn test_sanitize_filename_caps_length_and_keeps_extension() {
        let long = format!("{}.csv", "a".repeat(300));
        let clean = sanitize_filename(&long);
        assert_eq!(clean.len(), MAX_KEY_FILENAME_LEN);
        assert!(clean.ends_with(".csv"));
    }

    #[test]
    fn test_import_object_key_layout() {
        let team = Uuid::new_v4();
        let upload = Uuid::new_v4();
        assert_eq!(
            import_object_key(team, upload, "leads.csv"),
            format!("teams/{}/imports/{}/leads.csv", team, upload)
        );
    }
}
