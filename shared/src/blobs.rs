use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::BlobError;

/// Pre-signed links stay valid for one hour
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// User metadata attached to a stored object
pub type ObjectMetadata = HashMap<String, String>;

/// One page of a bucket listing
#[derive(Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Narrow interface over the blob store
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn list_page(&self, bucket: &str, continuation: Option<String>)
        -> Result<ListPage, BlobError>;

    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, BlobError>;

    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration)
        -> Result<String, BlobError>;

    /// Store an object and return its public URL
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<String, BlobError>;
}

/// List every key in a bucket, following continuation tokens until exhausted
pub async fn list_keys(store: &dyn BlobStore, bucket: &str) -> Result<Vec<String>, BlobError> {
    let mut keys = Vec::new();
    let mut continuation = None;
    loop {
        let page = store.list_page(bucket, continuation).await?;
        keys.extend(page.keys);
        match page.next_token {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }
    Ok(keys)
}

/// Public object URL in the virtual-hosted style
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}

/// Content type for the artifact formats the platform stores
pub fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "html" => Some("text/html"),
        "ipynb" => Some("application/x-ipynb+json"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBlobStore;

    #[tokio::test]
    async fn test_list_keys_follows_pages() {
        let store = MemoryBlobStore::new().with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            store.insert("bucket", key, ObjectMetadata::new());
        }
        let keys = list_keys(&store, "bucket").await.unwrap();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_content_type_for_known_extensions() {
        assert_eq!(content_type_for("PDF"), Some("application/pdf"));
        assert_eq!(content_type_for("ipynb"), Some("application/x-ipynb+json"));
        assert_eq!(content_type_for("exe"), None);
    }
}
