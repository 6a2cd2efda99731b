//! S3-compatible object storage (Cloudflare R2, MinIO, AWS) through the
//! `object_store` S3 client, addressed path-style.

use {
    async_trait::async_trait,
    object_store::{
        Attribute, AttributeValue, Attributes, ObjectStore as _, PutOptions, PutPayload,
        aws::{AmazonS3, AmazonS3Builder},
        path::Path,
    },
    secrecy::ExposeSecret,
    tracing::debug,
    wagate_common::{Error, Result},
    wagate_config::OffloadConfig,
};

const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Destination for offloaded media.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` and return the URL it can be fetched from.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Bucket on an S3-compatible endpoint.
pub struct S3Store {
    s3: AmazonS3,
    endpoint: String,
    bucket: String,
    custom_domain: Option<String>,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("custom_domain", &self.custom_domain)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    pub fn new(config: &OffloadConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if endpoint.is_empty() || config.bucket.is_empty() {
            return Err(Error::Offload("endpoint and bucket are required".into()));
        }
        let s3 = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(config.secret_key.expose_secret())
            .with_virtual_hosted_style_request(false)
            .with_allow_http(endpoint.starts_with("http://"))
            .build()
            .map_err(|e| Error::Offload(e.to_string()))?;
        Ok(Self {
            s3,
            endpoint,
            bucket: config.bucket.clone(),
            custom_domain: config
                .custom_domain
                .as_deref()
                .map(|d| d.trim_end_matches('/').to_string())
                .filter(|d| !d.is_empty()),
        })
    }

    /// Public URL for an object key.
    pub fn object_url(&self, key: &str) -> String {
        match &self.custom_domain {
            Some(domain) => format!("https://{domain}/{key}"),
            None => format!("{}/{}/{}", self.endpoint, self.bucket, key),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let size = body.len();
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        attributes.insert(Attribute::CacheControl, AttributeValue::from(CACHE_CONTROL));

        self.s3
            .put_opts(&Path::from(key), PutPayload::from(body), PutOptions {
                attributes,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Offload(e.to_string()))?;

        debug!(bucket = %self.bucket, key, size, "object stored");
        Ok(self.object_url(key))
    }
}
