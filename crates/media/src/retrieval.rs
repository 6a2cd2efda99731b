use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::{info, warn},
    wagate_common::{Error, MediaDescriptor, MediaKind, Result},
    wagate_config::MediaConfig,
};

use crate::{
    mime,
    offload::{ObjectStore, S3Store},
};

/// Attempts made by [`MediaPipeline::fetch`] before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Something that can download and decrypt a media blob.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn download(&self, descriptor: &MediaDescriptor, kind: MediaKind) -> Result<Vec<u8>>;
}

/// JSON body of a media download request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "messageType", default)]
    pub message_type: String,
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "directPath", default)]
    pub direct_path: String,
    #[serde(rename = "mediaKey", default)]
    pub media_key: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(rename = "fileEncSHA256", default)]
    pub file_enc_sha256: String,
    #[serde(rename = "fileSHA256", default)]
    pub file_sha256: String,
    #[serde(rename = "fileLength", default)]
    pub file_length: u64,
    #[serde(rename = "fileName", default)]
    pub file_name: Option<String>,
}

impl DownloadRequest {
    /// Decode the base64 fields and check the required ones.
    pub fn descriptor(&self) -> Result<MediaDescriptor> {
        let media_key = decode_field("mediaKey", &self.media_key)?;
        let file_enc_sha256 = decode_field("fileEncSHA256", &self.file_enc_sha256)?;
        let file_sha256 = decode_field("fileSHA256", &self.file_sha256)?;
        if self.url.is_empty() || self.media_key.is_empty() || self.mimetype.is_empty() {
            return Err(Error::validation("URL, mediaKey and mimetype are required"));
        }
        Ok(MediaDescriptor {
            url: self.url.clone(),
            direct_path: self.direct_path.clone(),
            media_key,
            file_sha256,
            file_enc_sha256,
            mimetype: self.mimetype.clone(),
            file_length: self.file_length,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| Error::validation(format!("invalid {name}")))
}

/// Reference returned when the blob was moved to cold storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffloadedMedia {
    pub url: String,
    pub mimetype: String,
    pub size: usize,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Outcome of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved {
    Offloaded(OffloadedMedia),
    /// Raw bytes; used when offload is disabled or failed.
    Inline { data: Vec<u8>, mimetype: String },
}

/// Download with bounded retry, then optionally push to cold storage.
#[derive(Clone)]
pub struct MediaPipeline {
    backoff: Duration,
    offload: Option<Arc<dyn ObjectStore>>,
}

impl MediaPipeline {
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            offload: None,
        }
    }

    pub fn with_offload(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.offload = Some(store);
        self
    }

    pub fn from_config(config: &MediaConfig) -> Result<Self> {
        let pipeline = Self::new(config.retry_backoff());
        Ok(match &config.offload {
            Some(offload) => pipeline.with_offload(Arc::new(S3Store::new(offload)?)),
            None => pipeline,
        })
    }

    pub fn offload_enabled(&self) -> bool {
        self.offload.is_some()
    }

    /// Fetch decrypted bytes. `message_type` is validated before any network
    /// call. Makes at most [`MAX_ATTEMPTS`] attempts, sleeping `n * backoff`
    /// after failed attempt `n`; an empty payload or one that does not hash
    /// to `file_sha256` counts as a failure.
    pub async fn fetch<S: MediaSource + ?Sized>(
        &self,
        source: &S,
        descriptor: &MediaDescriptor,
        message_type: &str,
    ) -> Result<Vec<u8>> {
        let kind = MediaKind::from_message_type(message_type)?;

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match source
                .download(descriptor, kind)
                .await
                .and_then(|data| verify(descriptor, data))
            {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(attempt, url = %descriptor.url, error = %e, "media download failed");
                    last_error = e.to_string();
                },
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(Error::MediaFetch {
            attempts: MAX_ATTEMPTS,
            reason: last_error,
        })
    }

    /// Serve a download request: fetch, then offload when configured. A
    /// failed offload falls back to returning the bytes.
    pub async fn retrieve<S: MediaSource + ?Sized>(
        &self,
        source: &S,
        request: &DownloadRequest,
    ) -> Result<Retrieved> {
        let kind = MediaKind::from_message_type(&request.message_type)?;
        let descriptor = request.descriptor()?;
        let data = self.fetch(source, &descriptor, kind.message_type()).await?;
        let mimetype = descriptor.mimetype.clone();

        let Some(store) = &self.offload else {
            return Ok(Retrieved::Inline { data, mimetype });
        };

        let file_name = request
            .file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| synthesize_name(kind, &mimetype));
        let size = data.len();

        match store.put(&file_name, data.clone(), &mimetype).await {
            Ok(url) => {
                info!(file_name, size, "media offloaded");
                Ok(Retrieved::Offloaded(OffloadedMedia {
                    url,
                    mimetype,
                    size,
                    file_name,
                }))
            },
            Err(e) => {
                warn!(file_name, error = %e, "offload failed, returning bytes directly");
                Ok(Retrieved::Inline { data, mimetype })
            },
        }
    }
}

fn verify(descriptor: &MediaDescriptor, data: Vec<u8>) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(Error::transport("no data received"));
    }
    if !descriptor.file_sha256.is_empty()
        && Sha256::digest(&data).as_slice() != descriptor.file_sha256.as_slice()
    {
        return Err(Error::transport("plaintext hash mismatch"));
    }
    Ok(data)
}

/// `<kind>-<uuid>.<ext>`
fn synthesize_name(kind: MediaKind, mimetype: &str) -> String {
    format!(
        "{kind}-{}.{}",
        uuid::Uuid::new_v4(),
        mime::extension_for(mimetype)
    )
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    /// Source that fails a fixed number of times before succeeding.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        payload: Vec<u8>,
    }

    impl FlakySource {
        fn new(failures: u32, payload: &[u8]) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                payload: payload.to_vec(),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaSource for FlakySource {
        async fn download(&self, _: &MediaDescriptor, _: MediaKind) -> Result<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(Error::transport("media server unavailable"))
            } else {
                Ok(self.payload.clone())
            }
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        fail: bool,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put(&self, key: &str, _body: Vec<u8>, _ct: &str) -> Result<String> {
            self.keys.lock().unwrap().push(key.to_string());
            if self.fail {
                Err(Error::Offload("bucket gone".into()))
            } else {
                Ok(format!("https://cdn.test/{key}"))
            }
        }
    }

    fn descriptor(payload: &[u8]) -> MediaDescriptor {
        MediaDescriptor {
            url: "https://mmg.test/blob".into(),
            media_key: vec![1; 32],
            file_sha256: Sha256::digest(payload).to_vec(),
            mimetype: "image/jpeg".into(),
            file_length: payload.len() as u64,
            ..Default::default()
        }
    }

    fn request(payload: &[u8], file_name: Option<&str>) -> DownloadRequest {
        DownloadRequest {
            message_type: "imageMessage".into(),
            url: "https://mmg.test/blob".into(),
            media_key: STANDARD.encode([1u8; 32]),
            mimetype: "image/jpeg".into(),
            file_sha256: STANDARD.encode(Sha256::digest(payload)),
            file_length: payload.len() as u64,
            file_name: file_name.map(str::to_string),
            ..Default::default()
        }
    }

    fn pipeline() -> MediaPipeline {
        MediaPipeline::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn permanent_failure_stops_after_three_attempts() {
        let source = FlakySource::new(u32::MAX, b"x");
        let err = pipeline()
            .fetch(&source, &descriptor(b"x"), "imageMessage")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MediaFetch { attempts: 3, .. }));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn transient_failure_recovers_and_hash_matches() {
        let payload = b"\xFF\xD8\xFFjpeg bytes";
        let source = FlakySource::new(2, payload);
        let desc = descriptor(payload);
        let data = pipeline()
            .fetch(&source, &desc, "imageMessage")
            .await
            .unwrap();
        assert_eq!(source.calls(), 3);
        assert_eq!(Sha256::digest(&data).as_slice(), desc.file_sha256.as_slice());
    }

    #[tokio::test]
    async fn invalid_kind_makes_no_attempt() {
        let source = FlakySource::new(0, b"x");
        let err = pipeline()
            .fetch(&source, &descriptor(b"x"), "contactMessage")
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn corrupt_and_empty_payloads_are_failures() {
        let corrupt = FlakySource::new(0, b"tampered");
        assert!(
            pipeline()
                .fetch(&corrupt, &descriptor(b"original"), "imageMessage")
                .await
                .is_err()
        );
        assert_eq!(corrupt.calls(), 3);

        let empty = FlakySource::new(0, b"");
        let mut desc = descriptor(b"");
        desc.file_sha256.clear();
        assert!(
            pipeline()
                .fetch(&empty, &desc, "imageMessage")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn request_validation() {
        let mut req = request(b"x", None);
        req.media_key = "not base64!".into();
        assert!(req.descriptor().unwrap_err().to_string().contains("mediaKey"));

        let mut req = request(b"x", None);
        req.mimetype.clear();
        assert!(req.descriptor().is_err());

        let mut req = request(b"x", None);
        req.message_type = "imageMessageX".into();
        let source = FlakySource::new(0, b"x");
        assert!(pipeline().retrieve(&source, &req).await.is_err());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn retrieve_without_offload_returns_bytes() {
        let source = FlakySource::new(0, b"img");
        let out = pipeline().retrieve(&source, &request(b"img", None)).await.unwrap();
        assert_eq!(out, Retrieved::Inline {
            data: b"img".to_vec(),
            mimetype: "image/jpeg".into()
        });
    }

    #[tokio::test]
    async fn retrieve_offloads_under_synthesized_name() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline().with_offload(store.clone());
        let source = FlakySource::new(0, b"img");

        let Retrieved::Offloaded(media) = pipeline
            .retrieve(&source, &request(b"img", None))
            .await
            .unwrap()
        else {
            panic!("expected offloaded media");
        };
        assert!(media.file_name.starts_with("image-"));
        assert!(media.file_name.ends_with(".jpg"));
        assert_eq!(media.url, format!("https://cdn.test/{}", media.file_name));
        assert_eq!(media.size, 3);

        let json = serde_json::to_value(&media).unwrap();
        assert!(json.get("fileName").is_some());
    }

    #[tokio::test]
    async fn offload_failure_falls_back_to_bytes() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let pipeline = pipeline().with_offload(store.clone());
        let source = FlakySource::new(0, b"img");

        let out = pipeline
            .retrieve(&source, &request(b"img", Some("cat.jpg")))
            .await
            .unwrap();
        assert!(matches!(out, Retrieved::Inline { ref data, .. } if data == b"img"));
        assert_eq!(*store.keys.lock().unwrap(), vec!["cat.jpg".to_string()]);
    }
}
