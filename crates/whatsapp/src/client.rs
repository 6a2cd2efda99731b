use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
    wagate_common::{MediaKind, Result, TenantId},
    wagate_media::MediaSource,
};

use crate::events::InboundEvent;

/// Where a client pushes inbound events. Unbounded so the client's own
/// delivery context never blocks on the router.
pub type EventSink = mpsc::UnboundedSender<InboundEvent>;

/// Pairing-channel items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrEvent {
    /// A fresh code to show to the user. Codes rotate until one is scanned.
    Code(String),
    Success { device_identity: Option<String> },
    Timeout,
    /// Anything else the network reports (e.g. `err-client-outdated`).
    Other(String),
}

/// Result of uploading an encrypted blob to the network's media servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    #[serde(with = "base64_bytes")]
    pub media_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Media message referencing an already uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub upload: UploadedMedia,
    pub mimetype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "base64_bytes::serialize_opt"
    )]
    pub jpeg_thumbnail: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
    /// Push-to-talk voice note.
    pub ptt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutgoingMessage {
    Text { body: String },
    Media(OutgoingMedia),
}

/// Acknowledgment from the network for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: i64,
}

/// A session-bound connection to the messaging network. Cryptography and the
/// wire protocol live behind this boundary.
#[async_trait]
pub trait MessagingClient: MediaSource {
    /// Register the event sink. Only the most recent registration receives
    /// events.
    fn set_event_sink(&self, sink: EventSink);

    /// Open the pairing channel. Must be called before `connect` on a client
    /// without a device identity. Fails with `AlreadyPaired` when one exists.
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>>;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self);
    async fn logout(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
    fn is_logged_in(&self) -> bool;
    fn push_name(&self) -> Option<String>;
    /// Device identity currently bound to the client, if paired.
    fn device_identity(&self) -> Option<String>;

    async fn send_presence_available(&self) -> Result<()>;

    /// Request an 8-character linking code for pairing by phone number.
    async fn pair_phone(&self, phone: &str) -> Result<String>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia>;
    async fn send(&self, to: &str, id: &str, message: OutgoingMessage) -> Result<SendReceipt>;
}

/// Produces session-bound clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        tenant: TenantId,
        device_identity: Option<&str>,
    ) -> Result<Arc<dyn MessagingClient>>;
}

/// Message id in the network's own format: `3EB0` followed by 16 upper-case
/// hex digits.
pub fn generate_message_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("3EB0{}", &raw[..16])
}

/// Byte fields travel as standard base64 strings.
pub(crate) mod base64_bytes {
    use {
        base64::{Engine as _, engine::general_purpose::STANDARD},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn serialize_opt<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serialize(b, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
