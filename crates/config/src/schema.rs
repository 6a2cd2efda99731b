/// Config schema types (server, database, whatsapp, webhook, media, logging).
use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub webhook: WebhookConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Token required in the `Authorization` header for `/admin` routes.
    /// Admin routes are disabled when unset.
    #[serde(serialize_with = "serialize_option_secret")]
    pub admin_token: Option<Secret<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            admin_token: None,
        }
    }
}

// ── Database ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://wagate.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

// ── Messaging network ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Root directory for per-tenant device stores (keys, sessions, app state).
    pub store_dir: PathBuf,
    /// Seconds a non-immediate connect waits for the transport to come up.
    pub connect_wait_secs: u64,
    /// Print pairing codes to the terminal as they are issued.
    pub print_qr: bool,
    /// Root directory for per-tenant history-sync dumps.
    pub files_dir: PathBuf,
    /// Seconds an outbound media fetch may take before it is abandoned.
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("devices"),
            connect_wait_secs: 10,
            print_qr: false,
            files_dir: PathBuf::from("files"),
            request_timeout_secs: 60,
        }
    }
}

impl WhatsAppConfig {
    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Webhooks ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
    pub max_redirects: usize,
    /// Jobs waiting for delivery before new ones are dropped.
    pub queue_capacity: usize,
    /// Deliveries in flight at once.
    pub max_concurrency: usize,
    pub accept_invalid_certs: bool,
    /// Append every delivery attempt to this file when set.
    pub audit_log: Option<PathBuf>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 15,
            queue_capacity: 1024,
            max_concurrency: 16,
            accept_invalid_certs: false,
            audit_log: None,
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Media ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Backoff unit between download attempts; attempt `n` waits `n` units.
    pub retry_backoff_ms: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub transcode_timeout_secs: u64,
    /// Cold-storage offload for downloaded media. Disabled when absent.
    pub offload: Option<OffloadConfig>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 1000,
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            transcode_timeout_secs: 60,
            offload: None,
        }
    }
}

impl MediaConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }
}

/// S3-compatible object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadConfig {
    /// Base URL, e.g. `https://<account>.r2.cloudflarestorage.com`.
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    #[serde(serialize_with = "serialize_secret")]
    pub secret_key: Secret<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Public host serving the bucket, used to build returned URLs.
    #[serde(default)]
    pub custom_domain: Option<String>,
}

fn default_region() -> String {
    "auto".into()
}

// ── Logging ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append one line per inbound event to this file when set.
    pub event_log: Option<PathBuf>,
}

// ── Secret serialization ────────────────────────────────────────────────────

fn serialize_secret<S: Serializer>(secret: &Secret<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose_secret())
}

fn serialize_option_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(v) => s.serialize_some(v.expose_secret()),
        None => s.serialize_none(),
    }
}
