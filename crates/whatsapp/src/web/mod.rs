//! Network client over `whatsapp-rust`.
//!
//! Every tenant gets its own [`Bot`] and a sled device store under
//! `<store_dir>/user_<id>`. Library events are translated into
//! [`InboundEvent`]s for the router and, while pairing, into [`QrEvent`]s.
//! The library reconnects on its own after transient drops; once its run
//! task ends the session is reported lost.

mod convert;
mod store;

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex as StdMutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    tokio::{
        sync::{Mutex, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    wacore::types::{events::Event, presence::Presence},
    wacore_binary::jid::Jid,
    wagate_common::{Error, MediaDescriptor, MediaKind, Result, SessionStateError, TenantId},
    wagate_config::WhatsAppConfig,
    wagate_media::MediaSource,
    whatsapp_rust::{bot::Bot, client::Client, pair_code::PairCodeOptions},
    whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory,
    whatsapp_rust_ureq_http_client::UreqHttpClient,
};

pub use store::SledStore;

use crate::{
    client::{
        ClientFactory, EventSink, MessagingClient, OutgoingMessage, QrEvent, SendReceipt,
        UploadedMedia,
    },
    events::InboundEvent,
};

const QR_CHANNEL_CAPACITY: usize = 16;

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ── Shared state ────────────────────────────────────────────────────────────

/// State written from the library's event handler and read by the client.
struct Shared {
    tenant: TenantId,
    sink: StdMutex<Option<EventSink>>,
    qr: StdMutex<Option<mpsc::Sender<QrEvent>>>,
    connected: AtomicBool,
    /// Set once `disconnect` was requested, so the run task ending is not
    /// reported as a lost connection.
    closing: AtomicBool,
    push_name: StdMutex<Option<String>>,
    jid: StdMutex<Option<String>>,
}

impl Shared {
    fn new(tenant: TenantId, device_identity: Option<&str>) -> Self {
        Self {
            tenant,
            sink: StdMutex::new(None),
            qr: StdMutex::new(None),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            push_name: StdMutex::new(None),
            jid: StdMutex::new(device_identity.map(str::to_string)),
        }
    }

    fn emit(&self, event: InboundEvent) {
        match lock(&self.sink).as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!(tenant = %self.tenant, "event sink closed, event dropped");
                }
            },
            None => debug!(tenant = %self.tenant, event = event.name(), "no event sink"),
        }
    }

    /// Forward a pairing event; terminal ones close the channel.
    fn pairing(&self, event: QrEvent) -> bool {
        let terminal = matches!(event, QrEvent::Success { .. } | QrEvent::Timeout);
        let mut qr = lock(&self.qr);
        let delivered = match qr.as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        };
        if terminal {
            qr.take();
        }
        delivered
    }

    async fn on_event(&self, event: Event, client: Arc<Client>) {
        match event {
            Event::PairingQrCode { code, .. } => {
                if !self.pairing(QrEvent::Code(code.clone())) {
                    self.emit(InboundEvent::Qr(serde_json::json!({ "code": code })));
                }
            },
            Event::PairSuccess(success) => {
                let jid = success.id.to_string();
                *lock(&self.jid) = Some(jid.clone());
                self.pairing(QrEvent::Success {
                    device_identity: Some(jid.clone()),
                });
                self.emit(InboundEvent::PairSuccess {
                    id: jid,
                    business_name: success.business_name,
                    platform: success.platform,
                });
            },
            Event::Connected(_) => {
                self.connected.store(true, Ordering::SeqCst);
                let name = client.get_push_name().await;
                *lock(&self.push_name) = (!name.is_empty()).then_some(name);
                if let Some(pn) = client.get_pn().await {
                    *lock(&self.jid) = Some(pn.to_string());
                }
                self.emit(InboundEvent::Connected);
            },
            Event::Disconnected(_) => {
                self.connected.store(false, Ordering::SeqCst);
                debug!(tenant = %self.tenant, "transport dropped, library reconnecting");
            },
            Event::LoggedOut(out) => {
                self.connected.store(false, Ordering::SeqCst);
                lock(&self.jid).take();
                self.pairing(QrEvent::Timeout);
                self.emit(InboundEvent::LoggedOut {
                    reason: format!("{:?}", out.reason),
                });
            },
            Event::StreamReplaced(_) => {
                self.connected.store(false, Ordering::SeqCst);
                self.emit(InboundEvent::StreamReplaced);
            },
            Event::Message(message, info) => {
                self.emit(InboundEvent::Message(convert::message_payload(&message, &info)));
            },
            Event::Receipt(receipt) => self.emit(InboundEvent::Receipt {
                kind: convert::receipt_kind(&receipt.r#type),
                payload: convert::payload(&receipt),
            }),
            Event::Presence(presence) => self.emit(InboundEvent::Presence {
                unavailable: presence.unavailable,
                payload: convert::payload(&presence),
            }),
            Event::ChatPresence(update) => {
                self.emit(InboundEvent::ChatPresence(convert::payload(&update)));
            },
            Event::HistorySync(sync) => {
                self.emit(InboundEvent::HistorySync(convert::payload(&sync)));
            },
            other => self.emit(InboundEvent::Unhandled {
                kind: convert::variant_name(&other),
                payload: serde_json::Value::Null,
            }),
        }
    }

    /// The library's run task ended without a `disconnect` request.
    fn lost(&self, reason: String) {
        self.connected.store(false, Ordering::SeqCst);
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        warn!(tenant = %self.tenant, %reason, "network client stopped");
        self.pairing(QrEvent::Timeout);
        self.emit(InboundEvent::Disconnected { reason });
    }
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct WebClient {
    tenant: TenantId,
    store: Arc<SledStore>,
    client: Arc<Client>,
    bot: Mutex<Bot>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WebClient {
    fn recipient(to: &str) -> Result<Jid> {
        to.parse()
            .map_err(|_| Error::validation(format!("invalid recipient: {to}")))
    }
}

#[async_trait]
impl MediaSource for WebClient {
    async fn download(&self, descriptor: &MediaDescriptor, kind: MediaKind) -> Result<Vec<u8>> {
        let media = convert::Downloadable::new(descriptor, kind);
        self.client
            .download(media.as_dyn())
            .await
            .map_err(Error::transport)
    }
}

#[async_trait]
impl MessagingClient for WebClient {
    fn set_event_sink(&self, sink: EventSink) {
        *lock(&self.shared.sink) = Some(sink);
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>> {
        if self.is_logged_in() {
            return Err(SessionStateError::AlreadyPaired.into());
        }
        let (tx, rx) = mpsc::channel(QR_CHANNEL_CAPACITY);
        *lock(&self.shared.qr) = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<()> {
        let mut bot = self.bot.lock().await;
        if lock(&self.watcher).is_some() {
            return Err(Error::transport("client already started"));
        }
        let run = bot.run().await.map_err(Error::transport)?;

        let shared = Arc::clone(&self.shared);
        *lock(&self.watcher) = Some(tokio::spawn(async move {
            let reason = match run.await {
                Ok(()) => "connection closed".to_string(),
                Err(e) => format!("connection task failed: {e}"),
            };
            shared.lost(reason);
        }));
        info!(tenant = %self.tenant, "network client started");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.client.disconnect().await;
        self.shared.connected.store(false, Ordering::SeqCst);
        lock(&self.shared.qr).take();
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        if let Err(e) = self.store.flush().await {
            warn!(tenant = %self.tenant, error = %e, "could not flush device store");
        }
    }

    /// Unlink locally: stop the client and wipe the device store so the next
    /// session pairs from scratch.
    async fn logout(&self) -> Result<()> {
        self.disconnect().await;
        lock(&self.shared.jid).take();
        self.store.wipe().map_err(Error::transport)?;
        self.store.flush().await.map_err(Error::transport)?;
        info!(tenant = %self.tenant, "device unlinked");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        lock(&self.shared.jid).is_some()
    }

    fn push_name(&self) -> Option<String> {
        lock(&self.shared.push_name).clone()
    }

    fn device_identity(&self) -> Option<String> {
        lock(&self.shared.jid).clone()
    }

    async fn send_presence_available(&self) -> Result<()> {
        self.client
            .send_presence(Presence::Available)
            .await
            .map_err(Error::transport)
    }

    async fn pair_phone(&self, phone: &str) -> Result<String> {
        self.client
            .pair_with_code(PairCodeOptions {
                phone_number: phone.to_string(),
                ..Default::default()
            })
            .await
            .map_err(Error::transport)
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia> {
        let uploaded = self
            .client
            .upload(data, convert::media_type(kind))
            .await
            .map_err(Error::transport)?;
        Ok(UploadedMedia {
            url: uploaded.url,
            direct_path: uploaded.direct_path,
            media_key: uploaded.media_key.to_vec(),
            file_enc_sha256: uploaded.file_enc_sha256.to_vec(),
            file_sha256: uploaded.file_sha256.to_vec(),
            file_length: uploaded.file_length,
        })
    }

    async fn send(&self, to: &str, id: &str, message: OutgoingMessage) -> Result<SendReceipt> {
        let jid = Self::recipient(to)?;
        let sent = self
            .client
            .send_message(jid, convert::outgoing(message))
            .await
            .map_err(Error::transport)?;
        debug!(tenant = %self.tenant, requested = id, id = %sent, "message sent");
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(SendReceipt {
            id: sent,
            timestamp,
        })
    }
}

// ── Factory ─────────────────────────────────────────────────────────────────

/// Builds one library client per session over its tenant's device store.
#[derive(Debug, Clone)]
pub struct WebFactory {
    store_dir: PathBuf,
}

impl WebFactory {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self::new(config.store_dir.clone())
    }

    pub fn store_path(&self, tenant: TenantId) -> PathBuf {
        self.store_dir.join(format!("user_{tenant}"))
    }
}

#[async_trait]
impl ClientFactory for WebFactory {
    async fn create(
        &self,
        tenant: TenantId,
        device_identity: Option<&str>,
    ) -> Result<Arc<dyn MessagingClient>> {
        let store_path = self.store_path(tenant);
        let store = Arc::new(SledStore::open(&store_path)?);
        // A stored identity without device keys cannot log in; pair again.
        let has_device = store.exists().await.map_err(Error::transport)?;
        let shared = Arc::new(Shared::new(
            tenant,
            device_identity.filter(|_| has_device),
        ));

        let handler = Arc::clone(&shared);
        let bot = Bot::builder()
            .with_backend(store.clone())
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, client| {
                let shared = Arc::clone(&handler);
                async move { shared.on_event(event, client).await }
            })
            .build()
            .await
            .map_err(Error::transport)?;

        debug!(%tenant, path = %store_path.display(), "network client created");
        Ok(Arc::new(WebClient {
            tenant,
            store,
            client: bot.client(),
            bot: Mutex::new(bot),
            watcher: StdMutex::new(None),
            shared,
        }))
    }
}
