//! Scripted in-process client for tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    wagate_common::{Error, EventKind, MediaDescriptor, MediaKind, Result, SessionStateError, TenantId},
    wagate_media::MediaSource,
    wagate_webhooks::{WebhookJob, WebhookSink},
};

use crate::{
    client::{ClientFactory, EventSink, MessagingClient, OutgoingMessage, QrEvent, SendReceipt, UploadedMedia},
    events::InboundEvent,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Records every call and replays scripted pairing events.
pub struct MockClient {
    device_identity: Mutex<Option<String>>,
    push_name: Mutex<Option<String>>,
    qr_script: Mutex<Vec<QrEvent>>,
    qr_tx: Mutex<Option<mpsc::Sender<QrEvent>>>,
    sink: Mutex<Option<EventSink>>,
    connected: AtomicBool,
    fail_connect: bool,
    media: Mutex<Option<Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
}

impl MockClient {
    pub fn new(device_identity: Option<&str>) -> Self {
        Self {
            device_identity: Mutex::new(device_identity.map(str::to_string)),
            push_name: Mutex::new(None),
            qr_script: Mutex::new(Vec::new()),
            qr_tx: Mutex::new(None),
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
            fail_connect: false,
            media: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_push_name(self, name: &str) -> Self {
        *lock(&self.push_name) = Some(name.to_string());
        self
    }

    /// Events delivered as soon as the pairing channel opens.
    pub fn with_qr_script(self, events: Vec<QrEvent>) -> Self {
        *lock(&self.qr_script) = events;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_media(self, data: Vec<u8>) -> Self {
        *lock(&self.media) = Some(data);
        self
    }

    /// Push an event into the registered sink.
    pub fn emit(&self, event: InboundEvent) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the transport dying underneath the session.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.close_qr();
        self.emit(InboundEvent::Disconnected {
            reason: reason.to_string(),
        })
    }

    pub async fn push_qr(&self, event: QrEvent) -> bool {
        let tx = lock(&self.qr_tx).clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the pairing channel without a terminal event.
    pub fn close_qr(&self) {
        lock(&self.qr_tx).take();
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, call: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        lock(&self.sent).clone()
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }
}

#[async_trait]
impl MediaSource for MockClient {
    async fn download(&self, _descriptor: &MediaDescriptor, kind: MediaKind) -> Result<Vec<u8>> {
        self.record(format!("download:{kind}"));
        lock(&self.media)
            .clone()
            .ok_or_else(|| Error::transport("media not found"))
    }
}

#[async_trait]
impl MessagingClient for MockClient {
    fn set_event_sink(&self, sink: EventSink) {
        *lock(&self.sink) = Some(sink);
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>> {
        self.record("qr");
        if lock(&self.device_identity).is_some() {
            return Err(SessionStateError::AlreadyPaired.into());
        }
        let (tx, rx) = mpsc::channel(16);
        for event in lock(&self.qr_script).drain(..) {
            let _ = tx.try_send(event);
        }
        *lock(&self.qr_tx) = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<()> {
        self.record("connect");
        if self.fail_connect {
            return Err(Error::transport("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        if self.is_logged_in() {
            self.emit(InboundEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.record("disconnect");
        self.connected.store(false, Ordering::SeqCst);
        self.close_qr();
    }

    async fn logout(&self) -> Result<()> {
        self.record("logout");
        lock(&self.device_identity).take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        lock(&self.device_identity).is_some()
    }

    fn push_name(&self) -> Option<String> {
        lock(&self.push_name).clone()
    }

    fn device_identity(&self) -> Option<String> {
        lock(&self.device_identity).clone()
    }

    async fn send_presence_available(&self) -> Result<()> {
        self.record("presence");
        Ok(())
    }

    async fn pair_phone(&self, phone: &str) -> Result<String> {
        self.record(format!("pair_phone:{phone}"));
        Ok("ABCD-EFGH".into())
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia> {
        self.record(format!("upload:{kind}"));
        Ok(UploadedMedia {
            url: format!("https://mmg.test/{kind}"),
            direct_path: format!("/v/{kind}"),
            file_length: data.len() as u64,
            ..Default::default()
        })
    }

    async fn send(&self, to: &str, id: &str, message: OutgoingMessage) -> Result<SendReceipt> {
        self.record(format!("send:{to}"));
        lock(&self.sent).push((to.to_string(), message));
        Ok(SendReceipt {
            id: id.to_string(),
            timestamp: 1_700_000_000,
        })
    }
}

/// Hands out [`MockClient`]s, either prepared per tenant or built on demand.
#[derive(Default)]
pub struct MockFactory {
    prepared: Mutex<HashMap<TenantId, MockClient>>,
    created: Mutex<HashMap<TenantId, Arc<MockClient>>>,
    fail: bool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Use `client` for the next session of `tenant`.
    pub fn prepare(&self, tenant: TenantId, client: MockClient) {
        lock(&self.prepared).insert(tenant, client);
    }

    /// The most recently created client for `tenant`.
    pub fn client(&self, tenant: TenantId) -> Option<Arc<MockClient>> {
        lock(&self.created).get(&tenant).cloned()
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn create(
        &self,
        tenant: TenantId,
        device_identity: Option<&str>,
    ) -> Result<Arc<dyn MessagingClient>> {
        if self.fail {
            return Err(Error::transport("device store unavailable"));
        }
        let client = lock(&self.prepared)
            .remove(&tenant)
            .unwrap_or_else(|| MockClient::new(device_identity));
        let client = Arc::new(client);
        lock(&self.created).insert(tenant, Arc::clone(&client));
        Ok(client)
    }
}

/// Webhook sink that keeps every job in memory.
#[derive(Default)]
pub struct RecordingSink {
    jobs: Mutex<Vec<WebhookJob>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<WebhookJob> {
        lock(&self.jobs).clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        lock(&self.jobs).iter().map(|j| j.envelope.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        lock(&self.jobs)
            .iter()
            .filter(|j| j.envelope.kind == kind)
            .count()
    }
}

impl WebhookSink for RecordingSink {
    fn enqueue(&self, job: WebhookJob) -> bool {
        lock(&self.jobs).push(job);
        true
    }
}
