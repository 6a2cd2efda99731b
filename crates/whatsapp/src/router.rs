use std::sync::Arc;

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info, warn},
    wagate_common::EventKind,
    wagate_webhooks::WebhookEnvelope,
};

use crate::{
    client::MessagingClient,
    context::TenantContext,
    events::{CRITICAL_BLOCK, InboundEvent},
    registry::ActiveSession,
};

/// Applies side effects for one tenant's inbound events and forwards the
/// subscribed ones to its webhook. Events are handled one at a time, in the
/// order the client produced them.
pub struct EventRouter {
    ctx: TenantContext,
    session: Arc<ActiveSession>,
    client: Arc<dyn MessagingClient>,
}

impl EventRouter {
    pub fn new(
        ctx: TenantContext,
        session: Arc<ActiveSession>,
        client: Arc<dyn MessagingClient>,
    ) -> Self {
        Self {
            ctx,
            session,
            client,
        }
    }

    /// Drain `rx` until every sender is gone or the session is terminated.
    /// Events already queued at termination are still handled.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    },
                    _ = self.session.terminated() => break,
                }
            }
            debug!(tenant = %self.ctx.tenant, "event router stopped");
        })
    }

    pub async fn handle(&self, event: InboundEvent) {
        if let Some(log) = &self.ctx.services.event_log
            && let Err(e) = log
                .append(&format!("tenant={} {event:?}", self.ctx.tenant))
                .await
        {
            warn!(error = %e, "event log write failed");
        }

        let mut file = None;
        match &event {
            InboundEvent::Connected => {
                self.persist_connected(true).await;
                self.session.set_connected(true);
                self.announce_presence().await;
            },
            InboundEvent::PushNameSetting => self.announce_presence().await,
            InboundEvent::AppStateSyncComplete { name } => {
                if name == CRITICAL_BLOCK {
                    self.announce_presence().await;
                }
            },
            InboundEvent::PairSuccess {
                id,
                business_name,
                platform,
            } => {
                info!(tenant = %self.ctx.tenant, jid = %id, %business_name, %platform, "paired");
                if let Err(e) = self.ctx.store().set_device_identity(self.ctx.tenant, id).await {
                    warn!(tenant = %self.ctx.tenant, error = %e, "could not store device identity");
                }
                self.ctx.services.cache.update(&self.ctx.token, |info| {
                    info.jid = id.clone();
                });
            },
            InboundEvent::StreamReplaced => info!(tenant = %self.ctx.tenant, "stream replaced"),
            InboundEvent::Message(_) => {
                info!(tenant = %self.ctx.tenant, id = event.message_id().unwrap_or(""), "message received");
            },
            InboundEvent::Receipt { kind, .. } => {
                debug!(tenant = %self.ctx.tenant, ?kind, "receipt");
            },
            InboundEvent::Presence { unavailable, .. } => {
                debug!(tenant = %self.ctx.tenant, unavailable, "presence");
            },
            InboundEvent::HistorySync(payload) => {
                file = self.dump_history(payload).await;
            },
            InboundEvent::AppState(_) => debug!(tenant = %self.ctx.tenant, "app state"),
            InboundEvent::LoggedOut { reason } => {
                info!(tenant = %self.ctx.tenant, %reason, "logged out by network");
                self.persist_connected(false).await;
                self.session.set_connected(false);
                self.session.terminate();
            },
            InboundEvent::Disconnected { reason } => {
                warn!(tenant = %self.ctx.tenant, %reason, "connection lost");
                self.persist_connected(false).await;
                self.session.set_connected(false);
                self.session.terminate();
            },
            InboundEvent::ChatPresence(_) => debug!(tenant = %self.ctx.tenant, "chat presence"),
            InboundEvent::Call { kind, .. } => info!(tenant = %self.ctx.tenant, ?kind, "call event"),
            InboundEvent::Qr(_) => debug!(tenant = %self.ctx.tenant, "qr event"),
            InboundEvent::Unhandled { kind, .. } => {
                warn!(tenant = %self.ctx.tenant, %kind, "unhandled event");
            },
        }

        let Some(envelope) = self.envelope_for(&event) else {
            return;
        };
        if !self.session.subscriptions().contains(envelope.kind) {
            debug!(tenant = %self.ctx.tenant, kind = %envelope.kind, "not subscribed, skipping webhook");
            return;
        }
        self.ctx.notify(envelope, file).await;
    }

    /// Webhook body for a forwardable event.
    fn envelope_for(&self, event: &InboundEvent) -> Option<WebhookEnvelope> {
        let kind = event.kind();
        if kind == EventKind::Unhandled {
            return None;
        }
        let envelope = WebhookEnvelope::new(kind, event.payload());
        Some(match event {
            InboundEvent::Receipt { kind: receipt, .. } => envelope.with("state", receipt.state()?),
            InboundEvent::Presence { unavailable, .. } => {
                envelope.with("state", if *unavailable { "offline" } else { "online" })
            },
            _ => envelope,
        })
    }

    async fn persist_connected(&self, connected: bool) {
        if let Err(e) = self.ctx.store().set_connected(self.ctx.tenant, connected).await {
            warn!(tenant = %self.ctx.tenant, error = %e, "could not persist connection state");
        }
    }

    async fn announce_presence(&self) {
        if self.client.push_name().is_none_or(|n| n.is_empty()) {
            return;
        }
        match self.client.send_presence_available().await {
            Ok(()) => info!(tenant = %self.ctx.tenant, "marked self as available"),
            Err(e) => warn!(tenant = %self.ctx.tenant, error = %e, "failed to send available presence"),
        }
    }

    async fn dump_history(&self, payload: &serde_json::Value) -> Option<std::path::PathBuf> {
        let seq = match self.ctx.store().next_history_seq(self.ctx.tenant).await {
            Ok(seq) => seq,
            Err(e) => {
                warn!(tenant = %self.ctx.tenant, error = %e, "no history sequence number");
                return None;
            },
        };
        let data = payload.get("Data").unwrap_or(payload);
        match self.ctx.services.history.append(self.ctx.tenant, seq, data).await {
            Ok(path) => {
                info!(tenant = %self.ctx.tenant, path = %path.display(), "history sync saved");
                Some(path)
            },
            Err(e) => {
                warn!(tenant = %self.ctx.tenant, error = %e, "failed to save history sync");
                None
            },
        }
    }
}
