use std::{path::PathBuf, sync::Arc};

use {
    tracing::{debug, warn},
    wagate_common::TenantId,
    wagate_sessions::{HistorySyncLog, SessionRecordStore, UserInfo, UserInfoCache},
    wagate_webhooks::{AuditLog, WebhookEnvelope, WebhookJob, WebhookSink},
};

/// Process-wide collaborators shared by every supervised session.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn SessionRecordStore>,
    pub cache: Arc<UserInfoCache>,
    pub webhooks: Arc<dyn WebhookSink>,
    pub history: HistorySyncLog,
    /// One line per inbound event when set.
    pub event_log: Option<Arc<AuditLog>>,
}

/// Services bound to one tenant.
#[derive(Clone)]
pub struct TenantContext {
    pub tenant: TenantId,
    pub token: String,
    pub services: Services,
}

impl TenantContext {
    pub fn new(tenant: TenantId, token: impl Into<String>, services: Services) -> Self {
        Self {
            tenant,
            token: token.into(),
            services,
        }
    }

    pub fn store(&self) -> &dyn SessionRecordStore {
        self.services.store.as_ref()
    }

    /// Current webhook URL: cache first, then the store (refilling the
    /// cache). Empty when none is configured.
    pub async fn webhook_url(&self) -> String {
        if let Some(info) = self.services.cache.get(&self.token) {
            return info.webhook;
        }
        match self.services.store.get(self.tenant).await {
            Ok(Some(record)) => {
                let info = UserInfo::from(&record);
                let url = info.webhook.clone();
                self.services.cache.insert(info);
                url
            },
            Ok(None) => String::new(),
            Err(e) => {
                warn!(tenant = %self.tenant, error = %e, "webhook lookup failed");
                String::new()
            },
        }
    }

    /// Queue a webhook regardless of subscriptions. Returns whether a job
    /// was queued.
    pub async fn notify(&self, envelope: WebhookEnvelope, file: Option<PathBuf>) -> bool {
        let url = self.webhook_url().await;
        if url.is_empty() {
            debug!(tenant = %self.tenant, kind = %envelope.kind, "no webhook configured, event dropped");
            return false;
        }
        self.services.webhooks.enqueue(WebhookJob {
            tenant: self.tenant,
            url,
            token: self.token.clone(),
            envelope,
            file,
        })
    }
}
