use std::sync::Arc;

use {
    secrecy::{ExposeSecret, Secret},
    wagate_common::{Result, SessionStateError, TenantId},
    wagate_media::{MediaPipeline, Transcoder},
    wagate_sessions::{SessionRecordStore, UserInfoCache},
    wagate_whatsapp::{ActiveSession, MessagingClient, SessionSupervisor},
};

/// Everything a request handler can reach.
pub struct GatewayState {
    pub supervisor: SessionSupervisor,
    pub media: MediaPipeline,
    pub transcoder: Transcoder,
    /// Outbound client for fetching `mediaUrl` sources.
    pub http: reqwest::Client,
    admin_token: Option<Secret<String>>,
    pub version: String,
}

impl GatewayState {
    pub fn new(
        supervisor: SessionSupervisor,
        media: MediaPipeline,
        transcoder: Transcoder,
        http: reqwest::Client,
        admin_token: Option<Secret<String>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            media,
            transcoder,
            http,
            admin_token,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn store(&self) -> &dyn SessionRecordStore {
        self.supervisor.services().store.as_ref()
    }

    pub fn cache(&self) -> &UserInfoCache {
        &self.supervisor.services().cache
    }

    /// `None` disables the admin routes.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    pub fn session(&self, tenant: TenantId) -> Result<Arc<ActiveSession>> {
        Ok(self
            .supervisor
            .session(tenant)
            .ok_or(SessionStateError::NoSession)?)
    }

    /// The tenant's client, or `NoSession` when it has none yet.
    pub fn client(&self, tenant: TenantId) -> Result<Arc<dyn MessagingClient>> {
        Ok(self
            .session(tenant)?
            .client()
            .ok_or(SessionStateError::NoSession)?)
    }
}
