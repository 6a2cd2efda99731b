use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    serde_json::json,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, error, info, warn},
    wagate_common::{Error, EventKind, Result, SessionStateError, Subscriptions, TenantId},
    wagate_config::WhatsAppConfig,
    wagate_sessions::{SessionRecord, UserInfo},
    wagate_webhooks::WebhookEnvelope,
};

use crate::{
    client::{ClientFactory, MessagingClient},
    context::{Services, TenantContext},
    pairing::{Pairing, PairingOutcome},
    registry::{ActiveSession, SessionRegistry},
    router::EventRouter,
};

/// How long teardown waits for the router to drain queued events.
const ROUTER_DRAIN: Duration = Duration::from_secs(5);

const KILL_REASON: &str = "Kill signal received";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a non-immediate start waits for the session to report
    /// connected before returning anyway.
    pub connect_wait: Duration,
    pub print_qr: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_wait: Duration::from_secs(10),
            print_qr: false,
        }
    }
}

impl SupervisorConfig {
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self {
            connect_wait: config.connect_wait(),
            print_qr: config.print_qr,
        }
    }
}

/// Parameters for one session start.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub tenant: TenantId,
    pub token: String,
    pub device_identity: Option<String>,
    pub subscriptions: Subscriptions,
    /// Return as soon as supervision is spawned instead of waiting up to
    /// `connect_wait` for the connection.
    pub immediate: bool,
}

impl StartRequest {
    pub fn from_record(record: &SessionRecord, immediate: bool) -> Self {
        Self {
            tenant: record.id,
            token: record.token.clone(),
            device_identity: record.device_identity().map(str::to_string),
            subscriptions: record.events.clone(),
            immediate,
        }
    }
}

/// Owns every tenant's session lifecycle: start, pairing, event routing and
/// teardown.
#[derive(Clone)]
pub struct SessionSupervisor {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn ClientFactory>,
    services: Services,
    config: SupervisorConfig,
}

impl SessionSupervisor {
    pub fn new(factory: Arc<dyn ClientFactory>, services: Services, config: SupervisorConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            factory,
            services,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn session(&self, tenant: TenantId) -> Option<Arc<ActiveSession>> {
        self.registry.get(tenant)
    }

    /// Register a session for the tenant and spawn its supervision task.
    /// Fails with `AlreadyConnected` if the tenant already has one.
    pub async fn start_session(&self, request: StartRequest) -> Result<Arc<ActiveSession>> {
        let session = Arc::new(ActiveSession::new(
            request.tenant,
            request.token.clone(),
            request.subscriptions.clone(),
        ));
        self.registry.reserve(Arc::clone(&session))?;
        info!(tenant = %request.tenant, events = %request.subscriptions.to_csv(), "starting session");

        let mut connected = session.watch_connected();
        tokio::spawn(
            self.clone()
                .supervise(Arc::clone(&session), request.device_identity),
        );

        if !request.immediate {
            let settled = async {
                tokio::select! {
                    _ = connected.wait_for(|c| *c) => {},
                    _ = session.finished() => {},
                }
            };
            if tokio::time::timeout(self.config.connect_wait, settled)
                .await
                .is_err()
            {
                debug!(tenant = %request.tenant, "not connected yet, returning");
            }
        }
        Ok(session)
    }

    /// Signal the tenant's session to tear down.
    pub fn stop_session(&self, tenant: TenantId) -> Result<()> {
        let session = self
            .registry
            .get(tenant)
            .ok_or(SessionStateError::NoSession)?;
        info!(%tenant, "stop requested");
        session.terminate();
        Ok(())
    }

    /// Unlink the device from the network, then tear the session down.
    pub async fn logout(&self, tenant: TenantId) -> Result<()> {
        let session = self
            .registry
            .get(tenant)
            .ok_or(SessionStateError::NoSession)?;
        let client = session.client().ok_or(SessionStateError::NotConnected)?;
        if !client.is_connected() {
            return Err(SessionStateError::NotConnected.into());
        }
        if !client.is_logged_in() {
            return Err(SessionStateError::NotLoggedIn.into());
        }
        client.logout().await?;
        info!(%tenant, "logged out");
        session.terminate();
        Ok(())
    }

    /// Start an immediate session for every tenant persisted as connected.
    /// Returns how many were started.
    pub async fn resume_connected(&self) -> Result<usize> {
        let records = self.services.store.list_connected().await?;
        let mut started = 0;
        for record in records {
            self.services.cache.insert(UserInfo::from(&record));
            match self
                .start_session(StartRequest::from_record(&record, true))
                .await
            {
                Ok(_) => started += 1,
                Err(e) => warn!(tenant = %record.id, error = %e, "could not resume session"),
            }
        }
        info!(started, "resumed connected sessions");
        Ok(started)
    }

    /// Terminate every session and wait up to `grace` for their teardown.
    pub async fn shutdown(&self, grace: Duration) {
        let sessions = self.registry.sessions();
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "stopping sessions");
        for session in &sessions {
            session.terminate();
        }
        let all = join_all(sessions.iter().map(|s| s.finished()));
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!(remaining = self.registry.len(), "sessions still running at shutdown");
        }
    }

    // ── Supervision task ────────────────────────────────────────────────────

    async fn supervise(self, session: Arc<ActiveSession>, device_identity: Option<String>) {
        let tenant = session.tenant();
        let ctx = TenantContext::new(tenant, session.token(), self.services.clone());

        let client = match self
            .factory
            .create(tenant, device_identity.as_deref())
            .await
        {
            Ok(client) => client,
            Err(e) => return self.abandon(&session, None, e).await,
        };
        session.set_client(Arc::clone(&client));

        let (tx, rx) = mpsc::unbounded_channel();
        client.set_event_sink(tx);
        let router =
            EventRouter::new(ctx.clone(), Arc::clone(&session), Arc::clone(&client)).spawn(rx);

        if let Err(e) = self
            .bring_up(&ctx, &session, client.as_ref(), device_identity.is_some())
            .await
        {
            router.abort();
            return self.abandon(&session, Some(client.as_ref()), e).await;
        }

        session.terminated().await;
        self.teardown(&ctx, &session, client.as_ref(), router).await;
    }

    /// Connect, pairing first when the tenant has no device identity.
    async fn bring_up(
        &self,
        ctx: &TenantContext,
        session: &ActiveSession,
        client: &dyn MessagingClient,
        paired: bool,
    ) -> Result<()> {
        let qr = if paired {
            None
        } else {
            match client.qr_channel().await {
                Ok(rx) => Some(rx),
                Err(Error::SessionState(SessionStateError::AlreadyPaired)) => {
                    debug!(tenant = %ctx.tenant, "client already paired, skipping pairing");
                    None
                },
                Err(e) => return Err(e),
            }
        };

        client.connect().await.map_err(|e| match e {
            Error::Transport(_) => e,
            other => Error::transport(other),
        })?;

        if let Some(rx) = qr {
            match Pairing::new(ctx, session, self.config.print_qr)
                .run(rx)
                .await?
            {
                PairingOutcome::Paired { .. } | PairingOutcome::Cancelled => {},
                PairingOutcome::TimedOut => session.terminate(),
            }
        }
        Ok(())
    }

    /// Startup failed: drop the session. Only a pending pairing image is
    /// cleared from the store; identity and subscriptions are kept.
    async fn abandon(
        &self,
        session: &Arc<ActiveSession>,
        client: Option<&dyn MessagingClient>,
        e: Error,
    ) {
        let tenant = session.tenant();
        error!(%tenant, error = %e, "session failed to start");
        if let Some(client) = client {
            client.disconnect().await;
            if let Err(e) = self.services.store.set_qrcode(tenant, "").await {
                warn!(%tenant, error = %e, "could not clear pairing code");
            }
        }
        self.registry.release(session);
        session.set_connected(false);
        session.terminate();
        session.mark_finished();
    }

    async fn teardown(
        &self,
        ctx: &TenantContext,
        session: &Arc<ActiveSession>,
        client: &dyn MessagingClient,
        router: JoinHandle<()>,
    ) {
        info!(tenant = %ctx.tenant, "tearing down session");
        client.disconnect().await;
        if tokio::time::timeout(ROUTER_DRAIN, router).await.is_err() {
            warn!(tenant = %ctx.tenant, "event router did not drain in time");
        }
        if let Err(e) = ctx.store().clear_session(ctx.tenant).await {
            warn!(tenant = %ctx.tenant, error = %e, "could not clear session state");
        }
        self.registry.release(session);
        session.set_connected(false);
        ctx.notify(
            WebhookEnvelope::new(EventKind::LoggedOut, json!({ "reason": KILL_REASON })),
            None,
        )
        .await;
        session.mark_finished();
        info!(tenant = %ctx.tenant, "session stopped");
    }
}
