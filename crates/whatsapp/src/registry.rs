use std::sync::{Arc, OnceLock, RwLock};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    wagate_common::{SessionStateError, Subscriptions, TenantId},
};

use crate::client::MessagingClient;

/// Live state of one tenant's supervised session.
pub struct ActiveSession {
    tenant: TenantId,
    token: String,
    client: OnceLock<Arc<dyn MessagingClient>>,
    subscriptions: RwLock<Subscriptions>,
    cancel: CancellationToken,
    finished: CancellationToken,
    connected: watch::Sender<bool>,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("tenant", &self.tenant)
            .field("token", &"[REDACTED]")
            .field("connected", &self.is_connected())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl ActiveSession {
    pub fn new(tenant: TenantId, token: impl Into<String>, subscriptions: Subscriptions) -> Self {
        Self {
            tenant,
            token: token.into(),
            client: OnceLock::new(),
            subscriptions: RwLock::new(subscriptions),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            connected: watch::Sender::new(false),
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The client, once the supervisor has created it.
    pub fn client(&self) -> Option<Arc<dyn MessagingClient>> {
        self.client.get().cloned()
    }

    /// Bind the client. Returns `false` if one was already bound.
    pub fn set_client(&self, client: Arc<dyn MessagingClient>) -> bool {
        self.client.set(client).is_ok()
    }

    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn set_subscriptions(&self, subscriptions: Subscriptions) {
        *self
            .subscriptions
            .write()
            .unwrap_or_else(|p| p.into_inner()) = subscriptions;
    }

    /// Ask the supervisor to tear this session down. Idempotent.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn terminated(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.cancel();
    }

    /// Resolves once teardown has completed and the supervision task exited.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

/// Process-wide map of tenants to their live sessions. At most one entry
/// exists per tenant.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<TenantId, Arc<ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the tenant's slot. Fails if a session is already registered.
    pub fn reserve(&self, session: Arc<ActiveSession>) -> Result<(), SessionStateError> {
        match self.sessions.entry(session.tenant()) {
            Entry::Occupied(_) => Err(SessionStateError::AlreadyConnected),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            },
        }
    }

    pub fn get(&self, tenant: TenantId) -> Option<Arc<ActiveSession>> {
        self.sessions.get(&tenant).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, tenant: TenantId) -> bool {
        self.sessions.contains_key(&tenant)
    }

    /// Remove the tenant's entry only if it is still `session`. A newer
    /// session for the same tenant is left alone.
    pub fn release(&self, session: &Arc<ActiveSession>) -> bool {
        self.sessions
            .remove_if(&session.tenant(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn sessions(&self) -> Vec<Arc<ActiveSession>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: i64) -> Arc<ActiveSession> {
        Arc::new(ActiveSession::new(TenantId(id), "tok", Subscriptions::all()))
    }

    #[test]
    fn one_session_per_tenant() {
        let registry = SessionRegistry::new();
        let first = session(1);
        registry.reserve(Arc::clone(&first)).unwrap();
        assert_eq!(
            registry.reserve(session(1)),
            Err(SessionStateError::AlreadyConnected)
        );
        registry.reserve(session(2)).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&registry.get(TenantId(1)).unwrap(), &first));
    }

    #[test]
    fn concurrent_reservations_admit_exactly_one() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.reserve(session(9)).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn release_ignores_newer_session() {
        let registry = SessionRegistry::new();
        let old = session(3);
        registry.reserve(Arc::clone(&old)).unwrap();
        assert!(registry.release(&old));
        let newer = session(3);
        registry.reserve(Arc::clone(&newer)).unwrap();
        assert!(!registry.release(&old));
        assert!(registry.contains(TenantId(3)));
        assert!(registry.release(&newer));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn connected_watch_and_termination() {
        let s = session(4);
        let mut rx = s.watch_connected();
        assert!(!*rx.borrow());
        s.set_connected(true);
        rx.wait_for(|c| *c).await.unwrap();
        assert!(s.is_connected());

        assert!(!s.is_terminated());
        s.terminate();
        s.terminate();
        s.terminated().await;
        assert!(s.is_terminated());
    }

    #[test]
    fn subscriptions_can_be_replaced() {
        let s = session(5);
        s.set_subscriptions(Subscriptions::parse(["Message"]));
        assert!(!s.subscriptions().is_all());
        assert_eq!(s.subscriptions().tokens(), vec!["Message".to_string()]);
    }
}
