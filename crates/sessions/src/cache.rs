use {dashmap::DashMap, wagate_common::TenantId};

use crate::store::SessionRecord;

/// The mutable tenant fields consulted on every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: TenantId,
    pub jid: String,
    pub webhook: String,
    pub events: String,
    pub token: String,
}

impl From<&SessionRecord> for UserInfo {
    fn from(r: &SessionRecord) -> Self {
        Self {
            id: r.id,
            jid: r.jid.clone(),
            webhook: r.webhook.clone(),
            events: r.events.to_csv(),
            token: r.token.clone(),
        }
    }
}

/// Token-keyed mirror of [`UserInfo`]. Entries never expire; writers must
/// refresh or invalidate after changing the underlying row.
#[derive(Default)]
pub struct UserInfoCache {
    entries: DashMap<String, UserInfo>,
}

impl UserInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<UserInfo> {
        self.entries.get(token).map(|e| e.value().clone())
    }

    pub fn insert(&self, info: UserInfo) {
        self.entries.insert(info.token.clone(), info);
    }

    /// Apply `f` to the entry for `token`, if cached. Returns whether an
    /// entry was updated.
    pub fn update(&self, token: &str, f: impl FnOnce(&mut UserInfo)) -> bool {
        match self.entries.get_mut(token) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            },
            None => false,
        }
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Drop every entry belonging to `tenant`, whatever its token.
    pub fn invalidate_tenant(&self, tenant: TenantId) {
        self.entries.retain(|_, info| info.id != tenant);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
