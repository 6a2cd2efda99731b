use {
    async_trait::async_trait,
    serde::Serialize,
    wagate_common::{Error, Result, SessionStateError, Subscriptions, TenantId},
};

/// A tenant row as persisted in the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: TenantId,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub webhook: String,
    /// Device identity assigned by the network after pairing. Empty until
    /// the first successful pairing.
    pub jid: String,
    pub events: Subscriptions,
    pub connected: bool,
    /// Pending pairing image as a `data:image/png;base64,` URL.
    pub qrcode: String,
    pub history_seq: i64,
}

impl SessionRecord {
    pub fn device_identity(&self) -> Option<&str> {
        (!self.jid.is_empty()).then_some(self.jid.as_str())
    }
}

/// Fields supplied when provisioning a tenant.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub token: String,
    pub webhook: String,
    pub events: String,
}

/// Storage for tenant rows.
///
/// Every mutator is a no-op (not an error) on an unknown tenant, except
/// `next_history_seq`, which needs the row to exist.
#[async_trait]
pub trait SessionRecordStore: Send + Sync {
    async fn get(&self, tenant: TenantId) -> Result<Option<SessionRecord>>;
    async fn get_by_token(&self, token: &str) -> Result<Option<SessionRecord>>;
    async fn list(&self) -> Result<Vec<SessionRecord>>;
    /// Tenants whose last known state was connected.
    async fn list_connected(&self) -> Result<Vec<SessionRecord>>;

    async fn create(&self, user: NewUser) -> Result<SessionRecord>;
    async fn delete(&self, tenant: TenantId) -> Result<bool>;

    async fn set_connected(&self, tenant: TenantId, connected: bool) -> Result<()>;
    async fn set_qrcode(&self, tenant: TenantId, qrcode: &str) -> Result<()>;
    async fn set_device_identity(&self, tenant: TenantId, jid: &str) -> Result<()>;
    async fn set_webhook(&self, tenant: TenantId, webhook: &str) -> Result<()>;
    async fn set_events(&self, tenant: TenantId, events: &Subscriptions) -> Result<()>;

    /// Teardown write: `connected = false` and no pending pairing image.
    async fn clear_session(&self, tenant: TenantId) -> Result<()>;

    /// Pairing success write: pending image cleared, `connected = true`, and
    /// the device identity stored when known.
    async fn mark_paired(&self, tenant: TenantId, jid: Option<&str>) -> Result<()>;

    /// Increment and return the tenant's history-sync sequence number.
    async fn next_history_seq(&self, tenant: TenantId) -> Result<i64>;
}

// ── SQLite ──────────────────────────────────────────────────────────────────

/// SQLite-backed tenant store.
pub struct SqliteSessionStore {
    pool: sqlx::SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    token: String,
    webhook: String,
    jid: String,
    events: String,
    connected: i32,
    qrcode: String,
    history_seq: i64,
}

impl From<UserRow> for SessionRecord {
    fn from(r: UserRow) -> Self {
        Self {
            id: TenantId(r.id),
            name: r.name,
            token: r.token,
            webhook: r.webhook,
            jid: r.jid,
            events: Subscriptions::from_csv(&r.events),
            connected: r.connected != 0,
            qrcode: r.qrcode,
            history_seq: r.history_seq,
        }
    }
}

impl SqliteSessionStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `users` table if it doesn't exist.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                token       TEXT NOT NULL UNIQUE,
                webhook     TEXT NOT NULL DEFAULT '',
                jid         TEXT NOT NULL DEFAULT '',
                events      TEXT NOT NULL DEFAULT '',
                connected   INTEGER NOT NULL DEFAULT 0,
                qrcode      TEXT NOT NULL DEFAULT '',
                history_seq INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(pool)
        .await
        .map_err(Error::store)?;

        // Databases created before history dumps were sequenced.
        sqlx::query("ALTER TABLE users ADD COLUMN history_seq INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .ok(); // ignore if column already exists

        Ok(())
    }

    async fn update(&self, sql: &str, value: &str, tenant: TenantId) -> Result<()> {
        sqlx::query(sql)
            .bind(value)
            .bind(tenant.0)
            .execute(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(())
    }
}

#[async_trait]
impl SessionRecordStore for SqliteSessionStore {
    async fn get(&self, tenant: TenantId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(tenant.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(row.map(Into::into))
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_connected(&self) -> Result<Vec<SessionRecord>> {
        let rows =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE connected = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::store)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create(&self, user: NewUser) -> Result<SessionRecord> {
        if user.name.trim().is_empty() || user.token.trim().is_empty() {
            return Err(Error::validation("name and token are required"));
        }
        let events = Subscriptions::from_csv(&user.events).to_csv();
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO users (name, token, webhook, events)
               VALUES (?, ?, ?, ?)
               RETURNING id"#,
        )
        .bind(&user.name)
        .bind(&user.token)
        .bind(&user.webhook)
        .bind(&events)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::store)?;

        self.get(TenantId(id))
            .await?
            .ok_or_else(|| Error::store(sqlx::Error::RowNotFound))
    }

    async fn delete(&self, tenant: TenantId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(tenant.0)
            .execute(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_connected(&self, tenant: TenantId, connected: bool) -> Result<()> {
        sqlx::query("UPDATE users SET connected = ? WHERE id = ?")
            .bind(i32::from(connected))
            .bind(tenant.0)
            .execute(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(())
    }

    async fn set_qrcode(&self, tenant: TenantId, qrcode: &str) -> Result<()> {
        self.update("UPDATE users SET qrcode = ? WHERE id = ?", qrcode, tenant)
            .await
    }

    async fn set_device_identity(&self, tenant: TenantId, jid: &str) -> Result<()> {
        self.update("UPDATE users SET jid = ? WHERE id = ?", jid, tenant)
            .await
    }

    async fn set_webhook(&self, tenant: TenantId, webhook: &str) -> Result<()> {
        self.update("UPDATE users SET webhook = ? WHERE id = ?", webhook, tenant)
            .await
    }

    async fn set_events(&self, tenant: TenantId, events: &Subscriptions) -> Result<()> {
        self.update(
            "UPDATE users SET events = ? WHERE id = ?",
            &events.to_csv(),
            tenant,
        )
        .await
    }

    async fn clear_session(&self, tenant: TenantId) -> Result<()> {
        sqlx::query("UPDATE users SET qrcode = '', connected = 0 WHERE id = ?")
            .bind(tenant.0)
            .execute(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(())
    }

    async fn mark_paired(&self, tenant: TenantId, jid: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"UPDATE users SET
                 qrcode = '',
                 connected = 1,
                 jid = COALESCE(?, jid)
               WHERE id = ?"#,
        )
        .bind(jid)
        .bind(tenant.0)
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;
        Ok(())
    }

    async fn next_history_seq(&self, tenant: TenantId) -> Result<i64> {
        let seq: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET history_seq = history_seq + 1 WHERE id = ? RETURNING history_seq",
        )
        .bind(tenant.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::store)?;
        seq.ok_or(Error::SessionState(SessionStateError::NoSession))
    }
}
