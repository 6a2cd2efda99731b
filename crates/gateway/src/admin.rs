//! `/admin/users`: tenant provisioning, guarded by the admin token.

use std::sync::Arc;

use {
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::Response,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::info,
    wagate_common::{EventKind, TenantId},
    wagate_sessions::{NewUser, SessionRecord},
};

use crate::{
    auth::Admin,
    error::{ApiError, ApiResult, Payload, ok},
    state::GatewayState,
};

#[derive(Debug, Default, Deserialize)]
pub struct AddUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub webhook: String,
    /// Comma-separated subscription tokens.
    #[serde(default)]
    pub events: String,
}

fn user_json(record: &SessionRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "token": record.token,
        "webhook": record.webhook,
        "jid": record.jid,
        "qrcode": record.qrcode,
        "connected": record.connected,
        "events": record.events.to_csv(),
    })
}

/// Reject unknown subscription tokens instead of silently dropping them.
fn validate_events(csv: &str) -> ApiResult<()> {
    for token in csv.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let known = matches!(token, "All" | "Connection")
            || token
                .parse::<EventKind>()
                .is_ok_and(|k| k != EventKind::Unhandled);
        if !known {
            return Err(ApiError::bad_request(format!("Invalid event: {token}")));
        }
    }
    Ok(())
}

pub async fn list_users(
    State(state): State<Arc<GatewayState>>,
    _: Admin,
) -> ApiResult<Response> {
    let users = state.store().list().await?;
    Ok(ok(Value::Array(users.iter().map(user_json).collect())))
}

pub async fn add_user(
    State(state): State<Arc<GatewayState>>,
    _: Admin,
    Payload(req): Payload<AddUserRequest>,
) -> ApiResult<Response> {
    if req.name.trim().is_empty() || req.token.trim().is_empty() {
        return Err(ApiError::bad_request(
            "Incomplete data in Payload. Required name, token",
        ));
    }
    validate_events(&req.events)?;
    if state.store().get_by_token(&req.token).await?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "User with the same token already exists",
        ));
    }

    let record = state
        .store()
        .create(NewUser {
            name: req.name,
            token: req.token,
            webhook: req.webhook,
            events: req.events,
        })
        .await?;
    info!(tenant = %record.id, name = %record.name, "user added");
    Ok(ok(json!({ "id": record.id })))
}

/// Stops the tenant's session, if any, before removing the row.
pub async fn delete_user(
    State(state): State<Arc<GatewayState>>,
    _: Admin,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let tenant = TenantId(id);
    if state.supervisor.session(tenant).is_some() {
        state.supervisor.stop_session(tenant)?;
    }
    if !state.store().delete(tenant).await? {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "User not found"));
    }
    state.cache().invalidate_tenant(tenant);
    info!(%tenant, "user deleted");
    Ok(ok(json!({ "Details": "User deleted successfully" })))
}
