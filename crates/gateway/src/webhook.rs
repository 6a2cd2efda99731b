//! `/webhook`: the tenant's delivery URL and event subscriptions.
//!
//! Writes go to the store, the token cache, and (when a session is live) the
//! router's subscription set, so the next event already sees them.

use std::sync::Arc;

use {
    axum::{extract::State, response::Response},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
    wagate_common::Subscriptions,
    wagate_sessions::UserInfo,
};

use crate::{
    auth::Tenant,
    error::{ApiError, ApiResult, Payload, ok},
    state::GatewayState,
};

#[derive(Debug, Default, Deserialize)]
pub struct SetWebhookRequest {
    #[serde(default)]
    pub webhook: String,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWebhookRequest {
    #[serde(default)]
    pub webhook: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

async fn apply(
    state: &GatewayState,
    user: &UserInfo,
    webhook: &str,
    subscriptions: &Subscriptions,
) -> ApiResult<()> {
    state.store().set_webhook(user.id, webhook).await?;
    state.store().set_events(user.id, subscriptions).await?;

    let events = subscriptions.to_csv();
    state.cache().update(&user.token, |info| {
        info.webhook = webhook.to_string();
        info.events = events.clone();
    });
    if let Some(session) = state.supervisor.session(user.id) {
        session.set_subscriptions(subscriptions.clone());
    }
    info!(tenant = %user.id, webhook, %events, "webhook updated");
    Ok(())
}

pub async fn get_webhook(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
) -> ApiResult<Response> {
    let record = state
        .store()
        .get(user.id)
        .await?
        .ok_or_else(ApiError::unauthorized)?;
    Ok(ok(json!({
        "webhook": record.webhook,
        "subscribe": record.events.tokens(),
    })))
}

pub async fn set_webhook(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<SetWebhookRequest>,
) -> ApiResult<Response> {
    let subscriptions = Subscriptions::parse(&req.events);
    apply(&state, &user, &req.webhook, &subscriptions).await?;
    Ok(ok(json!({
        "webhook": req.webhook,
        "events": subscriptions.tokens(),
    })))
}

/// Like `POST`, but `active: false` clears the URL so nothing is delivered.
pub async fn update_webhook(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<UpdateWebhookRequest>,
) -> ApiResult<Response> {
    let (webhook, subscriptions) = if req.active {
        (req.webhook, Subscriptions::parse(&req.events))
    } else {
        (String::new(), Subscriptions::all())
    };
    apply(&state, &user, &webhook, &subscriptions).await?;
    Ok(ok(json!({
        "webhook": webhook,
        "events": subscriptions.tokens(),
        "active": req.active,
    })))
}

pub async fn delete_webhook(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
) -> ApiResult<Response> {
    apply(&state, &user, "", &Subscriptions::all()).await?;
    Ok(ok(json!({ "Details": "Webhook and events deleted successfully" })))
}
