//! `/session/*`: start, stop, pair and inspect the tenant's session.

use std::sync::Arc;

use {
    axum::{extract::State, response::Response},
    serde::Deserialize,
    serde_json::json,
    tracing::{info, warn},
    wagate_common::{Error, SessionStateError, Subscriptions},
    wagate_whatsapp::StartRequest,
};

use crate::{
    auth::Tenant,
    error::{ApiError, ApiResult, Payload, ok},
    state::GatewayState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "Subscribe", default)]
    pub subscribe: Vec<String>,
    /// Reply right away instead of waiting for the connection.
    #[serde(rename = "Immediate", default)]
    pub immediate: bool,
}

pub async fn connect(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<ConnectRequest>,
) -> ApiResult<Response> {
    let subscriptions = Subscriptions::parse(&req.subscribe);
    let events = subscriptions.to_csv();

    // The registry slot decides concurrent connects; only the winner persists.
    let session = state
        .supervisor
        .start_session(StartRequest {
            tenant: user.id,
            token: user.token.clone(),
            device_identity: (!user.jid.is_empty()).then(|| user.jid.clone()),
            subscriptions: subscriptions.clone(),
            immediate: req.immediate,
        })
        .await?;

    info!(tenant = %user.id, %events, "setting subscribed events");
    state.store().set_events(user.id, &subscriptions).await?;
    state
        .cache()
        .update(&user.token, |info| info.events = events.clone());

    if !req.immediate && !session.client().is_some_and(|c| c.is_connected()) {
        warn!(tenant = %user.id, "session did not connect in time");
        return Err(ApiError::internal("Failed to connect"));
    }

    Ok(ok(json!({
        "webhook": user.webhook,
        "jid": user.jid,
        "events": events,
        "details": "Connected!",
    })))
}

pub async fn disconnect(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
) -> ApiResult<Response> {
    state.supervisor.stop_session(user.id)?;
    Ok(ok(json!({ "Details": "Disconnected" })))
}

pub async fn logout(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
) -> ApiResult<Response> {
    state.supervisor.logout(user.id).await?;
    Ok(ok(json!({ "Details": "Logged out" })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PairPhoneRequest {
    #[serde(rename = "Phone", default)]
    pub phone: String,
}

pub async fn pair_phone(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<PairPhoneRequest>,
) -> ApiResult<Response> {
    let client = state.client(user.id)?;
    if req.phone.is_empty() {
        return Err(ApiError::bad_request("Missing Phone in Payload"));
    }
    if client.is_logged_in() {
        return Err(ApiError::bad_request("Already paired"));
    }
    let code = client
        .pair_phone(&req.phone)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    info!(tenant = %user.id, "linking code issued");
    Ok(ok(json!({ "LinkingCode": code })))
}

pub async fn status(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
) -> ApiResult<Response> {
    let client = state.client(user.id)?;
    Ok(ok(json!({
        "Connected": client.is_connected(),
        "LoggedIn": client.is_logged_in(),
    })))
}

/// The pending pairing image as a `data:image/png;base64,` URL.
pub async fn qr(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
) -> ApiResult<Response> {
    let client = state.client(user.id)?;
    if !client.is_connected() {
        return Err(Error::from(SessionStateError::NotConnected).into());
    }
    if client.is_logged_in() {
        return Err(Error::from(SessionStateError::AlreadyPaired).into());
    }
    let code = state
        .store()
        .get(user.id)
        .await?
        .map(|r| r.qrcode)
        .unwrap_or_default();
    Ok(ok(json!({ "QRCode": code })))
}
