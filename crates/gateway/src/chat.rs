//! `/chat/*`: send text and media, download received media.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::State,
        http::header::{CONTENT_LENGTH, CONTENT_TYPE},
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::{info, warn},
    wagate_common::{Error, MediaKind, Result},
    wagate_media::{
        DownloadRequest, Retrieved, image_ops,
        payload::{self, MediaPayload},
        transcode::VOICE_NOTE_MIME,
    },
    wagate_whatsapp::{OutgoingMedia, OutgoingMessage, SendReceipt, generate_message_id},
};

use crate::{
    auth::Tenant,
    error::{ApiError, ApiResult, Payload, ok},
    state::GatewayState,
};

/// Server part of a plain phone-number address.
const USER_SERVER: &str = "s.whatsapp.net";

/// Audio sources that go through the transcoder before sending.
const TRANSCODED_AUDIO: [&str; 3] = [".webm", ".mp3", ".ogg"];

/// Normalize a phone number or full address into a recipient address.
/// A leading `+` is dropped; bare numbers get the default user server.
pub fn recipient(phone: &str) -> Result<String> {
    let phone = phone.trim();
    let phone = phone.strip_prefix('+').unwrap_or(phone);
    match phone.split_once('@') {
        None if !phone.is_empty() => Ok(format!("{phone}@{USER_SERVER}")),
        Some((user, server)) if !user.is_empty() && !server.is_empty() => Ok(phone.to_string()),
        _ => Err(Error::validation("Could not parse Phone")),
    }
}

fn message_id(requested: Option<String>) -> String {
    requested
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_message_id)
}

fn sent(receipt: SendReceipt) -> Response {
    ok(json!({
        "Details": "Sent",
        "Timestamp": receipt.timestamp,
        "Id": receipt.id,
    }))
}

// ── Text ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SendTextRequest {
    #[serde(rename = "Phone", alias = "phone", default)]
    pub phone: String,
    #[serde(rename = "Body", alias = "body", default)]
    pub body: String,
    #[serde(rename = "Id", alias = "id", default)]
    pub id: Option<String>,
}

pub async fn send_text(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<SendTextRequest>,
) -> ApiResult<Response> {
    let client = state.client(user.id)?;
    if req.phone.is_empty() {
        return Err(ApiError::bad_request("Missing Phone in Payload"));
    }
    if req.body.is_empty() {
        return Err(ApiError::bad_request("Missing Body in Payload"));
    }
    let to = recipient(&req.phone)?;
    let id = message_id(req.id);

    let receipt = client
        .send(&to, &id, OutgoingMessage::Text { body: req.body })
        .await
        .map_err(|e| ApiError::internal(format!("Error sending message: {e}")))?;
    info!(tenant = %user.id, id = %receipt.id, timestamp = receipt.timestamp, "message sent");
    Ok(sent(receipt))
}

// ── Media ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SendMediaRequest {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(rename = "Phone", alias = "phone", default)]
    pub phone: String,
    /// `data:<mime>;base64,<payload>`.
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(rename = "mediaUrl", default)]
    pub media_url: Option<String>,
    #[serde(rename = "fileName", default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(rename = "Id", alias = "id", default)]
    pub id: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn send_media(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<SendMediaRequest>,
) -> ApiResult<Response> {
    let client = state.client(user.id)?;
    if req.phone.is_empty() {
        return Err(ApiError::bad_request("Missing Phone in Payload"));
    }
    if req.media_type.is_empty() {
        return Err(ApiError::bad_request("Missing mediaType in Payload"));
    }
    let kind = MediaKind::from_media_type(&req.media_type)?;
    let to = recipient(&req.phone)?;
    let id = message_id(req.id);

    let media_url = non_empty(req.media_url);
    let mut file_name = non_empty(req.file_name);
    let MediaPayload { data, mimetype } = match (non_empty(req.base64), &media_url) {
        (Some(encoded), _) => payload::decode_data_url(&encoded)?,
        (None, Some(url)) => {
            if file_name.is_none() {
                file_name = payload::file_name_from_url(url);
            }
            payload::fetch_remote(&state.http, url).await?
        },
        (None, None) => {
            return Err(ApiError::bad_request(
                "Missing base64 or mediaUrl in Payload",
            ));
        },
    };

    let mut media = OutgoingMedia {
        kind,
        upload: Default::default(),
        mimetype,
        caption: non_empty(req.caption),
        file_name: None,
        jpeg_thumbnail: None,
        seconds: None,
        ptt: false,
    };

    let data = match kind {
        MediaKind::Audio => {
            let source = media_url.as_deref().or(file_name.as_deref()).unwrap_or("");
            let lower = source.to_ascii_lowercase();
            let (data, seconds) = if TRANSCODED_AUDIO.iter().any(|ext| lower.ends_with(ext)) {
                let note = state.transcoder.prepare_voice_note(&data, source).await?;
                (note.data, note.seconds)
            } else {
                (data, 0)
            };
            media.mimetype = VOICE_NOTE_MIME.to_string();
            media.seconds = Some(seconds);
            media.ptt = true;
            media.caption = None;
            data
        },
        MediaKind::Image => {
            match image_ops::thumbnail_jpeg(&data) {
                Ok(thumb) => media.jpeg_thumbnail = Some(thumb),
                Err(e) => warn!(tenant = %user.id, error = %e, "could not build thumbnail"),
            }
            data
        },
        MediaKind::Document => {
            let Some(name) = file_name else {
                return Err(ApiError::bad_request(
                    "Missing fileName in Payload for document",
                ));
            };
            media.file_name = Some(name);
            data
        },
        MediaKind::Sticker => {
            media.caption = None;
            data
        },
        MediaKind::Video => data,
    };

    media.upload = client.upload(data, kind).await.map_err(|e| {
        ApiError::internal(format!("Failed to upload {kind}: {e}"))
    })?;

    let receipt = client
        .send(&to, &id, OutgoingMessage::Media(media))
        .await
        .map_err(|e| ApiError::internal(format!("Error sending {kind}: {e}")))?;
    info!(tenant = %user.id, id = %receipt.id, %kind, "media sent");
    Ok(sent(receipt))
}

// ── Download ─────────────────────────────────────────────────────────────────

/// Raw bytes with matching headers, or the offloaded object's reference.
pub async fn download_media(
    State(state): State<Arc<GatewayState>>,
    Tenant(user): Tenant,
    Payload(req): Payload<DownloadRequest>,
) -> ApiResult<Response> {
    let client = state.client(user.id)?;
    match state.media.retrieve(client.as_ref(), &req).await? {
        Retrieved::Offloaded(media) => Ok(Json(media).into_response()),
        Retrieved::Inline { data, mimetype } => Ok((
            [
                (CONTENT_TYPE, mimetype),
                (CONTENT_LENGTH, data.len().to_string()),
            ],
            data,
        )
            .into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_normalization() {
        assert_eq!(recipient("+5511999").unwrap(), "5511999@s.whatsapp.net");
        assert_eq!(recipient("5511999").unwrap(), "5511999@s.whatsapp.net");
        assert_eq!(recipient("123-456@g.us").unwrap(), "123-456@g.us");
        assert!(recipient("").is_err());
        assert!(recipient("+").is_err());
        assert!(recipient("@s.whatsapp.net").is_err());
        assert!(recipient("5511@").is_err());
    }

    #[test]
    fn explicit_message_id_wins() {
        assert_eq!(message_id(Some("ABC".into())), "ABC");
        assert!(message_id(Some(String::new())).starts_with("3EB0"));
        assert!(message_id(None).starts_with("3EB0"));
    }
}
