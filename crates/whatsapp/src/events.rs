use {
    serde_json::{Value, json},
    wagate_common::EventKind,
};

/// Receipt flavors the network reports. Only read, read-self and delivered
/// are forwarded to webhooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptKind {
    Read,
    ReadSelf,
    Delivered,
    Other(String),
}

impl ReceiptKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "read" | "Read" => Self::Read,
            "read-self" | "ReadSelf" => Self::ReadSelf,
            "" | "delivered" | "Delivered" => Self::Delivered,
            other => Self::Other(other.to_string()),
        }
    }

    /// Value of the webhook `state` field, if this receipt is forwarded.
    pub fn state(&self) -> Option<&'static str> {
        match self {
            Self::Read | Self::ReadSelf => Some("Read"),
            Self::Delivered => Some("Delivered"),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Offer,
    Accept,
    Terminate,
    OfferNotice,
    RelayLatency,
}

/// Events a client pushes into a tenant's router.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    PushNameSetting,
    AppStateSyncComplete { name: String },
    PairSuccess {
        id: String,
        business_name: String,
        platform: String,
    },
    StreamReplaced,
    Message(Value),
    Receipt { kind: ReceiptKind, payload: Value },
    Presence { unavailable: bool, payload: Value },
    HistorySync(Value),
    AppState(Value),
    LoggedOut { reason: String },
    /// The client's transport is gone for good; the session cannot recover.
    Disconnected { reason: String },
    ChatPresence(Value),
    Call { kind: CallKind, payload: Value },
    Qr(Value),
    Unhandled { kind: String, payload: Value },
}

/// App-state collection whose completed sync means contacts are usable.
pub const CRITICAL_BLOCK: &str = "critical_block";

impl InboundEvent {
    /// Webhook classification. Events that are only logged classify as
    /// [`EventKind::Unhandled`].
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::PairSuccess { .. } => EventKind::PairSuccess,
            Self::Message(_) => EventKind::Message,
            Self::Receipt { .. } => EventKind::ReadReceipt,
            Self::Presence { .. } => EventKind::Presence,
            Self::HistorySync(_) => EventKind::HistorySync,
            Self::LoggedOut { .. } => EventKind::LoggedOut,
            Self::ChatPresence(_) => EventKind::ChatPresence,
            Self::PushNameSetting
            | Self::AppStateSyncComplete { .. }
            | Self::StreamReplaced
            | Self::Disconnected { .. }
            | Self::AppState(_)
            | Self::Call { .. }
            | Self::Qr(_)
            | Self::Unhandled { .. } => EventKind::Unhandled,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected => "Connected",
            Self::PushNameSetting => "PushNameSetting",
            Self::AppStateSyncComplete { .. } => "AppStateSyncComplete",
            Self::PairSuccess { .. } => "PairSuccess",
            Self::StreamReplaced => "StreamReplaced",
            Self::Message(_) => "Message",
            Self::Receipt { .. } => "Receipt",
            Self::Presence { .. } => "Presence",
            Self::HistorySync(_) => "HistorySync",
            Self::AppState(_) => "AppState",
            Self::LoggedOut { .. } => "LoggedOut",
            Self::Disconnected { .. } => "Disconnected",
            Self::ChatPresence(_) => "ChatPresence",
            Self::Call { .. } => "Call",
            Self::Qr(_) => "QR",
            Self::Unhandled { kind, .. } => kind,
        }
    }

    /// The `event` field of the webhook body.
    pub fn payload(&self) -> Value {
        match self {
            Self::Connected | Self::PushNameSetting | Self::StreamReplaced => json!({}),
            Self::AppStateSyncComplete { name } => json!({ "Name": name }),
            Self::PairSuccess {
                id,
                business_name,
                platform,
            } => json!({ "ID": id, "BusinessName": business_name, "Platform": platform }),
            Self::LoggedOut { reason } | Self::Disconnected { reason } => {
                json!({ "reason": reason })
            },
            Self::Message(p)
            | Self::HistorySync(p)
            | Self::AppState(p)
            | Self::ChatPresence(p)
            | Self::Qr(p) => p.clone(),
            Self::Receipt { payload, .. }
            | Self::Presence { payload, .. }
            | Self::Call { payload, .. }
            | Self::Unhandled { payload, .. } => payload.clone(),
        }
    }

    /// Message id, when the payload carries one.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Message(p) => p
                .pointer("/Info/ID")
                .or_else(|| p.get("id"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}
