use std::{collections::BTreeSet, fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

// ── Tenant id ───────────────────────────────────────────────────────────────

/// Key identifying one tenant's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ── Event kinds ─────────────────────────────────────────────────────────────

/// Classification of every inbound event. The string form is what goes into
/// the webhook `type` field and into the persisted `events` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Message,
    ReadReceipt,
    Presence,
    HistorySync,
    ChatPresence,
    Connected,
    PairSuccess,
    LoggedOut,
    QrCode,
    QrTimeout,
    Unhandled,
}

impl EventKind {
    /// Every kind a tenant can subscribe to.
    pub const SUBSCRIBABLE: [EventKind; 10] = [
        EventKind::Message,
        EventKind::ReadReceipt,
        EventKind::Presence,
        EventKind::HistorySync,
        EventKind::ChatPresence,
        EventKind::Connected,
        EventKind::PairSuccess,
        EventKind::LoggedOut,
        EventKind::QrCode,
        EventKind::QrTimeout,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::ReadReceipt => "ReadReceipt",
            Self::Presence => "Presence",
            Self::HistorySync => "HistorySync",
            Self::ChatPresence => "ChatPresence",
            Self::Connected => "Connection.Connected",
            Self::PairSuccess => "Connection.PairSuccess",
            Self::LoggedOut => "Connection.LoggedOut",
            Self::QrCode => "Connection.QRCode",
            Self::QrTimeout => "Connection.QRTimeout",
            Self::Unhandled => "Unhandled",
        }
    }

    pub fn is_connection(&self) -> bool {
        self.as_str().starts_with("Connection.")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SUBSCRIBABLE
            .iter()
            .chain(std::iter::once(&EventKind::Unhandled))
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Subscriptions ───────────────────────────────────────────────────────────

const ALL: &str = "All";
const CONNECTION_FAMILY: &str = "Connection";

/// The set of event kinds a tenant wants delivered to its webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    all: bool,
    kinds: BTreeSet<EventKind>,
}

impl Subscriptions {
    pub fn all() -> Self {
        Self {
            all: true,
            kinds: BTreeSet::new(),
        }
    }

    /// Parse subscription tokens. An empty list subscribes to everything;
    /// `Connection` expands to every `Connection.*` kind; unknown tokens are
    /// discarded.
    pub fn parse<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut subs = Self::default();
        let mut seen_any = false;
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            seen_any = true;
            match token {
                ALL => subs.all = true,
                CONNECTION_FAMILY => subs.kinds.extend(
                    EventKind::SUBSCRIBABLE
                        .iter()
                        .filter(|k| k.is_connection())
                        .copied(),
                ),
                other => match other.parse::<EventKind>() {
                    Ok(EventKind::Unhandled) | Err(_) => {
                        warn!(kind = other, "event kind discarded");
                    },
                    Ok(kind) => {
                        subs.kinds.insert(kind);
                    },
                },
            }
        }
        if !seen_any {
            subs.all = true;
        }
        subs
    }

    /// Parse the comma-joined form stored in the `events` column.
    pub fn from_csv(csv: &str) -> Self {
        Self::parse(csv.split(','))
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.all || self.kinds.contains(&kind)
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.kinds.is_empty()
    }

    pub fn tokens(&self) -> Vec<String> {
        if self.all {
            return vec![ALL.to_string()];
        }
        self.kinds.iter().map(|k| k.as_str().to_string()).collect()
    }

    pub fn to_csv(&self) -> String {
        self.tokens().join(",")
    }
}

impl Serialize for Subscriptions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.tokens().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Subscriptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::parse(tokens))
    }
}
