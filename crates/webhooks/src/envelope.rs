use {
    serde_json::{Map, Value},
    wagate_common::EventKind,
};

/// The JSON object carried in the `jsonData` form field:
/// `{"type": <kind>, "event": <payload>, ...extra}`.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub kind: EventKind,
    pub event: Value,
    pub extra: Map<String, Value>,
}

impl WebhookEnvelope {
    pub fn new(kind: EventKind, event: Value) -> Self {
        Self {
            kind,
            event,
            extra: Map::new(),
        }
    }

    /// Add a top-level field next to `type` and `event` (e.g. `state`).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("type".into(), Value::String(self.kind.as_str().into()));
        obj.insert("event".into(), self.event.clone());
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn envelope_shape() {
        let env = WebhookEnvelope::new(EventKind::ReadReceipt, json!({"id": "X"}))
            .with("state", "Delivered");
        assert_eq!(
            env.to_json(),
            json!({"type": "ReadReceipt", "event": {"id": "X"}, "state": "Delivered"})
        );
    }

    #[test]
    fn extra_cannot_clobber_type() {
        let env = WebhookEnvelope::new(EventKind::Message, json!({})).with("type", "Other");
        assert_eq!(env.to_json()["type"], "Message");
    }
}
