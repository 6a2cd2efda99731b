//! Outbound webhook delivery.
//!
//! Events are wrapped in a [`WebhookEnvelope`], queued on the
//! [`WebhookDispatcher`], and POSTed to the tenant's URL as a form with the
//! fields `jsonData` and `token` (multipart when a file is attached).
//! Delivery is at-most-once: failures are logged and never retried.

pub mod audit;
pub mod dispatcher;
pub mod envelope;

pub use {
    audit::AuditLog,
    dispatcher::{WebhookDispatcher, WebhookJob, WebhookSink},
    envelope::WebhookEnvelope,
};
