//! Shared types for the gateway: tenant identifiers, event kinds and
//! subscriptions, media descriptors, and the error taxonomy every crate
//! reports through.

pub mod error;
pub mod media;
pub mod types;

pub use {
    error::{Error, Result, SessionStateError},
    media::{MediaDescriptor, MediaKind},
    types::{EventKind, Subscriptions, TenantId},
};
