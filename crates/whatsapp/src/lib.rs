//! Session supervision for the messaging network.
//!
//! Each tenant gets at most one [`ActiveSession`], owned by a supervision
//! task that creates its [`MessagingClient`], pairs it when no device
//! identity exists, routes its inbound events to side effects and webhooks,
//! and tears it down on request, logout or loss of the connection.
//!
//! The network client itself sits behind [`ClientFactory`]; the `web`
//! feature provides one over `whatsapp-rust`.

pub mod client;
pub mod context;
pub mod events;
pub mod pairing;
pub mod registry;
pub mod router;
pub mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(feature = "web")]
pub mod web;

pub use {
    client::{
        ClientFactory, EventSink, MessagingClient, OutgoingMedia, OutgoingMessage, QrEvent,
        SendReceipt, UploadedMedia, generate_message_id,
    },
    context::{Services, TenantContext},
    events::{InboundEvent, ReceiptKind},
    pairing::{PairingOutcome, PairingState},
    registry::{ActiveSession, SessionRegistry},
    router::EventRouter,
    supervisor::{SessionSupervisor, StartRequest, SupervisorConfig},
};

#[cfg(feature = "web")]
pub use web::{SledStore, WebClient, WebFactory};
