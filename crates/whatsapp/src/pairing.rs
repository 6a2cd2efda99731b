//! QR pairing for clients without a device identity.
//!
//! ```text
//! AwaitingCode ──Code──▶ CodeIssued ──Code──▶ CodeIssued
//!      │                     │
//!      │                     ├──Success──▶ PairSucceeded
//!      └─────────────────────┴──Timeout──▶ PairTimedOut
//! ```
//!
//! A pairing channel that closes without a terminal event counts as a
//! timeout.

use {
    serde_json::json,
    thiserror::Error as ThisError,
    tokio::sync::mpsc,
    tracing::{info, warn},
    wagate_common::{EventKind, Result},
    wagate_media::image_ops,
    wagate_webhooks::WebhookEnvelope,
};

use crate::{client::QrEvent, context::TenantContext, registry::ActiveSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    AwaitingCode,
    CodeIssued,
    PairSucceeded,
    PairTimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[error("illegal pairing transition from {from:?} on {event}")]
pub struct IllegalTransition {
    pub from: PairingState,
    pub event: &'static str,
}

impl PairingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PairSucceeded | Self::PairTimedOut)
    }

    /// Next state after `event`. Non-terminal informational events leave the
    /// state unchanged; nothing leaves a terminal state.
    pub fn on(self, event: &QrEvent) -> Result<Self, IllegalTransition> {
        let name = match event {
            QrEvent::Code(_) => "code",
            QrEvent::Success { .. } => "success",
            QrEvent::Timeout => "timeout",
            QrEvent::Other(_) => "other",
        };
        if self.is_terminal() {
            return Err(IllegalTransition {
                from: self,
                event: name,
            });
        }
        Ok(match event {
            QrEvent::Code(_) => Self::CodeIssued,
            QrEvent::Success { .. } => Self::PairSucceeded,
            QrEvent::Timeout => Self::PairTimedOut,
            QrEvent::Other(_) => self,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired { device_identity: Option<String> },
    TimedOut,
    /// The session was terminated while waiting for a scan.
    Cancelled,
}

/// Drives one pairing channel to a terminal state, persisting each step.
pub struct Pairing<'a> {
    ctx: &'a TenantContext,
    session: &'a ActiveSession,
    print_qr: bool,
    state: PairingState,
}

impl<'a> Pairing<'a> {
    pub fn new(ctx: &'a TenantContext, session: &'a ActiveSession, print_qr: bool) -> Self {
        Self {
            ctx,
            session,
            print_qr,
            state: PairingState::AwaitingCode,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<QrEvent>) -> Result<PairingOutcome> {
        let session = self.session;
        loop {
            let event = tokio::select! {
                _ = session.terminated() => return Ok(PairingOutcome::Cancelled),
                event = rx.recv() => event.unwrap_or(QrEvent::Timeout),
            };
            self.state = match self.state.on(&event) {
                Ok(next) => next,
                Err(e) => {
                    warn!(tenant = %self.ctx.tenant, error = %e, "pairing event ignored");
                    continue;
                },
            };
            match event {
                QrEvent::Code(code) => self.code_issued(&code).await?,
                QrEvent::Success { device_identity } => {
                    self.succeeded(device_identity.as_deref()).await?;
                    return Ok(PairingOutcome::Paired { device_identity });
                },
                QrEvent::Timeout => {
                    self.timed_out().await?;
                    return Ok(PairingOutcome::TimedOut);
                },
                QrEvent::Other(other) => {
                    info!(tenant = %self.ctx.tenant, event = %other, "pairing event");
                },
            }
        }
    }

    async fn code_issued(&self, code: &str) -> Result<()> {
        let image = image_ops::qr_data_url(code)?;
        self.ctx.store().set_qrcode(self.ctx.tenant, &image).await?;
        if self.print_qr {
            match image_ops::qr_terminal(code) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => warn!(error = %e, "could not render pairing code"),
            }
        }
        info!(tenant = %self.ctx.tenant, "pairing code issued");
        self.ctx
            .notify(
                WebhookEnvelope::new(EventKind::QrCode, json!({ "code": code })),
                None,
            )
            .await;
        Ok(())
    }

    async fn succeeded(&self, device_identity: Option<&str>) -> Result<()> {
        self.ctx
            .store()
            .mark_paired(self.ctx.tenant, device_identity)
            .await?;
        if let Some(jid) = device_identity {
            self.ctx.services.cache.update(&self.ctx.token, |info| {
                info.jid = jid.to_string();
            });
        }
        self.session.set_connected(true);
        info!(tenant = %self.ctx.tenant, jid = device_identity.unwrap_or(""), "pairing succeeded");
        Ok(())
    }

    async fn timed_out(&self) -> Result<()> {
        self.ctx.store().set_qrcode(self.ctx.tenant, "").await?;
        warn!(tenant = %self.ctx.tenant, "pairing timed out");
        self.ctx
            .notify(
                WebhookEnvelope::new(EventKind::QrTimeout, json!({})),
                None,
            )
            .await;
        Ok(())
    }
}
