use std::{path::PathBuf, sync::Arc};

use {
    reqwest::{
        Client,
        multipart::{Form, Part},
        redirect::Policy,
    },
    tokio::{
        sync::{Semaphore, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    wagate_common::{Error, Result, TenantId},
    wagate_config::WebhookConfig,
};

use crate::{audit::AuditLog, envelope::WebhookEnvelope};

/// One webhook POST waiting to be delivered.
#[derive(Debug, Clone)]
pub struct WebhookJob {
    pub tenant: TenantId,
    pub url: String,
    pub token: String,
    pub envelope: WebhookEnvelope,
    /// Sent as multipart field `file` when set.
    pub file: Option<PathBuf>,
}

/// Anything that accepts webhook jobs without blocking the caller.
pub trait WebhookSink: Send + Sync {
    /// Queue a job. Returns `false` if it was dropped.
    fn enqueue(&self, job: WebhookJob) -> bool;
}

/// Bounded queue drained by a delivery loop that keeps at most
/// `max_concurrency` POSTs in flight.
#[derive(Clone)]
pub struct WebhookDispatcher {
    tx: mpsc::Sender<WebhookJob>,
}

impl WebhookDispatcher {
    /// Build the HTTP client and start the delivery loop. The loop exits
    /// once every clone of the dispatcher is dropped and in-flight
    /// deliveries have finished.
    pub fn spawn(config: &WebhookConfig) -> Result<(Self, JoinHandle<()>)> {
        let client = Client::builder()
            .timeout(config.timeout())
            .redirect(Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Delivery(format!("failed to build http client: {e}")))?;

        let deliverer = Arc::new(Deliverer {
            client,
            audit: config.audit_log.clone().map(AuditLog::new),
        });
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = tokio::spawn(run(rx, deliverer, config.max_concurrency.max(1)));
        Ok((Self { tx }, handle))
    }
}

impl WebhookSink for WebhookDispatcher {
    fn enqueue(&self, job: WebhookJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    tenant = %job.tenant,
                    kind = %job.envelope.kind,
                    "webhook queue full, dropping event"
                );
                false
            },
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(tenant = %job.tenant, "webhook dispatcher stopped, dropping event");
                false
            },
        }
    }
}

async fn run(mut rx: mpsc::Receiver<WebhookJob>, deliverer: Arc<Deliverer>, max_concurrency: usize) {
    let permits = Arc::new(Semaphore::new(max_concurrency));
    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let deliverer = Arc::clone(&deliverer);
        tokio::spawn(async move {
            deliverer.deliver(job).await;
            drop(permit);
        });
    }

    // Wait for in-flight deliveries before reporting the loop as finished.
    let _ = permits.acquire_many(max_concurrency as u32).await;
    info!("webhook dispatcher stopped");
}

struct Deliverer {
    client: Client,
    audit: Option<AuditLog>,
}

impl Deliverer {
    async fn deliver(&self, job: WebhookJob) {
        let json_data = job.envelope.to_json().to_string();
        let outcome = self.post(&job, &json_data).await;

        match &outcome {
            Ok((status, _)) if status.is_success() => {
                debug!(tenant = %job.tenant, kind = %job.envelope.kind, %status, "webhook delivered");
            },
            Ok((status, _)) => {
                warn!(
                    tenant = %job.tenant,
                    url = %job.url,
                    %status,
                    "webhook endpoint returned an error status"
                );
            },
            Err(e) => {
                warn!(tenant = %job.tenant, url = %job.url, error = %e, "webhook delivery failed");
            },
        }

        if let Some(audit) = &self.audit {
            let result = match &outcome {
                Ok((status, body)) => format!("status={} response={body}", status.as_u16()),
                Err(e) => format!("error={e}"),
            };
            let line = format!(
                "tenant={} url={} payload={json_data} {result}",
                job.tenant, job.url
            );
            if let Err(e) = audit.append(&line).await {
                warn!(path = %audit.path().display(), error = %e, "failed to write webhook audit log");
            }
        }
    }

    async fn post(&self, job: &WebhookJob, json_data: &str) -> Result<(reqwest::StatusCode, String)> {
        let request = self.client.post(&job.url);
        let request = match &job.file {
            Some(path) => {
                let bytes = tokio::fs::read(path).await?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".into());
                let form = Form::new()
                    .text("jsonData", json_data.to_string())
                    .text("token", job.token.clone())
                    .part("file", Part::bytes(bytes).file_name(file_name));
                request.multipart(form)
            },
            None => request.form(&[("jsonData", json_data), ("token", job.token.as_str())]),
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}
