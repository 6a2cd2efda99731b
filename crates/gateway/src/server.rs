use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, State},
        response::IntoResponse,
        routing::{delete, get, post},
    },
    sqlx::sqlite::SqlitePoolOptions,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
    wagate_config::{DatabaseConfig, WagateConfig, WhatsAppConfig},
    wagate_media::{MediaPipeline, Transcoder},
    wagate_sessions::{HistorySyncLog, SqliteSessionStore, UserInfoCache},
    wagate_webhooks::{AuditLog, WebhookDispatcher},
    wagate_whatsapp::{ClientFactory, Services, SessionSupervisor, SupervisorConfig},
};

use crate::{admin, chat, session, state::GatewayState, webhook};

/// Base64 media bodies are far above axum's 2 MiB default.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// How long shutdown waits for sessions to tear down and queued webhooks to
/// go out.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/session/connect", post(session::connect))
        .route("/session/disconnect", post(session::disconnect))
        .route("/session/logout", post(session::logout))
        .route("/session/pairphone", post(session::pair_phone))
        .route("/session/status", get(session::status))
        .route("/session/qr", get(session::qr))
        .route(
            "/webhook",
            get(webhook::get_webhook)
                .post(webhook::set_webhook)
                .put(webhook::update_webhook)
                .delete(webhook::delete_webhook),
        )
        .route("/chat/send/text", post(chat::send_text))
        .route("/chat/send/media", post(chat::send_media))
        .route("/chat/downloadmedia", post(chat::download_media))
        .route(
            "/admin/users",
            get(admin::list_users).post(admin::add_user),
        )
        .route("/admin/users/{id}", delete(admin::delete_user))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Open the SQLite pool and make sure the schema exists.
pub async fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<SqliteSessionStore>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect(&config.url)
        .await?;
    SqliteSessionStore::init(&pool).await?;
    Ok(Arc::new(SqliteSessionStore::new(pool)))
}

#[cfg(feature = "web")]
fn network_client(config: &WhatsAppConfig) -> anyhow::Result<Arc<dyn ClientFactory>> {
    std::fs::create_dir_all(&config.store_dir)?;
    Ok(Arc::new(wagate_whatsapp::WebFactory::from_config(config)))
}

#[cfg(not(feature = "web"))]
fn network_client(_config: &WhatsAppConfig) -> anyhow::Result<Arc<dyn ClientFactory>> {
    anyhow::bail!("built without a network client, rebuild with `--features web` to serve")
}

/// Start the gateway and serve until SIGINT/SIGTERM, then stop every session
/// and let queued webhooks drain.
pub async fn start_gateway(config: WagateConfig) -> anyhow::Result<()> {
    let factory = network_client(&config.whatsapp)?;
    let store = open_store(&config.database).await?;
    let (dispatcher, dispatcher_task) = WebhookDispatcher::spawn(&config.webhook)?;

    let services = Services {
        store,
        cache: Arc::new(UserInfoCache::new()),
        webhooks: Arc::new(dispatcher),
        history: HistorySyncLog::new(config.whatsapp.files_dir.clone()),
        event_log: config
            .logging
            .event_log
            .clone()
            .map(|path| Arc::new(AuditLog::new(path))),
    };
    let supervisor = SessionSupervisor::new(
        factory,
        services,
        SupervisorConfig::from_config(&config.whatsapp),
    );

    let media = MediaPipeline::from_config(&config.media)?;
    let offload = media.offload_enabled();
    let http = reqwest::Client::builder()
        .timeout(config.whatsapp.request_timeout())
        .build()?;
    let state = GatewayState::new(
        supervisor.clone(),
        media,
        Transcoder::from_config(&config.media),
        http,
        config.server.admin_token.clone(),
    );
    if state.admin_token().is_none() {
        warn!("no admin token configured, /admin routes are disabled");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let resumed = supervisor.resume_connected().await?;

    // Startup banner.
    let lines = [
        format!("wagate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("device stores: {}", config.whatsapp.store_dir.display()),
        format!("sessions resumed: {resumed}"),
        format!("media offload: {}", if offload { "on" } else { "off" }),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let app = build_gateway_app(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown(SHUTDOWN_GRACE).await;
    // The dispatcher loop ends once its last sender is gone.
    drop(state);
    drop(supervisor);
    if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher_task)
        .await
        .is_err()
    {
        warn!("webhook deliveries still pending at exit");
    }
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "sessions": state.supervisor.registry().len(),
    }))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::{Body, to_bytes},
            http::{Request, StatusCode, header::CONTENT_TYPE},
        },
        base64::{Engine as _, engine::general_purpose::STANDARD},
        secrecy::Secret,
        serde_json::{Value, json},
        tower::ServiceExt,
        wagate_common::{EventKind, MediaKind, TenantId},
        wagate_media::{image_ops, transcode::VOICE_NOTE_MIME},
        wagate_sessions::{NewUser, SessionRecordStore},
        wagate_whatsapp::{
            OutgoingMessage, QrEvent,
            testing::{MockClient, MockFactory, RecordingSink},
        },
    };

    const ADMIN: &str = "admin-secret";
    const JID: &str = "5511000000000@s.whatsapp.net";

    struct Harness {
        app: Router,
        state: Arc<GatewayState>,
        store: Arc<SqliteSessionStore>,
        factory: Arc<MockFactory>,
        _sink: Arc<RecordingSink>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteSessionStore::init(&pool).await.unwrap();
        let store = Arc::new(SqliteSessionStore::new(pool));
        let factory = Arc::new(MockFactory::new());
        let sink = Arc::new(RecordingSink::new());
        let dir = tempfile::tempdir().unwrap();

        let services = Services {
            store: store.clone(),
            cache: Arc::new(UserInfoCache::new()),
            webhooks: sink.clone(),
            history: HistorySyncLog::new(dir.path()),
            event_log: None,
        };
        let supervisor = SessionSupervisor::new(factory.clone(), services, SupervisorConfig {
            connect_wait: Duration::from_millis(500),
            print_qr: false,
        });
        let state = GatewayState::new(
            supervisor,
            MediaPipeline::new(Duration::from_millis(1)),
            Transcoder::new("ffmpeg", "ffprobe", Duration::from_secs(5)),
            reqwest::Client::new(),
            Some(Secret::new(ADMIN.to_string())),
        );
        Harness {
            app: build_gateway_app(Arc::clone(&state)),
            state,
            store,
            factory,
            _sink: sink,
            _dir: dir,
        }
    }

    impl Harness {
        async fn user(&self, token: &str, jid: Option<&str>) -> TenantId {
            let record = self
                .store
                .create(NewUser {
                    name: token.into(),
                    token: token.into(),
                    webhook: "http://hooks.test/in".into(),
                    events: String::new(),
                })
                .await
                .unwrap();
            if let Some(jid) = jid {
                self.store.set_device_identity(record.id, jid).await.unwrap();
            }
            record.id
        }

        async fn call(
            &self,
            method: &str,
            uri: &str,
            headers: &[(&str, &str)],
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            for (name, value) in headers {
                req = req.header(*name, *value);
            }
            let req = match body {
                Some(body) => req
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };
            let response = self.app.clone().oneshot(req).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn as_tenant(
            &self,
            method: &str,
            uri: &str,
            token: &str,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            self.call(method, uri, &[("token", token)], body).await
        }

        /// Connect and wait until the session has its client.
        async fn connect(&self, tenant: TenantId, token: &str) {
            let (status, body) = self
                .as_tenant(
                    "POST",
                    "/session/connect",
                    token,
                    Some(json!({ "Subscribe": ["All"], "Immediate": true })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            eventually(|| {
                self.state
                    .supervisor
                    .session(tenant)
                    .and_then(|s| s.client())
                    .is_some_and(|c| c.is_connected())
            })
            .await;
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..300 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn health_reports_status() {
        let h = harness().await;
        let (status, body) = h.call("GET", "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn unknown_or_missing_token_is_unauthorized() {
        let h = harness().await;
        let (status, body) = h.as_tenant("GET", "/session/status", "nope", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body,
            json!({ "code": 401, "success": false, "error": "Unauthorized" })
        );

        let (status, _) = h.call("GET", "/session/status", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_in_query_string_authenticates() {
        let h = harness().await;
        h.user("qtoken", None).await;
        let (status, body) = h.call("GET", "/session/status?token=qtoken", &[], None).await;
        // Authenticated, but no session yet.
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "no session");
    }

    #[tokio::test]
    async fn connect_status_and_disconnect() {
        let h = harness().await;
        let tenant = h.user("t1", Some(JID)).await;

        let (status, body) = h
            .as_tenant(
                "POST",
                "/session/connect",
                "t1",
                Some(json!({ "Subscribe": ["Message", "Bogus"], "Immediate": false })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["events"], "Message");
        assert_eq!(body["data"]["jid"], JID);
        assert_eq!(body["data"]["details"], "Connected!");

        let record = h.store.get(tenant).await.unwrap().unwrap();
        assert_eq!(record.events.tokens(), vec!["Message"]);
        assert!(record.connected);

        let (status, body) = h.as_tenant("GET", "/session/status", "t1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({ "Connected": true, "LoggedIn": true }));

        let (status, body) = h
            .as_tenant(
                "POST",
                "/session/connect",
                "t1",
                Some(json!({ "Subscribe": ["Presence"], "Immediate": true })),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "already connected");
        // A rejected connect leaves the running session's subscriptions alone.
        let record = h.store.get(tenant).await.unwrap().unwrap();
        assert_eq!(record.events.tokens(), vec!["Message"]);
        assert_eq!(
            h.state.cache().get("t1").map(|info| info.events),
            Some("Message".to_string())
        );

        let (status, body) = h.as_tenant("POST", "/session/disconnect", "t1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["Details"], "Disconnected");
        eventually(|| h.state.supervisor.session(tenant).is_none()).await;

        let (status, body) = h.as_tenant("POST", "/session/disconnect", "t1", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "no session");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let h = harness().await;
        h.user("t1", None).await;
        let req = Request::builder()
            .method("POST")
            .uri("/session/connect")
            .header("token", "t1")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Could not decode payload");
    }

    #[tokio::test]
    async fn pairing_endpoints_for_unpaired_session() {
        let h = harness().await;
        let tenant = h.user("t2", None).await;
        h.factory.prepare(
            tenant,
            MockClient::new(None).with_qr_script(vec![QrEvent::Code("2@pairing".into())]),
        );
        h.connect(tenant, "t2").await;

        for _ in 0..300 {
            if !h.store.get(tenant).await.unwrap().unwrap().qrcode.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (status, body) = h.as_tenant("GET", "/session/qr", "t2", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(
            body["data"]["QRCode"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );

        let (status, body) = h
            .as_tenant("POST", "/session/pairphone", "t2", Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing Phone in Payload");

        let (status, body) = h
            .as_tenant(
                "POST",
                "/session/pairphone",
                "t2",
                Some(json!({ "Phone": "5511999999999" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["LinkingCode"], "ABCD-EFGH");
        let client = h.factory.client(tenant).unwrap();
        assert_eq!(client.count("pair_phone:5511999999999"), 1);

        let (_, body) = h.as_tenant("GET", "/session/status", "t2", None).await;
        assert_eq!(body["data"], json!({ "Connected": true, "LoggedIn": false }));
    }

    #[tokio::test]
    async fn paired_session_rejects_pairing_endpoints() {
        let h = harness().await;
        let tenant = h.user("t3", Some(JID)).await;
        h.connect(tenant, "t3").await;

        let (status, body) = h.as_tenant("GET", "/session/qr", "t3", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "already paired");

        let (status, body) = h
            .as_tenant("POST", "/session/pairphone", "t3", Some(json!({ "Phone": "1" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Already paired");
    }

    #[tokio::test]
    async fn logout_unlinks_and_stops_session() {
        let h = harness().await;
        let tenant = h.user("t4", Some(JID)).await;
        h.connect(tenant, "t4").await;

        let (status, body) = h.as_tenant("POST", "/session/logout", "t4", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["Details"], "Logged out");
        let client = h.factory.client(tenant).unwrap();
        assert_eq!(client.count("logout"), 1);
        eventually(|| h.state.supervisor.session(tenant).is_none()).await;
        assert!(!h.store.get(tenant).await.unwrap().unwrap().connected);
    }

    #[tokio::test]
    async fn send_text_validates_and_sends() {
        let h = harness().await;
        let tenant = h.user("t5", Some(JID)).await;

        let payload = json!({ "Phone": "+5511999", "Body": "hi", "Id": "MSG1" });
        let (status, body) = h
            .as_tenant("POST", "/chat/send/text", "t5", Some(payload.clone()))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "no session");

        h.connect(tenant, "t5").await;

        let (status, body) = h
            .as_tenant(
                "POST",
                "/chat/send/text",
                "t5",
                Some(json!({ "Phone": "5511999" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing Body in Payload");

        let (status, body) = h
            .as_tenant("POST", "/chat/send/text", "t5", Some(payload))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(
            body["data"],
            json!({ "Details": "Sent", "Timestamp": 1_700_000_000, "Id": "MSG1" })
        );

        let sent = h.factory.client(tenant).unwrap().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "5511999@s.whatsapp.net");
        assert_eq!(sent[0].1, OutgoingMessage::Text { body: "hi".into() });
    }

    #[tokio::test]
    async fn send_image_attaches_thumbnail() {
        let h = harness().await;
        let tenant = h.user("t6", Some(JID)).await;
        h.connect(tenant, "t6").await;

        let png = image_ops::qr_png("thumbnail source").unwrap();
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(&png));
        let (status, body) = h
            .as_tenant(
                "POST",
                "/chat/send/media",
                "t6",
                Some(json!({
                    "mediaType": "image",
                    "Phone": "5511999",
                    "base64": data_url,
                    "caption": "look",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["data"]["Id"].as_str().unwrap().starts_with("3EB0"));

        let client = h.factory.client(tenant).unwrap();
        assert_eq!(client.count("upload:image"), 1);
        let OutgoingMessage::Media(media) = &client.sent()[0].1 else {
            panic!("expected media message");
        };
        assert_eq!(media.kind, MediaKind::Image);
        assert_eq!(media.mimetype, "image/png");
        assert_eq!(media.caption.as_deref(), Some("look"));
        assert_eq!(media.upload.file_length, png.len() as u64);
        let thumb = media.jpeg_thumbnail.as_ref().unwrap();
        assert_eq!(&thumb[..3], &[0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn send_audio_goes_out_as_voice_note() {
        let h = harness().await;
        let tenant = h.user("t7", Some(JID)).await;
        h.connect(tenant, "t7").await;

        let (status, body) = h
            .as_tenant(
                "POST",
                "/chat/send/media",
                "t7",
                Some(json!({
                    "mediaType": "Audio",
                    "Phone": "5511999",
                    "base64": "data:audio/ogg;base64,T2dnUw==",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let client = h.factory.client(tenant).unwrap();
        let OutgoingMessage::Media(media) = &client.sent()[0].1 else {
            panic!("expected media message");
        };
        assert!(media.ptt);
        assert_eq!(media.mimetype, VOICE_NOTE_MIME);
        assert_eq!(media.seconds, Some(0));
    }

    #[tokio::test]
    async fn send_document_needs_a_name() {
        let h = harness().await;
        let tenant = h.user("t8", Some(JID)).await;
        h.connect(tenant, "t8").await;

        let (status, body) = h
            .as_tenant(
                "POST",
                "/chat/send/media",
                "t8",
                Some(json!({
                    "mediaType": "document",
                    "Phone": "5511999",
                    "base64": "data:application/pdf;base64,JVBERi0=",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing fileName in Payload for document");

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/report.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4")
            .expect(1)
            .create_async()
            .await;
        let (status, body) = h
            .as_tenant(
                "POST",
                "/chat/send/media",
                "t8",
                Some(json!({
                    "mediaType": "document",
                    "Phone": "5511999",
                    "mediaUrl": format!("{}/files/report.pdf", server.url()),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        mock.assert_async().await;

        let client = h.factory.client(tenant).unwrap();
        let OutgoingMessage::Media(media) = &client.sent()[0].1 else {
            panic!("expected media message");
        };
        assert_eq!(media.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(media.mimetype, "application/pdf");
    }

    #[tokio::test]
    async fn send_media_rejects_unknown_type_and_missing_source() {
        let h = harness().await;
        let tenant = h.user("t9", Some(JID)).await;
        h.connect(tenant, "t9").await;

        let (status, _) = h
            .as_tenant(
                "POST",
                "/chat/send/media",
                "t9",
                Some(json!({ "mediaType": "gif", "Phone": "1", "base64": "data:;base64,AA==" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h
            .as_tenant(
                "POST",
                "/chat/send/media",
                "t9",
                Some(json!({ "mediaType": "video", "Phone": "1" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing base64 or mediaUrl in Payload");
    }

    #[tokio::test]
    async fn download_media_returns_raw_bytes() {
        let h = harness().await;
        let tenant = h.user("t10", Some(JID)).await;
        h.factory.prepare(
            tenant,
            MockClient::new(Some(JID)).with_media(b"hello".to_vec()),
        );
        h.connect(tenant, "t10").await;

        let request = json!({
            "messageType": "imageMessage",
            "URL": "https://mmg.test/blob",
            "directPath": "/v/blob",
            "mediaKey": "a2V5",
            "mimetype": "image/jpeg",
            "fileEncSHA256": "",
            "fileSHA256": "",
            "fileLength": 5,
        });
        let req = Request::builder()
            .method("POST")
            .uri("/chat/downloadmedia")
            .header("token", "t10")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(request.to_string()))
            .unwrap();
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
        assert_eq!(response.headers()["content-length"], "5");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        let mut bad = request.clone();
        bad["messageType"] = json!("textMessage");
        let (status, _) = h
            .as_tenant("POST", "/chat/downloadmedia", "t10", Some(bad))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.factory.client(tenant).unwrap().count("download:image"), 1);
    }

    #[tokio::test]
    async fn webhook_settings_reach_store_cache_and_session() {
        let h = harness().await;
        let tenant = h.user("t11", Some(JID)).await;
        h.connect(tenant, "t11").await;

        let (status, body) = h
            .as_tenant(
                "POST",
                "/webhook",
                "t11",
                Some(json!({ "webhook": "http://new.test/hook", "events": ["Presence", "Message"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["events"], json!(["Message", "Presence"]));

        let (_, body) = h.as_tenant("GET", "/webhook", "t11", None).await;
        assert_eq!(
            body["data"],
            json!({ "webhook": "http://new.test/hook", "subscribe": ["Message", "Presence"] })
        );
        assert_eq!(
            h.state.cache().get("t11").unwrap().webhook,
            "http://new.test/hook"
        );
        let session = h.state.supervisor.session(tenant).unwrap();
        assert!(session.subscriptions().contains(EventKind::Presence));
        assert!(!session.subscriptions().contains(EventKind::ChatPresence));

        let (status, body) = h
            .as_tenant(
                "PUT",
                "/webhook",
                "t11",
                Some(json!({ "webhook": "http://x.test", "events": ["Message"], "active": false })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["webhook"], "");
        assert_eq!(body["data"]["active"], false);
        assert_eq!(h.store.get(tenant).await.unwrap().unwrap().webhook, "");

        let (status, body) = h.as_tenant("DELETE", "/webhook", "t11", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["Details"],
            "Webhook and events deleted successfully"
        );
        assert_eq!(h.state.cache().get("t11").unwrap().webhook, "");
    }

    #[tokio::test]
    async fn admin_routes_require_admin_token() {
        let h = harness().await;
        let (status, _) = h.call("GET", "/admin/users", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = h
            .call("GET", "/admin/users", &[("authorization", "wrong")], None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let auth = [("authorization", ADMIN)];
        let (status, body) = h
            .call(
                "POST",
                "/admin/users",
                &auth,
                Some(json!({ "name": "acme", "token": "acme-token", "events": "Message,All" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, _) = h
            .call(
                "POST",
                "/admin/users",
                &auth,
                Some(json!({ "name": "dup", "token": "acme-token" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = h
            .call(
                "POST",
                "/admin/users",
                &auth,
                Some(json!({ "name": "x", "token": "x", "events": "Nope" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid event: Nope");

        let (status, body) = h.call("GET", "/admin/users", &auth, None).await;
        assert_eq!(status, StatusCode::OK);
        let users = body["data"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["token"], "acme-token");
        assert_eq!(users[0]["events"], "All");

        let uri = format!("/admin/users/{id}");
        let (status, _) = h.call("DELETE", &uri, &auth, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = h.call("DELETE", &uri, &auth, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "User not found");
    }
}
