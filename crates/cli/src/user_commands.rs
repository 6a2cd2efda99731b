use {
    anyhow::{Result, bail},
    clap::Subcommand,
    wagate_common::TenantId,
    wagate_config::WagateConfig,
    wagate_sessions::{NewUser, SessionRecord, SessionRecordStore},
};

#[derive(Subcommand)]
pub enum UserAction {
    /// List provisioned tenants.
    List,
    /// Provision a tenant.
    Add {
        #[arg(long)]
        name: String,
        /// API token the tenant authenticates with.
        #[arg(long)]
        token: String,
        /// Webhook URL for event delivery.
        #[arg(long, default_value = "")]
        webhook: String,
        /// Comma-separated event subscriptions (e.g. "Message,ReadReceipt").
        #[arg(long, default_value = "")]
        events: String,
    },
    /// Remove a tenant by id.
    Remove { id: i64 },
}

pub async fn handle_users(action: UserAction, config: &WagateConfig) -> Result<()> {
    let store = wagate_gateway::open_store(&config.database).await?;
    let output = run(action, store.as_ref()).await?;
    println!("{output}");
    Ok(())
}

async fn run(action: UserAction, store: &dyn SessionRecordStore) -> Result<String> {
    match action {
        UserAction::List => Ok(format_users(&store.list().await?)),
        UserAction::Add {
            name,
            token,
            webhook,
            events,
        } => {
            if store.get_by_token(&token).await?.is_some() {
                bail!("a user with this token already exists");
            }
            let record = store
                .create(NewUser {
                    name,
                    token,
                    webhook,
                    events,
                })
                .await?;
            Ok(format!("added user {} ({})", record.id, record.name))
        },
        UserAction::Remove { id } => {
            if !store.delete(TenantId(id)).await? {
                bail!("no user with id {id}");
            }
            Ok(format!("removed user {id}"))
        },
    }
}

fn format_users(users: &[SessionRecord]) -> String {
    if users.is_empty() {
        return "no users".into();
    }
    let mut out = format!(
        "{:<6} {:<20} {:<10} {:<32} {}",
        "ID", "NAME", "CONNECTED", "JID", "EVENTS"
    );
    for user in users {
        let jid = if user.jid.is_empty() { "-" } else { &user.jid };
        out.push_str(&format!(
            "\n{:<6} {:<20} {:<10} {:<32} {}",
            user.id,
            user.name,
            if user.connected { "yes" } else { "no" },
            jid,
            user.events.to_csv(),
        ));
    }
    out
}
