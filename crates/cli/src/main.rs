mod user_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    secrecy::Secret,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wagate_config::WagateConfig,
};

#[derive(Parser)]
#[command(name = "wagate", about = "Wagate, multi-tenant messaging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Only look for the config file in this directory.
    #[arg(long, global = true, env = "WAGATE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Overrides `server.admin_token`.
        #[arg(long, env = "WAGATE_ADMIN_TOKEN", hide_env_values = true)]
        admin_token: Option<String>,
    },
    /// Tenant management.
    Users {
        #[command(subcommand)]
        action: user_commands::UserAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file path in use.
    Path,
    /// Parse the config file and report errors.
    Check,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn serve_config(
    mut config: WagateConfig,
    bind: Option<String>,
    port: Option<u16>,
    admin_token: Option<String>,
) -> WagateConfig {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(token) = admin_token.filter(|t| !t.is_empty()) {
        config.server.admin_token = Some(Secret::new(token));
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = cli.config_dir.clone() {
        wagate_config::set_config_dir(dir);
    }

    match cli.command {
        Commands::Serve {
            bind,
            port,
            admin_token,
        } => {
            info!(version = env!("CARGO_PKG_VERSION"), "wagate starting");
            let config = serve_config(
                wagate_config::discover_and_load(),
                bind,
                port,
                admin_token,
            );
            wagate_gateway::start_gateway(config).await
        },
        Commands::Users { action } => {
            let config = wagate_config::discover_and_load();
            user_commands::handle_users(action, &config).await
        },
        Commands::Config { action } => match action {
            ConfigAction::Path => {
                println!("{}", wagate_config::find_or_default_config_path().display());
                Ok(())
            },
            ConfigAction::Check => {
                let path = wagate_config::find_or_default_config_path();
                let config = wagate_config::load_config(&path)?;
                println!(
                    "{}: ok (listening on {}:{}, database {})",
                    path.display(),
                    config.server.bind,
                    config.server.port,
                    config.database.url
                );
                Ok(())
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn flags_override_config() {
        let config = serve_config(
            WagateConfig::default(),
            Some("0.0.0.0".into()),
            Some(9000),
            Some("admin".into()),
        );
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.server.admin_token.as_ref().unwrap().expose_secret(),
            "admin"
        );

        let untouched = serve_config(WagateConfig::default(), None, None, Some(String::new()));
        assert_eq!(untouched.server.port, 8080);
        assert!(untouched.server.admin_token.is_none());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["wagate", "--json-logs", "serve", "--port", "9001"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9001), .. }));

        let cli = Cli::try_parse_from([
            "wagate", "users", "add", "--name", "acme", "--token", "t",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Users {
                action: user_commands::UserAction::Add { .. }
            }
        ));
    }
}
