//! Configuration loading, env substitution, and schema types.
//!
//! Config files: `wagate.toml`, `wagate.yaml`, or `wagate.json`
//! Searched in `./` then `~/.config/wagate/`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_or_default_config_path,
        load_config, set_config_dir,
    },
    schema::{
        DatabaseConfig, LoggingConfig, MediaConfig, OffloadConfig, ServerConfig, WagateConfig,
        WebhookConfig, WhatsAppConfig,
    },
};
