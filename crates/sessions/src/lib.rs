//! Per-tenant persistence.
//!
//! Tenant rows live in the SQLite `users` table. Hot request paths read the
//! mutable fields through an explicitly invalidated in-memory cache, and
//! history-sync payloads are dumped to sequenced files under
//! `<files_dir>/user_<id>/`.

pub mod cache;
pub mod history;
pub mod store;

pub use {
    cache::{UserInfo, UserInfoCache},
    history::HistorySyncLog,
    store::{NewUser, SessionRecord, SessionRecordStore, SqliteSessionStore},
};
