use std::path::{Path, PathBuf};

use {
    tokio::{fs, io::AsyncWriteExt},
    tracing::debug,
    wagate_common::{Result, TenantId},
};

/// Append-only directory of history-sync dumps, one file per sequence
/// number: `<root>/user_<id>/history-<seq>.json`.
#[derive(Debug, Clone)]
pub struct HistorySyncLog {
    root: PathBuf,
}

impl HistorySyncLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tenant_dir(&self, tenant: TenantId) -> PathBuf {
        self.root.join(format!("user_{tenant}"))
    }

    pub fn path_for(&self, tenant: TenantId, seq: i64) -> PathBuf {
        self.tenant_dir(tenant).join(format!("history-{seq}.json"))
    }

    /// Write `payload` as dump number `seq`. Never overwrites an existing
    /// dump: reusing a sequence number is an error.
    pub async fn append(
        &self,
        tenant: TenantId,
        seq: i64,
        payload: &serde_json::Value,
    ) -> Result<PathBuf> {
        fs::create_dir_all(self.tenant_dir(tenant)).await?;
        let path = self.path_for(tenant, seq);
        let body = serde_json::to_vec(payload)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await?;

        debug!(tenant = %tenant, seq, path = %path.display(), "history sync dumped");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_sequenced_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistorySyncLog::new(dir.path());
        let tenant = TenantId(3);

        let first = log
            .append(tenant, 1, &serde_json::json!({"conversations": []}))
            .await
            .unwrap();
        assert_eq!(first, dir.path().join("user_3").join("history-1.json"));
        let raw = std::fs::read_to_string(&first).unwrap();
        assert_eq!(raw, r#"{"conversations":[]}"#);

        log.append(tenant, 2, &serde_json::json!({})).await.unwrap();
        assert!(log.path_for(tenant, 2).exists());
    }

    #[tokio::test]
    async fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistorySyncLog::new(dir.path());
        log.append(TenantId(1), 1, &serde_json::json!(1)).await.unwrap();
        assert!(log.append(TenantId(1), 1, &serde_json::json!(2)).await.is_err());
    }
}
