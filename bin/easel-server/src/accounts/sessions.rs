//! Bearer sessions in `sessions.json`: `{ token: { username, createdAt } }`.
//!
//! Lookups re-read the file so tokens written by another process are honoured.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use easel_core::{SnapshotFile, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::random_hex;

const TOKEN_BYTES: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<i64>,
}

type Sessions = HashMap<String, SessionEntry>;

#[derive(Debug, Clone)]
pub struct SessionTable {
    file: Arc<SnapshotFile>,
    write_lock: Arc<Mutex<()>>,
}

impl SessionTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(SnapshotFile::new(path)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Username bound to `token`, if any. Unreadable files resolve nothing.
    pub async fn resolve(&self, token: &str) -> Option<String> {
        let table: Sessions = match self.file.load().await {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %self.file.path().display(), error = %e, "cannot read sessions");
                return None;
            }
        };
        table
            .get(token)
            .and_then(|entry| entry.username.clone())
            .filter(|name| !name.is_empty())
    }

    /// Mint a new token for `username` and record it.
    pub async fn issue(&self, username: &str) -> Result<String, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut table: Sessions = self.file.load().await?;
        let token = random_hex(TOKEN_BYTES);
        table.insert(
            token.clone(),
            SessionEntry {
                username: Some(username.to_owned()),
                created_at: Some(Utc::now().timestamp_millis()),
            },
        );
        self.file.save(&table).await?;
        debug!(%username, sessions = table.len(), "session issued");
        Ok(token)
    }
}
