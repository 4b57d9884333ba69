//! User accounts in `users.json`.
//!
//! Passwords are kept as hex PBKDF2-HMAC-SHA256 digests with a random
//! per-user salt, in the layout earlier deployments of the service wrote, so
//! existing account files keep working.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use easel_core::{SnapshotFile, StoreError};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::random_hex;

pub const PASSWORD_ROUNDS: u32 = 120_000;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUser {
    id: String,
    username: String,
    password_hash: String,
    password_salt: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

impl StoredUser {
    fn account(&self) -> Account {
        Account {
            id: self.id.clone(),
            username: self.username.clone(),
        }
    }
}

/// Public view of a stored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("username already exists")]
    UsernameTaken,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("password hashing task failed: {0}")]
    Hashing(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct UserStore {
    file: Arc<SnapshotFile>,
    write_lock: Arc<Mutex<()>>,
    rounds: u32,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_rounds(path, PASSWORD_ROUNDS)
    }

    /// Store hashing with `rounds` PBKDF2 iterations. Digests written with a
    /// different count never verify.
    pub fn with_rounds(path: impl Into<PathBuf>, rounds: u32) -> Self {
        Self {
            file: Arc::new(SnapshotFile::new(path)),
            write_lock: Arc::new(Mutex::new(())),
            rounds: rounds.max(1),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Account, AccountError> {
        let _guard = self.write_lock.lock().await;
        let mut users: Vec<StoredUser> = self.file.load().await?;
        if users.iter().any(|u| u.username == username) {
            return Err(AccountError::UsernameTaken);
        }

        let password_salt = random_hex(SALT_LEN);
        let password_hash = self.digest(password, &password_salt).await?;
        let user = StoredUser {
            id: new_user_id(),
            username: username.to_owned(),
            password_hash,
            password_salt,
            created_at: Utc::now(),
        };
        let account = user.account();
        users.push(user);
        self.file.save(users.as_slice()).await?;
        info!(user_id = %account.id, %username, "account registered");
        Ok(account)
    }

    /// The account for `username` if `password` matches; `None` for an
    /// unknown user or a wrong password.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Account>, AccountError> {
        let users: Vec<StoredUser> = self.file.load().await?;
        let Some(user) = users.into_iter().find(|u| u.username == username) else {
            debug!(%username, "sign-in for unknown user");
            return Ok(None);
        };
        if user.password_hash.is_empty() || user.password_salt.is_empty() {
            return Ok(None);
        }
        let computed = self.digest(password, &user.password_salt).await?;
        Ok(digests_match(&computed, &user.password_hash).then(|| user.account()))
    }

    async fn digest(&self, password: &str, salt: &str) -> Result<String, AccountError> {
        let (password, salt, rounds) = (password.to_owned(), salt.to_owned(), self.rounds);
        let digest = tokio::task::spawn_blocking(move || derive_key(&password, &salt, rounds)).await?;
        Ok(digest)
    }
}

fn new_user_id() -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("u_{}_{}", Utc::now().timestamp_millis(), &salt[..8])
}

/// The salt is used as the UTF-8 bytes of its hex string.
fn derive_key(password: &str, salt: &str, rounds: u32) -> String {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut key);
    hex::encode(key)
}

/// Constant-time comparison of two hex digests.
fn digests_match(computed: &str, stored: &str) -> bool {
    let (Ok(a), Ok(b)) = (hex::decode(computed), hex::decode(stored)) else {
        return false;
    };
    a.len() == b.len() && a.iter().zip(&b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> UserStore {
        UserStore::with_rounds(dir.path().join("users.json"), 2)
    }

    #[test]
    fn derives_standard_pbkdf2_sha256() {
        assert_eq!(
            derive_key("passwd", "salt", 1),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn digest_comparison_rejects_mismatches() {
        assert!(digests_match("00ff", "00FF"));
        assert!(!digests_match("00ff", "00fe"));
        assert!(!digests_match("00ff", "00ff00"));
        assert!(!digests_match("00ff", "not hex"));
    }

    #[tokio::test]
    async fn registered_user_can_sign_in() {
        let dir = TempDir::new().unwrap();
        let users = store(&dir);
        let account = users.register("alice", "s3cret").await.unwrap();
        assert!(account.id.starts_with("u_"));
        assert_eq!(account.username, "alice");

        assert_eq!(users.authenticate("alice", "s3cret").await.unwrap(), Some(account));
        assert_eq!(users.authenticate("alice", "wrong").await.unwrap(), None);
        assert_eq!(users.authenticate("bob", "s3cret").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let dir = TempDir::new().unwrap();
        let users = store(&dir);
        users.register("alice", "one").await.unwrap();
        let err = users.register("alice", "two").await.unwrap_err();
        assert!(matches!(err, AccountError::UsernameTaken));
        assert!(users.authenticate("alice", "one").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_keeps_salted_hex_digests() {
        let dir = TempDir::new().unwrap();
        store(&dir).register("alice", "s3cret").await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("users.json")).unwrap()).unwrap();
        let user = &raw[0];
        assert_eq!(user["username"], "alice");
        assert_eq!(user["passwordSalt"].as_str().unwrap().len(), SALT_LEN * 2);
        assert_eq!(user["passwordHash"].as_str().unwrap().len(), KEY_LEN * 2);
        assert!(user["createdAt"].is_i64());
        assert!(!raw.to_string().contains("s3cret"));
    }

    #[tokio::test]
    async fn accounts_written_elsewhere_verify() {
        let dir = TempDir::new().unwrap();
        let salt = "0123456789abcdef0123456789abcdef";
        std::fs::write(
            dir.path().join("users.json"),
            serde_json::json!([{
                "id": "u_1700000000000_abcdefgh",
                "username": "carol",
                "passwordHash": derive_key("hunter2", salt, 2),
                "passwordSalt": salt,
                "createdAt": 1_700_000_000_000_i64
            }])
            .to_string(),
        )
        .unwrap();

        let account = store(&dir).authenticate("carol", "hunter2").await.unwrap().unwrap();
        assert_eq!(account.id, "u_1700000000000_abcdefgh");
    }
}
