//! User account persistence backing the CLI's `user create|login|api-key
//! create|api-key list` surface. One flat YAML file per account; salted
//! SHA-256 password hashing, matching the hashing crate already pulled in
//! for the build cache.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AfeError, Result};
use crate::paths::UserDirectories;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Hash of the token; the plaintext token is shown only once, at
    /// creation time, and never persisted.
    token_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    password_hash: String,
    salt: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

pub struct AccountStore {
    dir: PathBuf,
}

impl AccountStore {
    pub fn new(dirs: &UserDirectories) -> Self {
        Self { dir: dirs.accounts_dir() }
    }

    fn account_path(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{username}.yaml"))
    }

    /// Create a new account. Fails if one with this username already
    /// exists.
    pub fn create(&self, username: &str, password: &str) -> Result<Account> {
        let path = self.account_path(username);
        if path.exists() {
            return Err(AfeError::config(format!("account {username} already exists")));
        }

        let salt = random_token(16);
        let account = Account {
            username: username.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            created_at: Utc::now(),
            api_keys: Vec::new(),
        };
        self.save(&account)?;
        Ok(account)
    }

    /// Hash-compare a login attempt. Returns `Ok(false)` (not an error) for
    /// a wrong password or a missing account.
    pub fn login(&self, username: &str, password: &str) -> Result<bool> {
        let Some(account) = self.load(username)? else {
            return Ok(false);
        };
        Ok(account.password_hash == hash_password(&account.salt, password))
    }

    /// Mint a new API key for `username`, returning its plaintext token
    /// once. Only the token's hash is persisted.
    pub fn api_key_create(&self, username: &str, label: &str) -> Result<String> {
        let mut account = self
            .load(username)?
            .ok_or_else(|| AfeError::config(format!("no such account: {username}")))?;

        let token = random_token(32);
        account.api_keys.push(ApiKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            token_hash: hash_token(&token),
        });
        self.save(&account)?;
        Ok(token)
    }

    /// List API keys for `username`: label and timestamps only, never the
    /// token or its hash.
    pub fn api_key_list(&self, username: &str) -> Result<Vec<ApiKeyInfo>> {
        let account = self
            .load(username)?
            .ok_or_else(|| AfeError::config(format!("no such account: {username}")))?;
        Ok(account
            .api_keys
            .into_iter()
            .map(|k| ApiKeyInfo { id: k.id, label: k.label, created_at: k.created_at, last_used_at: k.last_used_at })
            .collect())
    }

    fn load(&self, username: &str) -> Result<Option<Account>> {
        let path = self.account_path(username);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&contents)?))
    }

    fn save(&self, account: &Account) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let serialized = serde_yaml::to_string(account)?;
        std::fs::write(self.account_path(&account.username), serialized)?;
        Ok(())
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn random_token(bytes: usize) -> String {
    let raw: Vec<u8> = (0..bytes).map(|_| rand::thread_rng().gen()).collect();
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (AccountStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("afe-accounts-test-{}", uuid::Uuid::new_v4()));
        (AccountStore { dir: dir.clone() }, dir)
    }

    #[test]
    fn create_then_login_succeeds_with_the_right_password() {
        let (store, dir) = store();
        store.create("alice", "hunter2").unwrap();
        assert!(store.login("alice", "hunter2").unwrap());
        assert!(!store.login("alice", "wrong").unwrap());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let (store, dir) = store();
        store.create("alice", "hunter2").unwrap();
        assert!(store.create("alice", "other").is_err());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn api_key_is_shown_once_and_listed_without_the_token() {
        let (store, dir) = store();
        store.create("alice", "hunter2").unwrap();
        let token = store.api_key_create("alice", "ci").unwrap();
        assert!(!token.is_empty());

        let keys = store.api_key_list("alice").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].label, "ci");
        std::fs::remove_dir_all(dir).ok();
    }
}
