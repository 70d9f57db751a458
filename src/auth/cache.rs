//! Persistent multi-account, multi-scope token cache
//!
//! The cache is serialized as one JSON document. Reads go straight to the
//! persistence hook; every mutation runs under a single writer lock that
//! re-imports the current bytes, applies the change and exports the result,
//! so two concurrent acquisitions can never overwrite each other's tokens.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::token::{AccountIdentity, Token};

/// Export/replace hook that owns the serialized cache bytes
pub trait CachePersistence: Send + Sync {
    /// Current serialized cache, or `None` when nothing was stored yet
    fn replace(&self) -> Result<Option<Vec<u8>>, AuthError>;

    /// Store the serialized cache
    fn export(&self, bytes: &[u8]) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccount {
    pub identity: AccountIdentity,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_tokens: BTreeMap<String, Token>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheContent {
    #[serde(default)]
    pub default_account: Option<String>,
    #[serde(default)]
    pub accounts: BTreeMap<String, CachedAccount>,
}

impl CacheContent {
    /// Account to use for a silent lookup.
    ///
    /// With a tenant, the default account wins if it lives in that tenant,
    /// otherwise any account of the tenant. Without one, the default account,
    /// or the only account when there is exactly one.
    pub fn find_account(&self, tenant: Option<&str>) -> Option<&CachedAccount> {
        let default = self
            .default_account
            .as_ref()
            .and_then(|id| self.accounts.get(id));

        match tenant {
            Some(tenant) => default
                .filter(|account| account.identity.tenant_id.eq_ignore_ascii_case(tenant))
                .or_else(|| {
                    self.accounts
                        .values()
                        .find(|account| account.identity.tenant_id.eq_ignore_ascii_case(tenant))
                }),
            None => default.or_else(|| {
                if self.accounts.len() == 1 {
                    self.accounts.values().next()
                } else {
                    None
                }
            }),
        }
    }

    pub fn find_by_username(&self, username: &str) -> Option<&CachedAccount> {
        self.accounts
            .values()
            .find(|account| account.identity.preferred_username.eq_ignore_ascii_case(username))
    }

    /// Store a freshly acquired token. The first account recorded becomes the default.
    pub fn record(&mut self, identity: &AccountIdentity, refresh_token: Option<String>, token: Token) {
        let account = self
            .accounts
            .entry(identity.home_account_id.clone())
            .or_insert_with(|| CachedAccount {
                identity: identity.clone(),
                ..Default::default()
            });

        if !identity.preferred_username.is_empty() {
            account.identity.preferred_username = identity.preferred_username.clone();
        }
        if refresh_token.is_some() {
            account.refresh_token = refresh_token;
        }
        account.access_tokens.insert(token.scope.clone(), token);

        if self.default_account.is_none() {
            self.default_account = Some(identity.home_account_id.clone());
        }
    }

    pub fn remove_account(&mut self, home_account_id: &str) -> bool {
        let removed = self.accounts.remove(home_account_id).is_some();
        if self.default_account.as_deref() == Some(home_account_id) {
            self.default_account = self.accounts.keys().next().cloned();
        }
        removed
    }

    pub fn from_bytes(bytes: Option<&[u8]>) -> Result<Self, AuthError> {
        match bytes {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => Ok(serde_json::from_slice(bytes)?),
            _ => Ok(Self::default()),
        }
    }
}

pub struct TokenCache {
    persistence: Arc<dyn CachePersistence>,
    write_lock: Mutex<()>,
}

impl TokenCache {
    pub fn new(persistence: Arc<dyn CachePersistence>) -> Self {
        Self {
            persistence,
            write_lock: Mutex::new(()),
        }
    }

    /// Re-import the persisted cache
    pub fn load(&self) -> Result<CacheContent, AuthError> {
        let bytes = self.persistence.replace()?;
        CacheContent::from_bytes(bytes.as_deref())
    }

    /// Serialized read-modify-write of the persisted cache
    pub fn update<R>(&self, mutate: impl FnOnce(&mut CacheContent) -> R) -> Result<R, AuthError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AuthError::Cache("token cache lock poisoned".to_string()))?;

        let mut content = self.load()?;
        let result = mutate(&mut content);
        let bytes = serde_json::to_vec_pretty(&content)?;
        self.persistence.export(&bytes)?;
        debug!("Token cache exported ({} accounts)", content.accounts.len());
        Ok(result)
    }

    pub fn accounts(&self) -> Result<Vec<AccountIdentity>, AuthError> {
        Ok(self
            .load()?
            .accounts
            .into_values()
            .map(|account| account.identity)
            .collect())
    }

    pub fn default_account(&self) -> Result<Option<AccountIdentity>, AuthError> {
        let content = self.load()?;
        Ok(content.find_account(None).map(|account| account.identity.clone()))
    }

    /// Make the account with `username` (or home account id) the default
    pub fn set_default_account(&self, username_or_id: &str) -> Result<AccountIdentity, AuthError> {
        self.update(|content| {
            let identity = content
                .accounts
                .get(username_or_id)
                .or_else(|| content.find_by_username(username_or_id))
                .map(|account| account.identity.clone())
                .ok_or_else(|| AuthError::Cache(format!("no cached account '{}'", username_or_id)))?;
            content.default_account = Some(identity.home_account_id.clone());
            Ok(identity)
        })?
    }

    /// Forget one account, or every account when `username_or_id` is `None`
    pub fn clear(&self, username_or_id: Option<&str>) -> Result<usize, AuthError> {
        self.update(|content| match username_or_id {
            None => {
                let removed = content.accounts.len();
                *content = CacheContent::default();
                removed
            }
            Some(key) => {
                let home_id = content
                    .accounts
                    .get(key)
                    .or_else(|| content.find_by_username(key))
                    .map(|account| account.identity.home_account_id.clone());
                match home_id {
                    Some(id) => usize::from(content.remove_account(&id)),
                    None => 0,
                }
            }
        })
    }
}

/// Cache stored as a JSON file readable only by the current user
#[derive(Debug, Clone)]
pub struct FileCachePersistence {
    path: PathBuf,
}

impl FileCachePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CachePersistence for FileCachePersistence {
    fn replace(&self) -> Result<Option<Vec<u8>>, AuthError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn export(&self, bytes: &[u8]) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token_cache.json".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let write_result = options.open(&tmp_path).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
        if let Err(e) = write_result.and_then(|_| fs::rename(&tmp_path, &self.path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-process persistence, used in test mode and by tests
#[derive(Debug, Default)]
pub struct MemoryCachePersistence {
    data: Mutex<Option<Vec<u8>>>,
    exports: AtomicUsize,
}

impl MemoryCachePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: &CacheContent) -> Result<Self, AuthError> {
        let persistence = Self::new();
        *persistence.lock()? = Some(serde_json::to_vec(content)?);
        Ok(persistence)
    }

    pub fn export_count(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub fn content(&self) -> Result<CacheContent, AuthError> {
        let data = self.lock()?;
        CacheContent::from_bytes(data.as_deref())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Vec<u8>>>, AuthError> {
        self.data
            .lock()
            .map_err(|_| AuthError::Cache("memory cache lock poisoned".to_string()))
    }
}

impl CachePersistence for MemoryCachePersistence {
    fn replace(&self) -> Result<Option<Vec<u8>>, AuthError> {
        Ok(self.lock()?.clone())
    }

    fn export(&self, bytes: &[u8]) -> Result<(), AuthError> {
        *self.lock()? = Some(bytes.to_vec());
        self.exports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
