//! Credential resolution.
//!
//! Resources carry an opaque `credentials_ref`, never the secret itself.
//! Source providers resolve the reference through a [`SecretStore`] at the
//! point of use and drop the [`Credentials`] when the call returns.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use repo_index_sync_core::{Result, SyncError};

/// Username/token pair for a source repository.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a credentials reference. Unknown references are an
    /// authentication failure: the resource cannot be accessed as
    /// configured.
    async fn resolve(&self, reference: &str) -> Result<Credentials>;
}

/// Resolves `REF` to the `<prefix>REF_USERNAME` / `<prefix>REF_TOKEN`
/// environment variables. The username defaults to `x-access-token`,
/// which GitHub accepts for token auth.
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, reference: &str, suffix: &str) -> String {
        let key: String = reference
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}_{}", self.prefix, key, suffix)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, reference: &str) -> Result<Credentials> {
        let token_var = self.var_name(reference, "TOKEN");
        let token = std::env::var(&token_var).map_err(|_| {
            SyncError::auth(
                format!("credentials '{}'", reference),
                format!("{} is not set", token_var),
            )
        })?;
        let username = std::env::var(self.var_name(reference, "USERNAME"))
            .unwrap_or_else(|_| "x-access-token".to_string());
        Ok(Credentials { username, token })
    }
}

/// Fixed map of references, for tests and embedding.
#[derive(Default)]
pub struct StaticSecretStore {
    entries: HashMap<String, Credentials>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: &str, username: &str, token: &str) -> Self {
        self.entries.insert(
            reference.to_string(),
            Credentials {
                username: username.to_string(),
                token: token.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn resolve(&self, reference: &str) -> Result<Credentials> {
        self.entries.get(reference).cloned().ok_or_else(|| {
            SyncError::auth(
                format!("credentials '{}'", reference),
                "unknown credentials reference",
            )
        })
    }
}
