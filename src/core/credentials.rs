//! Scoped credentials
//!
//! A credential is acquired from a [`CredentialProvider`] and held as a
//! [`CredentialLease`]. The lease gives the credential back to the provider
//! exactly once: either through [`CredentialLease::release`] or when it is
//! dropped, which covers early returns, errors and cancelled futures.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Error types for credential acquisition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("credential '{id}' unavailable: {message}")]
    Unavailable { id: String, message: String },
}

/// A secret value; never printed by `Debug`
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    username: Option<String>,
    value: String,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            username: None,
            value: value.into(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The secret itself
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("username", &self.username)
            .field("value", &"****")
            .finish()
    }
}

/// Source of credentials (secret store, environment, ...)
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquire the credential identified by `id`
    async fn acquire(&self, id: &str) -> Result<Secret, CredentialError>;

    /// Give a previously acquired credential back
    fn release(&self, id: &str);
}

/// Reads credentials from the host environment
///
/// Credential `registry` is read from `PIPEWRIGHT_CRED_REGISTRY`, with an
/// optional username in `PIPEWRIGHT_CRED_REGISTRY_USER`.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self::with_prefix("PIPEWRIGHT_CRED_")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Environment variable holding the secret for `id`
    pub fn variable_for(&self, id: &str) -> String {
        let normalized: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn acquire(&self, id: &str) -> Result<Secret, CredentialError> {
        let var = self.variable_for(id);
        let value = std::env::var(&var).map_err(|_| CredentialError::NotFound(id.to_string()))?;
        if value.is_empty() {
            return Err(CredentialError::Unavailable {
                id: id.to_string(),
                message: format!("{} is empty", var),
            });
        }

        let secret = Secret::new(value);
        Ok(match std::env::var(format!("{}_USER", var)) {
            Ok(user) => secret.with_username(user),
            Err(_) => secret,
        })
    }

    fn release(&self, id: &str) {
        debug!("Released environment credential {}", id);
    }
}

/// One acquisition of a credential
pub struct CredentialLease {
    id: String,
    secret: Secret,
    provider: Option<Arc<dyn CredentialProvider>>,
    outstanding: Arc<AtomicUsize>,
}

impl CredentialLease {
    pub(crate) fn new(
        id: String,
        secret: Secret,
        provider: Arc<dyn CredentialProvider>,
        outstanding: Arc<AtomicUsize>,
    ) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            secret,
            provider: Some(provider),
            outstanding,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(provider) = self.provider.take() {
            provider.release(&self.id);
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            debug!("Credential {} released", self.id);
        }
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("id", &self.id)
            .field("released", &self.provider.is_none())
            .finish()
    }
}
