//! Bearer credential lookup
//!
//! The identity provider lives outside this crate. All the client needs is a
//! way to ask, right before each request, for the current session's bearer
//! token, or to learn that there is no session.

use async_trait::async_trait;
use secrecy::SecretString;
use std::env::VarError;

use crate::remote::ServiceError;

/// Environment variable read by `EnvTokenProvider::default()`
pub const DEFAULT_TOKEN_ENV_VAR: &str = "CLOUDSHARE_TOKEN";

/// Supplies the bearer credential for the current session.
///
/// `Ok(None)` means "no session": the request goes out unauthenticated and
/// the server decides. `Err` means the credential could not be obtained.
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<SecretString>, ServiceError>;
}

/// A fixed token, or a permanent "no session".
pub struct StaticTokenProvider {
    token: Option<SecretString>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(SecretString::from(token.into())),
        }
    }

    pub fn no_session() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl AuthTokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<Option<SecretString>, ServiceError> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call, so a session
/// started or ended by another process is picked up by the next request.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV_VAR)
    }
}

#[async_trait]
impl AuthTokenProvider for EnvTokenProvider {
    async fn bearer_token(&self) -> Result<Option<SecretString>, ServiceError> {
        match std::env::var(&self.var) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(SecretString::from(value.trim().to_string()))),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(ServiceError::AuthenticationFailed(format!(
                "{} does not contain a valid token",
                self.var
            ))),
        }
    }
}
