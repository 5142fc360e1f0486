use async_trait::async_trait;

use crate::error::{Error, Result};

/// An authenticated bearer token handed to a provider transport. Opaque to
/// every caller above the `Credential` boundary — the turn engine never
/// learns which backend produced it (spec §9).
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub bearer: String,
}

/// Abstracts authentication and token refresh (spec §1 non-goal: out of
/// scope for the core). Concrete sources (API key file, OAuth refresh flow,
/// Cloud Shell ambient credentials) live outside this crate and are plugged
/// in as trait objects.
#[async_trait]
pub trait Credential: Send + Sync {
    /// Returns a currently-valid bearer token, refreshing if necessary.
    async fn token(&self) -> Result<AuthToken>;
}

/// A credential backed by a single static API key, read once at startup.
/// Used for `GEMINI_API_KEY`/`GOOGLE_API_KEY`-style direct-key auth.
#[derive(Debug)]
pub struct StaticKeyCredential {
    key: String,
}

impl StaticKeyCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn from_env(var: &str) -> Result<Self> {
        let key = std::env::var(var)
            .map_err(|_| Error::Credential(format!("{var} is not set")))?;
        Ok(Self::new(key))
    }
}

#[async_trait]
impl Credential for StaticKeyCredential {
    async fn token(&self) -> Result<AuthToken> {
        Ok(AuthToken {
            bearer: self.key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_key_credential_returns_the_configured_key() {
        let cred = StaticKeyCredential::new("secret-key");
        let token = cred.token().await.unwrap();
        assert_eq!(token.bearer, "secret-key");
    }

    #[test]
    fn from_env_errors_when_unset() {
        std::env::remove_var("THREADLINE_TEST_UNSET_KEY");
        let err = StaticKeyCredential::from_env("THREADLINE_TEST_UNSET_KEY").unwrap_err();
        assert_eq!(err.code(), crate::error::kind::AUTH);
    }
}
