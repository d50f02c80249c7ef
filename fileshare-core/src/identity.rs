//! Credential resolution seam
//!
//! Accounts and sessions live in an external identity provider; the upload
//! path only asks it to turn a credential into a subject id.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::AuthConfig;
use crate::models::SubjectId;
use crate::Result;

/// Subject used for uploads without a credential when anonymous access is on
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a credential to its subject. `Ok(None)` means "not authenticated".
    async fn resolve(&self, credential: Option<&str>) -> Result<Option<SubjectId>>;
}

/// Fixed credential table, loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, SubjectId>,
    allow_anonymous: bool,
}

impl StaticIdentityProvider {
    #[must_use]
    pub fn new(tokens: HashMap<String, String>, allow_anonymous: bool) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, subject)| (token, SubjectId::from_string(subject)))
                .collect(),
            allow_anonymous,
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.clone(), config.allow_anonymous)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, credential: Option<&str>) -> Result<Option<SubjectId>> {
        match credential {
            Some(token) => Ok(self.tokens.get(token).cloned()),
            None if self.allow_anonymous => Ok(Some(SubjectId::from_string(
                ANONYMOUS_SUBJECT.to_string(),
            ))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(allow_anonymous: bool) -> StaticIdentityProvider {
        let tokens = HashMap::from([("secret".to_string(), "alice".to_string())]);
        StaticIdentityProvider::new(tokens, allow_anonymous)
    }

    #[tokio::test]
    async fn test_resolve_known_token() {
        let subject = provider(false).resolve(Some("secret")).await.unwrap();
        assert_eq!(subject.unwrap().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected_even_with_anonymous() {
        assert!(provider(true).resolve(Some("wrong")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_credential() {
        assert!(provider(false).resolve(None).await.unwrap().is_none());
        let anonymous = provider(true).resolve(None).await.unwrap().unwrap();
        assert_eq!(anonymous.as_str(), ANONYMOUS_SUBJECT);
    }
}
