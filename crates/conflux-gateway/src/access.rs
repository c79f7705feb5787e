//! Bearer credential checks.
//!
//! Tokens are read from the token repository on every check; issuing and
//! revoking them is the store's business.

use std::sync::Arc;

use chrono::Utc;

use conflux_core::ports::{GatewayError, TokenRepository};
use conflux_core::Token;

use crate::config::ANONYMOUS_CLIENT;

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No credential, and the gateway does not require one.
    Anonymous,
    /// A valid, unexpired token.
    Token(Token),
}

impl Principal {
    pub fn client_id(&self) -> &str {
        match self {
            Self::Anonymous => ANONYMOUS_CLIENT,
            Self::Token(token) => &token.client_id,
        }
    }

    /// Whether this principal may reach `server_id`.
    pub fn allows(&self, server_id: &str) -> bool {
        match self {
            Self::Anonymous => true,
            Self::Token(token) => token.allows_server(server_id),
        }
    }
}

/// Answers "can client X call server Y".
pub struct AccessController {
    tokens: Arc<dyn TokenRepository>,
    require_auth: bool,
}

impl AccessController {
    pub fn new(tokens: Arc<dyn TokenRepository>, require_auth: bool) -> Self {
        Self {
            tokens,
            require_auth,
        }
    }

    /// Look up a token. Unknown and expired tokens are `None`.
    pub async fn validate(&self, token_id: &str) -> Result<Option<Token>, GatewayError> {
        let token = self.tokens.get_token(token_id).await?;
        Ok(token.filter(|t| !t.is_expired_at(Utc::now())))
    }

    /// Whether `token_id` is valid and grants `server_id`.
    pub async fn has_access(&self, token_id: &str, server_id: &str) -> bool {
        match self.validate(token_id).await {
            Ok(Some(token)) => token.allows_server(server_id),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Token lookup failed");
                false
            }
        }
    }

    /// Resolve the caller.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` if a credential is required but absent, or if
    /// the supplied credential is unknown or expired.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Principal, GatewayError> {
        match token {
            None if self.require_auth => Err(GatewayError::Unauthenticated(
                "credential required".to_string(),
            )),
            None => Ok(Principal::Anonymous),
            Some(token_id) => self
                .validate(token_id)
                .await?
                .map(Principal::Token)
                .ok_or_else(|| {
                    GatewayError::Unauthenticated("unknown or expired credential".to_string())
                }),
        }
    }

    /// Authorize a call to `server_id`, returning the client id.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` as for [`Self::authenticate`]; `Forbidden` if the
    /// token is not scoped to `server_id`.
    pub async fn authorize(
        &self,
        token: Option<&str>,
        server_id: &str,
    ) -> Result<String, GatewayError> {
        let principal = self.authenticate(token).await?;
        if !principal.allows(server_id) {
            tracing::debug!(
                client_id = principal.client_id(),
                server_id,
                "Access denied"
            );
            return Err(GatewayError::Forbidden(format!(
                "client {} may not access server {server_id}",
                principal.client_id()
            )));
        }
        Ok(principal.client_id().to_string())
    }

    /// Principal for filtering a discovery pass. `None` means the caller
    /// sees nothing; discovery never fails on credentials.
    pub async fn discovery_principal(&self, token: Option<&str>) -> Option<Principal> {
        match self.authenticate(token).await {
            Ok(principal) => Some(principal),
            Err(e) => {
                tracing::debug!(error = %e, "Discovery credential rejected, listing nothing");
                None
            }
        }
    }
}
