use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Bearer-token resolution mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TokenResolverConfig {
    /// The bearer token *is* the user id. Test and API-key deployments.
    #[default]
    Passthrough,

    /// Validate the bearer token as an OIDC JWT; the subject claim becomes
    /// the user id. Requires the `jwt` feature.
    Oidc(OidcConfig),
}

/// OIDC JWT validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OidcConfig {
    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `aud` claim; skipped when unset.
    #[serde(default)]
    pub audience: Option<String>,

    /// RSA public key (PEM) for RS256 tokens.
    #[serde(default)]
    pub public_key_pem: Option<String>,

    /// Shared secret for HS256 tokens. Test setups only.
    #[serde(default)]
    pub hs256_secret: Option<String>,
}

/// Authentication and role configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: TokenResolverConfig,

    /// Users allowed on `/v1/admin` endpoints and admin query paths.
    #[serde(default)]
    pub admin_users: Vec<String>,

    /// Users with read-only access to everything.
    #[serde(default)]
    pub auditor_users: Vec<String>,

    /// Client ids (agents) allowed to write the transcript channel.
    #[serde(default)]
    pub indexer_clients: Vec<String>,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let TokenResolverConfig::Oidc(oidc) = &self.token {
            if oidc.public_key_pem.is_none() && oidc.hs256_secret.is_none() {
                return Err(ConfigError::Validation(
                    "auth.token oidc mode requires public_key_pem or hs256_secret".into(),
                ));
            }
            #[cfg(not(feature = "jwt"))]
            return Err(ConfigError::Validation(
                "auth.token oidc mode requires the 'jwt' feature. \
                 Rebuild with: cargo build --features jwt"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.iter().any(|u| u == user_id)
    }

    pub fn is_auditor(&self, user_id: &str) -> bool {
        self.auditor_users.iter().any(|u| u == user_id)
    }

    pub fn is_indexer(&self, client_id: &str) -> bool {
        self.indexer_clients.iter().any(|c| c == client_id)
    }
}
