use async_trait::async_trait;
use thiserror::Error;

use crate::config::TokenResolverConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Resolves a bearer token to a user id.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<String, AuthError>;
}

/// Passthrough resolver: the token is the user id.
pub struct PassthroughResolver;

#[async_trait]
impl TokenResolver for PassthroughResolver {
    async fn resolve(&self, token: &str) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(token.to_string())
    }
}

/// OIDC JWT resolver: validates signature, issuer, audience, and expiry,
/// and returns the `sub` claim.
#[cfg(feature = "jwt")]
pub struct OidcResolver {
    issuer: String,
    audience: Option<String>,
    decoding_key: jsonwebtoken::DecodingKey,
    algorithm: jsonwebtoken::Algorithm,
}

#[cfg(feature = "jwt")]
impl OidcResolver {
    pub fn new(config: &crate::config::OidcConfig) -> Result<Self, AuthError> {
        let (decoding_key, algorithm) = if let Some(pem) = &config.public_key_pem {
            (
                jsonwebtoken::DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::InvalidToken(format!("bad public key: {e}")))?,
                jsonwebtoken::Algorithm::RS256,
            )
        } else if let Some(secret) = &config.hs256_secret {
            (
                jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
                jsonwebtoken::Algorithm::HS256,
            )
        } else {
            return Err(AuthError::InvalidToken(
                "oidc resolver requires a key".to_string(),
            ));
        };

        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            decoding_key,
            algorithm,
        })
    }
}

#[cfg(feature = "jwt")]
#[derive(serde::Deserialize)]
struct Claims {
    sub: String,
}

#[cfg(feature = "jwt")]
#[async_trait]
impl TokenResolver for OidcResolver {
    async fn resolve(&self, token: &str) -> Result<String, AuthError> {
        let mut validation = jsonwebtoken::Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims.sub)
    }
}

/// Build a resolver from configuration.
pub fn create_resolver(
    config: &TokenResolverConfig,
) -> Result<std::sync::Arc<dyn TokenResolver>, AuthError> {
    match config {
        TokenResolverConfig::Passthrough => Ok(std::sync::Arc::new(PassthroughResolver)),
        #[cfg(feature = "jwt")]
        TokenResolverConfig::Oidc(oidc) => Ok(std::sync::Arc::new(OidcResolver::new(oidc)?)),
        #[cfg(not(feature = "jwt"))]
        TokenResolverConfig::Oidc(_) => Err(AuthError::InvalidToken(
            "oidc mode requires the 'jwt' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_returns_token_as_user() {
        let resolver = PassthroughResolver;
        assert_eq!(resolver.resolve("alice").await.unwrap(), "alice");
        assert!(matches!(
            resolver.resolve("").await,
            Err(AuthError::MissingToken)
        ));
    }

    #[cfg(feature = "jwt")]
    #[tokio::test]
    async fn oidc_hs256_round_trip() {
        let config = crate::config::OidcConfig {
            issuer: "https://issuer.test".into(),
            audience: Some("mnemo".into()),
            public_key_pem: None,
            hs256_secret: Some("test-secret".into()),
        };
        let resolver = OidcResolver::new(&config).unwrap();

        #[derive(serde::Serialize)]
        struct TestClaims<'a> {
            sub: &'a str,
            iss: &'a str,
            aud: &'a str,
            exp: i64,
        }
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &TestClaims {
                sub: "alice",
                iss: "https://issuer.test",
                aud: "mnemo",
                exp: chrono::Utc::now().timestamp() + 3600,
            },
            &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert_eq!(resolver.resolve(&token).await.unwrap(), "alice");
        assert!(resolver.resolve("not-a-jwt").await.is_err());
    }
}
