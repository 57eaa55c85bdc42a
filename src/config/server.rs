use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP/gRPC listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the REST listener binds to.
    #[serde(default = "default_host")]
    pub host: std::net::IpAddr,

    /// REST listener port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// gRPC listener port. Only used when built with the `grpc` feature.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Optional separate management listener (health/ready/metrics). When
    /// unset, those endpoints are served on the main listener.
    #[serde(default)]
    pub management_port: Option<u16>,

    /// Maximum accepted request body, in bytes. Attachment uploads are
    /// limited separately by `storage.max_attachment_bytes`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// TLS certificate paths; plaintext when unset.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            grpc_port: default_grpc_port(),
            management_port: None,
            max_body_bytes: default_max_body_bytes(),
            tls: None,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tls) = &self.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                return Err(ConfigError::Validation(
                    "server.tls requires both cert_path and key_path".into(),
                ));
            }
        }
        Ok(())
    }
}

/// TLS certificate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins. Empty list disables CORS headers; `["*"]` allows any
    /// origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> std::net::IpAddr {
    std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_grpc_port() -> u16 {
    9090
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}
