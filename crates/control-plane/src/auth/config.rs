// Authentication configuration loaded from environment variables.
// Decision: AUTH_ prefix for all auth config
// Decision: Default to "none" mode for local development

use std::time::Duration;

/// Authentication mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// No authentication required (local development)
    #[default]
    None,
    /// Bearer JWTs issued by the campaign platform
    Jwt,
}

impl AuthMode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "jwt" => AuthMode::Jwt,
            _ => AuthMode::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Jwt => "jwt",
        }
    }
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for signing and verifying JWTs
    pub secret: String,
    /// Access token lifetime
    pub access_token_lifetime: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_token_lifetime: Duration::from_secs(15 * 60), // 15 minutes
        }
    }
}

/// Complete authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub jwt: JwtConfig,
}

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// - `AUTH_MODE`: `none` (default) or `jwt`
    /// - `AUTH_JWT_SECRET`: HS256 signing secret
    /// - `AUTH_JWT_ACCESS_TOKEN_LIFETIME`: seconds (default: 900)
    pub fn from_env() -> Self {
        let mode = std::env::var("AUTH_MODE")
            .map(|s| AuthMode::from_str(&s))
            .unwrap_or_default();

        let secret = std::env::var("AUTH_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                if mode == AuthMode::None {
                    // Random secret for dev mode; tokens are never checked anyway
                    use rand::Rng;
                    let bytes: [u8; 32] = rand::thread_rng().gen();
                    hex::encode(bytes)
                } else {
                    tracing::warn!("AUTH_JWT_SECRET not set, using insecure default");
                    "insecure-dev-secret-change-me".to_string()
                }
            });

        let access_token_lifetime = std::env::var("AUTH_JWT_ACCESS_TOKEN_LIFETIME")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| JwtConfig::default().access_token_lifetime);

        Self {
            mode,
            jwt: JwtConfig {
                secret,
                access_token_lifetime,
            },
        }
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.mode != AuthMode::None
    }
}
