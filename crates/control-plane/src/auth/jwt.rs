// JWT token service for authentication
// Decision: Use HS256 algorithm for simplicity (symmetric key shared with the campaign platform)
// Decision: Administrators carry the "admin" role claim

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::JwtConfig;

pub const ADMIN_ROLE: &str = "admin";

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// User roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// Token type
    pub token_type: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl AccessTokenClaims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }
}

/// JWT service for token generation and validation
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Generate access token for a user
    pub fn generate_access_token(&self, user_id: Uuid, roles: &[String]) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::from_std(self.config.access_token_lifetime)?;

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            roles: roles.to_vec(),
            token_type: "access".to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to encode access token")
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .context("Invalid access token")?;

        if token_data.claims.token_type != "access" {
            anyhow::bail!("Invalid token type");
        }

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            access_token_lifetime: StdDuration::from_secs(900),
        }
    }

    #[test]
    fn test_generate_access_token() {
        let service = JwtService::new(test_config());
        let user_id = Uuid::now_v7();
        let token = service
            .generate_access_token(user_id, &["user".to_string()])
            .unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.token_type, "access");
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_admin_role() {
        let service = JwtService::new(test_config());
        let token = service
            .generate_access_token(Uuid::nil(), &[ADMIN_ROLE.to_string()])
            .unwrap();
        assert!(service.validate_access_token(&token).unwrap().is_admin());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let service = JwtService::new(test_config());
        let token = service.generate_access_token(Uuid::nil(), &[]).unwrap();

        let other = JwtService::new(JwtConfig {
            secret: "another-secret".to_string(),
            ..test_config()
        });
        assert!(other.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = JwtService::new(test_config());
        let claims = AccessTokenClaims {
            sub: Uuid::nil().to_string(),
            roles: vec![],
            token_type: "access".to_string(),
            exp: Utc::now().timestamp() - 3600,
            iat: Utc::now().timestamp() - 7200,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-testing"),
        )
        .unwrap();

        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_refresh_token_type_rejected() {
        let service = JwtService::new(test_config());
        let claims = AccessTokenClaims {
            sub: Uuid::nil().to_string(),
            roles: vec![],
            token_type: "refresh".to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-testing"),
        )
        .unwrap();

        assert!(service.validate_access_token(&token).is_err());
    }
}
