//! HS256 JWT verification.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use super::{TokenVerifier, VerifiedIdentity, VerifyError};
use crate::domain::{Identity, Role};

/// Claims the gateway reads from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or guest id).
    pub sub: String,
    /// `guest`, `member` or `admin`.
    pub role: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issued at (unix seconds).
    #[serde(default)]
    pub iat: i64,
    /// Expiration (unix seconds).
    pub exp: i64,
}

/// Verifies tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Creates a verifier for `secret` with `leeway_secs` of clock skew.
    #[must_use]
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        // Pinning the algorithm rules out `alg` substitution.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<VerifiedIdentity, VerifyError> {
        let claims = decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                _ => VerifyError::Invalid,
            })?;

        if claims.sub.trim().is_empty() {
            return Err(VerifyError::Claims("empty subject".to_string()));
        }
        let role = claims.role.parse::<Role>().map_err(VerifyError::Claims)?;

        Ok(VerifiedIdentity {
            identity: Identity::new(claims.sub),
            role,
            display_name: claims.name,
        })
    }
}
