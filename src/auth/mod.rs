//! Credential verification.
//!
//! The gateway never issues tokens; it only checks the bearer credentials
//! clients hand it. [`TokenVerifier`] is the seam, [`JwtVerifier`] the
//! HS256 implementation used in production.

pub mod jwt;

use crate::domain::{Identity, Role};

pub use jwt::{Claims, JwtVerifier};

/// Identity and role asserted by a valid credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Subject of the credential.
    pub identity: Identity,
    /// Role claim.
    pub role: Role,
    /// Optional display name claim.
    pub display_name: Option<String>,
}

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Signature valid but past its expiry.
    #[error("token has expired")]
    Expired,
    /// Malformed, tampered, or signed with another key.
    #[error("invalid token")]
    Invalid,
    /// Well-formed token with claims the gateway cannot use.
    #[error("unusable claims: {0}")]
    Claims(String),
}

/// Validates opaque bearer credentials.
pub trait TokenVerifier: Send + Sync + std::fmt::Debug {
    /// Verifies a credential and returns the identity it asserts.
    ///
    /// # Errors
    ///
    /// Returns a [`VerifyError`] describing why the credential was rejected.
    fn verify(&self, credential: &str) -> Result<VerifiedIdentity, VerifyError>;
}
