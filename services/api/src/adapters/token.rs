//! services/api/src/adapters/token.rs
//!
//! Verifies HS256 bearer tokens issued by the auth provider and turns their
//! claims into a domain `Identity`.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use voter_guide_core::domain::Identity;
use voter_guide_core::ports::{IdentityVerifier, PortError, PortResult};

/// Token payload as issued by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Custom claim set on provisioned administrators.
    #[serde(default)]
    pub admin: bool,
    pub exp: u64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            uid: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
            admin: claims.admin,
        }
    }
}

pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl IdentityVerifier for JwtIdentityVerifier {
    fn verify(&self, token: &str) -> PortResult<Identity> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            PortError::Unauthorized
        })?;
        if data.claims.sub.is_empty() {
            return Err(PortError::Unauthorized);
        }
        Ok(data.claims.into())
    }
}
