//! Session token minting.
//!
//! A token is an HS256 JWT whose claims carry the user, the roles and a
//! random nonce. The nonce makes two logins in the same second produce
//! different tokens; the token is otherwise opaque to the session stores.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::MIN_NONCE_LENGTH;
use super::error::SessionError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: i64,
    pub roles: BTreeMap<String, String>,
    pub iat: i64,
    pub rs: String,
}

pub trait TokenSigner: Send + Sync {
    /// # Errors
    /// Returns [`SessionError::Token`] if encoding fails.
    fn sign(&self, claims: &SessionClaims) -> Result<String, SessionError>;

    /// # Errors
    /// Returns [`SessionError::Token`] on a bad signature or malformed token.
    fn verify(&self, token: &str) -> Result<SessionClaims, SessionError>;
}

#[derive(Clone)]
pub struct Hs256Signer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Hs256Signer {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();

        // Tokens carry no exp; lifetime is the session record's TTL.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenSigner for Hs256Signer {
    fn sign(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        Ok(decode::<SessionClaims>(token, &self.decoding, &self.validation)?.claims)
    }
}

/// Random alphanumeric string from the OS CSPRNG, never shorter than
/// [`MIN_NONCE_LENGTH`].
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length.max(MIN_NONCE_LENGTH))
        .map(char::from)
        .collect()
}
