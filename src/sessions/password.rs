//! Salted password hashing, user-hash derivation and the password policy.
//!
//! Both the password hash and the user hash come from the same SHA-512 crypt
//! primitive salted with the identity's creation timestamp. The output is
//! deterministic for a given `(input, created)` pair, so neither value has to
//! be stored to be recomputed later.

use sha_crypt::{sha512_crypt_b64, Sha512Params};
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::error::SessionError;

const HASH_ROUNDS: usize = 5000;
const MIN_PASSWORD_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PasswordPolicy {
    #[error("password must be at least 10 characters long")]
    TooShort,
    #[error("password must contain an uppercase letter")]
    MissingUppercase,
    #[error("password must contain a lowercase letter")]
    MissingLowercase,
    #[error("password must contain a number")]
    MissingNumber,
    #[error("password must contain a non-alphanumeric character")]
    MissingSymbol,
}

/// SHA-512 crypt of `input` with `created` as salt, without the `$6$` prefix.
fn salted_hash(input: &str, created: i64) -> Result<String, SessionError> {
    let params =
        Sha512Params::new(HASH_ROUNDS).map_err(|e| SessionError::Hash(format!("{e:?}")))?;
    let salt = created.to_string();
    sha512_crypt_b64(input.as_bytes(), salt.as_bytes(), &params)
        .map_err(|e| SessionError::Hash(format!("{e:?}")))
}

/// Hash a password for storage or comparison against the stored value.
///
/// # Errors
/// Returns [`SessionError::Hash`] if the hash primitive fails.
pub fn hash_password(password: &str, created: i64) -> Result<String, SessionError> {
    salted_hash(password, created)
}

/// Derive the key of a user's session index.
///
/// # Errors
/// Returns [`SessionError::Hash`] if the hash primitive fails.
pub fn derive_user_hash(user_id: i64, created: i64) -> Result<String, SessionError> {
    salted_hash(&user_id.to_string(), created)
}

/// Constant-time string comparison.
///
/// When lengths differ, `actual` is compared against itself so the time spent
/// does not depend on the length of `given`.
#[must_use]
pub fn secure_compare(given: &str, actual: &str) -> bool {
    let actual = actual.as_bytes();
    let given = given.as_bytes();
    if bool::from((given.len() as u64).ct_eq(&(actual.len() as u64))) {
        bool::from(given.ct_eq(actual))
    } else {
        let _ = actual.ct_eq(actual);
        false
    }
}

fn contains(password: &str, class: fn(char) -> bool) -> bool {
    password.chars().any(class)
}

fn is_symbol(c: char) -> bool {
    !c.is_alphanumeric()
}

/// Check a new password against the policy.
///
/// # Errors
/// Returns the first rule the password breaks.
pub fn validate_password(password: &str) -> Result<(), PasswordPolicy> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordPolicy::TooShort);
    }
    if !contains(password, char::is_uppercase) {
        return Err(PasswordPolicy::MissingUppercase);
    }
    if !contains(password, char::is_lowercase) {
        return Err(PasswordPolicy::MissingLowercase);
    }
    if !contains(password, char::is_numeric) {
        return Err(PasswordPolicy::MissingNumber);
    }
    if !contains(password, is_symbol) {
        return Err(PasswordPolicy::MissingSymbol);
    }
    Ok(())
}
