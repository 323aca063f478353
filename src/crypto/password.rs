use crate::error::{Error, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
    Argon2, Params, Version,
};

const MIN_PASSWORD_LEN: usize = 12;
const MAX_PASSWORD_LEN: usize = 72;

/// Hash a password with a memory-hard, cost-parameterized hash (4.A).
///
/// `cost` is the Argon2 memory cost in KiB. Rejects passwords shorter than
/// 12 bytes or longer than 72 bytes before ever touching the hasher.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} bytes"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must be at most {MAX_PASSWORD_LEN} bytes"
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    let params = Params::new(cost, Params::DEFAULT_T_COST, Params::DEFAULT_P_COST, None)
        .map_err(|e| Error::Cryptographic(format!("invalid argon2 params: {e}")))?;
    let hasher = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let hash = hasher
        .hash_password(password.as_bytes(), &salt)
        .map_err(Error::from)?;

    Ok(hash.to_string())
}

/// Verify a password against a stored hash in constant time.
pub fn check_password(password: &str, hash: &str) -> Result<()> {
    let parsed = PasswordHash::new(hash).map_err(Error::from)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::Authentication("invalid password".to_string()))
}
