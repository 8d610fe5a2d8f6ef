/// Password hashing
///
/// Argon2id with PHC-string output; the salt and parameters travel inside
/// the stored hash, so changing the configured cost only affects new hashes.
use crate::error::{ServiceError, ServiceResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// One-way password hasher
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub fn new(memory_kib: u32, iterations: u32) -> ServiceResult<Self> {
        let params = Params::new(memory_kib, iterations, 1, None).map_err(|e| {
            ServiceError::Configuration(format!("Invalid password hash parameters: {}", e))
        })?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> ServiceResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Check a password against a stored hash
    ///
    /// A stored value that is not a valid PHC string is reported as an
    /// internal error, not as a mismatch.
    pub fn verify(&self, password: &str, stored_hash: &str) -> ServiceResult<bool> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| ServiceError::Internal(format!("Stored password hash is invalid: {}", e)))?;

        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(1024, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("correct horse").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash).unwrap());
        assert!(!hasher.verify("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let hasher = hasher();
        assert_ne!(hasher.hash("pw").unwrap(), hasher.hash("pw").unwrap());
    }

    #[test]
    fn test_garbage_hash_is_internal() {
        assert!(matches!(
            hasher().verify("pw", "plaintext"),
            Err(ServiceError::Internal(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(PasswordHasher::new(1, 1).is_err());
    }
}
