use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::error::{AppError, Result};

/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;

/// Hashes and verifies passwords with Argon2id.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Verified against when the email is unknown, so both sign-in failures cost the same.
    dummy_hash: String,
}

impl PasswordHasher {
    /// Creates a hasher with the given memory cost in KiB.
    pub fn new(memory_kib: u32) -> Result<Self> {
        let params = ParamsBuilder::new()
            .m_cost(memory_kib)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Config(format!("Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut hasher = Self {
            argon2,
            dummy_hash: String::new(),
        };
        hasher.dummy_hash = hasher.hash("dummy-password-for-timing")?;
        Ok(hasher)
    }

    /// Hashes a password into a PHC string.
    pub fn hash(&self, password: &str) -> Result<String> {
        let mut password_bytes = password.as_bytes().to_vec();

        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::Internal(format!("Salt encoding error: {}", e)))?;

        let password_hash = self
            .argon2
            .hash_password(&password_bytes, &salt)
            .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
            .to_string();

        password_bytes.zeroize();
        Ok(password_hash)
    }

    /// Verifies a password against a stored PHC string.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let mut password_bytes = password.as_bytes().to_vec();
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;

        let result = match self.argon2.verify_password(&password_bytes, &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Internal(format!("Argon2 verify error: {}", e))),
        };

        password_bytes.zeroize();
        result
    }

    /// Burns one verification for an unknown account.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash);
    }
}
