//! Password hashing and verification
//!
//! New hashes are always Argon2id. Records written by the previous
//! generation (PBKDF2-HMAC-SHA256, `<salt>$<hex digest>`) still verify, and a
//! successful legacy verification reports `needs_rehash` so the caller can
//! migrate the record lazily.

use crate::{config::HashingConfig, error::AppError};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

/// PBKDF2 rounds used by the legacy scheme
pub const LEGACY_PBKDF2_ROUNDS: u32 = 100_000;

const LEGACY_DIGEST_LEN: usize = 32;
const ARGON2ID_PREFIX: &str = "$argon2id$";

/// Tag identifying a stored hash format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Argon2id,
    LegacyPbkdf2Sha256,
}

impl HashScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashScheme::Argon2id => "argon2id",
            HashScheme::LegacyPbkdf2Sha256 => "pbkdf2_sha256",
        }
    }
}

/// A parsed stored password hash.
///
/// The set of supported formats is closed: anything that does not parse into
/// one of these variants fails verification.
#[derive(Clone, PartialEq, Eq)]
pub enum HashRecord {
    /// PHC string, parameters embedded
    Argon2id(String),
    /// Hex salt (its ASCII bytes are the PBKDF2 salt) and raw digest
    LegacyPbkdf2 { salt: String, digest: Vec<u8> },
}

impl HashRecord {
    /// Parse a stored hash string. Returns `None` for anything malformed.
    pub fn parse(stored: &str) -> Option<Self> {
        if stored.starts_with(ARGON2ID_PREFIX) {
            return PasswordHash::new(stored)
                .ok()
                .map(|_| HashRecord::Argon2id(stored.to_string()));
        }

        let (salt, digest_hex) = stored.split_once('$')?;
        if salt.is_empty() || digest_hex.contains('$') {
            return None;
        }

        let digest = hex::decode(digest_hex).ok()?;
        if digest.len() != LEGACY_DIGEST_LEN {
            return None;
        }

        Some(HashRecord::LegacyPbkdf2 {
            salt: salt.to_string(),
            digest,
        })
    }

    /// Encode for storage
    pub fn encode(&self) -> String {
        match self {
            HashRecord::Argon2id(phc) => phc.clone(),
            HashRecord::LegacyPbkdf2 { salt, digest } => format!("{}${}", salt, hex::encode(digest)),
        }
    }

    pub fn scheme(&self) -> HashScheme {
        match self {
            HashRecord::Argon2id(_) => HashScheme::Argon2id,
            HashRecord::LegacyPbkdf2 { .. } => HashScheme::LegacyPbkdf2Sha256,
        }
    }
}

impl fmt::Debug for HashRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRecord")
            .field("scheme", &self.scheme().as_str())
            .finish_non_exhaustive()
    }
}

/// Result of verifying a secret against a stored hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// `needs_rehash` is set when the record is not in the current format
    /// or was produced with different Argon2 parameters.
    Valid { needs_rehash: bool },
    Invalid,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }

    pub fn needs_rehash(&self) -> bool {
        matches!(self, Verification::Valid { needs_rehash: true })
    }
}

/// Password hasher with configurable parameters
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    params: HashingConfig,
    /// Verified against when the identifier is unknown
    decoy: String,
}

impl PasswordHasher {
    /// Create hasher with the given Argon2id parameters
    pub fn new(params: HashingConfig) -> Result<Self, AppError> {
        let argon2_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| AppError::Config(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

        let salt = SaltString::generate(&mut OsRng);
        let decoy = argon2
            .hash_password(b"gatekeeper-decoy-secret", &salt)
            .map_err(|e| AppError::Internal(format!("Failed to prepare decoy hash: {}", e)))?
            .to_string();

        Ok(Self {
            argon2,
            params,
            decoy,
        })
    }

    pub fn params(&self) -> HashingConfig {
        self.params
    }

    /// Hash a password in the current format
    pub fn hash(&self, password: &str) -> Result<HashRecord, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash password: {:?}", e);
                AppError::Internal(format!("Failed to hash password: {}", e))
            })?
            .to_string();

        Ok(HashRecord::Argon2id(password_hash))
    }

    /// Hash a password in the legacy format.
    ///
    /// Only for producing fixtures that model records written before the
    /// migration; production code never writes this format.
    pub fn hash_legacy(password: &str) -> HashRecord {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = hex::encode(salt_bytes);

        HashRecord::LegacyPbkdf2 {
            digest: legacy_digest(password, &salt).to_vec(),
            salt,
        }
    }

    /// Verify a password against a stored hash string.
    ///
    /// Malformed records are treated as a failed verification.
    pub fn verify(&self, password: &str, stored: &str) -> Verification {
        match HashRecord::parse(stored) {
            Some(record) => self.verify_record(password, &record),
            None => {
                tracing::debug!("Stored password hash could not be parsed");
                Verification::Invalid
            }
        }
    }

    /// Verify a password against a parsed record
    pub fn verify_record(&self, password: &str, record: &HashRecord) -> Verification {
        match record {
            HashRecord::Argon2id(phc) => {
                let parsed = match PasswordHash::new(phc) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::debug!("Failed to parse password hash: {:?}", e);
                        return Verification::Invalid;
                    }
                };

                if self
                    .argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_err()
                {
                    return Verification::Invalid;
                }

                Verification::Valid {
                    needs_rehash: !self.matches_current_params(&parsed),
                }
            }
            HashRecord::LegacyPbkdf2 { salt, digest } => {
                let computed = legacy_digest(password, salt);
                if bool::from(computed.as_slice().ct_eq(digest.as_slice())) {
                    Verification::Valid { needs_rehash: true }
                } else {
                    Verification::Invalid
                }
            }
        }
    }

    /// Spend one verification's worth of work so that an unknown identifier
    /// is not distinguishable from a wrong password by timing.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.decoy);
    }

    fn matches_current_params(&self, hash: &PasswordHash<'_>) -> bool {
        match Params::try_from(hash) {
            Ok(stored) => {
                hash.version == Some(Version::V0x13 as u32)
                    && stored.m_cost() == self.params.memory_kib
                    && stored.t_cost() == self.params.iterations
                    && stored.p_cost() == self.params.parallelism
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

fn legacy_digest(password: &str, salt: &str) -> [u8; LEGACY_DIGEST_LEN] {
    let mut out = [0u8; LEGACY_DIGEST_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), LEGACY_PBKDF2_ROUNDS, &mut out);
    out
}
