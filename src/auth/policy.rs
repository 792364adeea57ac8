//! Password policy evaluation
//!
//! Pure function of the candidate password and the configured policy.

use crate::config::PasswordPolicyConfig;
use serde::Serialize;

/// Characters counted as "special"
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "123456789",
    "qwerty",
    "admin",
    "letmein",
    "welcome",
    "iloveyou",
    "monkey",
    "abc123",
    "password1",
    "password123",
    "passw0rd",
    "qwerty123",
];

/// Length that earns an extra strength point
const LONG_PASSWORD_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

impl PasswordStrength {
    fn from_score(score: u8) -> Self {
        match score {
            0..=2 => PasswordStrength::Weak,
            3..=4 => PasswordStrength::Medium,
            _ => PasswordStrength::Strong,
        }
    }
}

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub score: u8,
    pub strength: PasswordStrength,
}

/// Evaluate a password against the policy
pub fn validate_password_policy(password: &str, policy: &PasswordPolicyConfig) -> PolicyReport {
    let mut errors = Vec::new();
    let mut score: u8 = 0;
    let length = password.chars().count();

    if length < policy.min_length {
        errors.push(format!(
            "Password must be at least {} characters",
            policy.min_length
        ));
    } else {
        score += 1;
    }

    if length >= LONG_PASSWORD_LENGTH {
        score += 1;
    }

    let classes = [
        (
            password.chars().any(|c| c.is_uppercase()),
            policy.require_uppercase,
            "Password must contain at least one uppercase letter",
        ),
        (
            password.chars().any(|c| c.is_lowercase()),
            policy.require_lowercase,
            "Password must contain at least one lowercase letter",
        ),
        (
            password.chars().any(|c| c.is_ascii_digit()),
            policy.require_digit,
            "Password must contain at least one digit",
        ),
        (
            password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)),
            policy.require_special,
            "Password must contain at least one special character",
        ),
    ];

    for (present, required, message) in classes {
        if present {
            score += 1;
        } else if required {
            errors.push(message.to_string());
        }
    }

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        errors.push("Password is too common".to_string());
        score = 0;
    }

    PolicyReport {
        valid: errors.is_empty(),
        errors,
        score,
        strength: PasswordStrength::from_score(score),
    }
}
