//! Authentication core: hashing, tokens, throttling and lockout

pub mod audit;
pub mod jwt;
pub mod lockout;
pub mod middleware;
pub mod password;
pub mod policy;
pub mod rate_limit;
pub mod revocation;
pub mod store;

pub use audit::{AuditSink, MemoryAuditSink, SecurityEvent, SecurityEventType, TracingAuditSink};
pub use jwt::{Claims, JwtService, TokenPair, TokenRejection, TokenType};
pub use lockout::{LockoutState, LockoutTracker};
pub use middleware::{extract_token, jwt_auth_middleware, AuthContext};
pub use password::{HashRecord, HashScheme, PasswordHasher, Verification};
pub use policy::{validate_password_policy, PasswordStrength, PolicyReport};
pub use rate_limit::{RateLimiter, RateLimiterStats};
pub use revocation::RevocationList;
pub use store::{CredentialRecord, InMemoryUserStore, StoreError, UserStore};
