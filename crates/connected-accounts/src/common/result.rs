//! Common Result Type

use super::error::AuthError;

/// Result type for handshake, refresh and stored-account operations
pub type AuthResult<T> = Result<T, AuthError>;
