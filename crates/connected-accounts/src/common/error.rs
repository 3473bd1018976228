//! Common Error Types
//!
//! Unified error handling with JSON-RPC style error code mapping.

use thiserror::Error;

use super::http::TransportError;
use crate::provider::Stage;
use crate::store::StoreError;

/// Numeric error codes (JSON-RPC custom range)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Stored-account lifecycle
    TokenNotFound = -32010,
    TokenRefreshFailed = -32011,
    ProviderNotSupported = -32013,
    ProviderDisabled = -32016,
    StorageFailure = -32017,
    AccessTokenMissing = -32018,

    // Remote calls
    RequestTokenFailed = -32020,
    AccessTokenFailed = -32021,
    ProfileFetchFailed = -32022,

    // Callback validation
    MissingVerifier = -32030,
    MissingSessionState = -32031,
    StateMismatch = -32032,
    MissingCode = -32033,

    // Identity
    UnresolvableIdentity = -32040,
    EmptyProfile = -32041,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Coarse error family, used by callers to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or HTTP failure at a remote call
    Transport,
    /// Missing verifier/code/state or a state mismatch
    Protocol,
    /// No usable identity in the provider's profile data
    Identity,
    /// Unknown or disabled provider
    Configuration,
    /// Stored-account lookups and refreshes
    Account,
    /// Storage collaborator failure
    Storage,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to fetch request token: {0}")]
    RequestToken(#[source] TransportError),

    #[error("unable to fetch access token: {0}")]
    AccessToken(#[source] TransportError),

    #[error("unable to fetch user profile: {0}")]
    ProfileFetch(#[source] TransportError),

    #[error("no oauth_verifier returned by the provider")]
    MissingVerifier,

    #[error("no handshake state stored in the session for '{0}'")]
    MissingSessionState(String),

    #[error("application state check failed")]
    StateMismatch,

    #[error("no authorization code returned by the provider")]
    MissingCode,

    #[error("could not determine uid from profile data")]
    UnresolvableIdentity,

    #[error("provider returned no usable profile data")]
    EmptyProfile,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider '{0}' is not configured")]
    ProviderDisabled(String),

    #[error("no account stored for {0}:{1}")]
    AccountNotFound(String, String),

    #[error("unable to refresh token for {0}:{1}")]
    RefreshFailed(String, String),

    #[error("account {0}:{1} has no access token")]
    MissingAccessToken(String, String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::RequestToken(_) => ErrorCode::RequestTokenFailed,
            AuthError::AccessToken(_) => ErrorCode::AccessTokenFailed,
            AuthError::ProfileFetch(_) => ErrorCode::ProfileFetchFailed,
            AuthError::MissingVerifier => ErrorCode::MissingVerifier,
            AuthError::MissingSessionState(_) => ErrorCode::MissingSessionState,
            AuthError::StateMismatch => ErrorCode::StateMismatch,
            AuthError::MissingCode => ErrorCode::MissingCode,
            AuthError::UnresolvableIdentity => ErrorCode::UnresolvableIdentity,
            AuthError::EmptyProfile => ErrorCode::EmptyProfile,
            AuthError::UnknownProvider(_) => ErrorCode::ProviderNotSupported,
            AuthError::ProviderDisabled(_) => ErrorCode::ProviderDisabled,
            AuthError::AccountNotFound(..) => ErrorCode::TokenNotFound,
            AuthError::RefreshFailed(..) => ErrorCode::TokenRefreshFailed,
            AuthError::MissingAccessToken(..) => ErrorCode::AccessTokenMissing,
            AuthError::Storage(_) => ErrorCode::StorageFailure,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::RequestToken(_) | AuthError::AccessToken(_) | AuthError::ProfileFetch(_) => {
                ErrorKind::Transport
            }
            AuthError::MissingVerifier
            | AuthError::MissingSessionState(_)
            | AuthError::StateMismatch
            | AuthError::MissingCode => ErrorKind::Protocol,
            AuthError::UnresolvableIdentity | AuthError::EmptyProfile => ErrorKind::Identity,
            AuthError::UnknownProvider(_) | AuthError::ProviderDisabled(_) => {
                ErrorKind::Configuration
            }
            AuthError::AccountNotFound(..)
            | AuthError::RefreshFailed(..)
            | AuthError::MissingAccessToken(..) => ErrorKind::Account,
            AuthError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// The last stage the handshake reached before it moved to `Failed`.
    ///
    /// `None` for errors raised outside a handshake.
    pub fn failed_at(&self) -> Option<Stage> {
        match self {
            AuthError::RequestToken(_) => Some(Stage::Start),
            AuthError::MissingVerifier
            | AuthError::MissingSessionState(_)
            | AuthError::StateMismatch
            | AuthError::MissingCode
            | AuthError::AccessToken(_) => Some(Stage::CallbackReceived),
            AuthError::ProfileFetch(_)
            | AuthError::UnresolvableIdentity
            | AuthError::EmptyProfile => Some(Stage::AccessTokenFetched),
            _ => None,
        }
    }

    /// Convert to (code, message) tuple
    pub fn to_tuple(&self) -> (i32, String) {
        (self.code().code(), self.to_string())
    }
}
