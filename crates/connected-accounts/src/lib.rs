//! Connected accounts: OAuth 1.0a / OAuth 2.0 account linking.
//!
//! A [`ProviderRegistry`] of data-only provider profiles, one
//! [`Handshake`](provider::Handshake) per OAuth generation, and an
//! [`AccountBroker`] that turns provider callbacks into stored, refreshable
//! [`AccountRecord`]s.

pub mod account;
pub mod broker;
pub mod common;
pub mod config;
pub mod provider;
pub mod registry;
pub mod session;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

pub use account::{AccountFields, AccountRecord, AccountResolver, AccountUpdate};
pub use broker::AccountBroker;
pub use common::{AuthError, AuthResult, ErrorCode, ErrorKind, HttpClient, ReqwestHttpClient};
pub use config::{Config, ConfigError, ProviderConfig};
pub use provider::{CallbackRequest, Protocol, ProviderProfile};
pub use registry::{ProviderChoice, ProviderRegistry};
pub use session::{MemorySession, SessionStore};
pub use store::{AccountInfo, AccountStore, EncryptedFileStore, MemoryAccountStore, StoreError};
pub use token::ParsedToken;
