//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: token pair and user profile storage, with in-memory,
//!   JSON file and OS keychain backends
//! - `HttpSessionService`: login, token refresh and logout against the
//!   back-office auth endpoints
//!
//! Tokens carry no local expiry; an expired token is discovered from a 401.

pub mod credentials;
pub mod keychain;
pub mod session;

pub use credentials::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredSession, TokenPair,
    UserProfile,
};
pub use keychain::KeyringCredentialStore;
pub use session::{HttpSessionService, SessionEndpoints, SessionService, SessionState};
