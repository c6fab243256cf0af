//! Core library for the restaurant back-office client.
//!
//! - [`gateway`]: bearer attachment and single-flight token refresh
//! - [`auth`]: credential stores and the session service
//! - [`api`]: transport seam, HTTP transport, typed JSON client
//! - [`config`]: configuration loading

pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;

pub use api::{ApiClient, ApiRequest, ApiResponse, HttpError, HttpErrorKind, Transport};
pub use auth::{CredentialStore, HttpSessionService, SessionService, SessionState};
pub use config::Config;
pub use gateway::{AuthGateway, Authenticated, GatewayConfig, Navigator};
