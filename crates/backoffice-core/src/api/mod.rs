//! REST API client module for the back-office service.
//!
//! This module provides the owned request/response types, the `Transport`
//! seam that the authenticating gateway plugs into, the reqwest-backed
//! `HttpTransport`, and the typed JSON `ApiClient`.
//!
//! The API uses JWT bearer token authentication with refresh tokens issued
//! by the `/auth` endpoints.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, RetryPolicy};
pub use error::{HttpError, HttpErrorKind};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
