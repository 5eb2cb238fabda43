//! Ready-made BankID routes for Axum.
//!
//! Mounts the browser-facing QR flow (`start`, `qrcode`, `collect`,
//! `cancel`, `identity`) and the server-to-server `token` route, and provides
//! the [`VerifiedIdentity`] extractor for handlers that consume the minted
//! identity token.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bankid_auth::middleware::{BankIdAuthConfig, bankid_routes};
//!
//! // 1. Implement AccountDirectory for your user store
//! // 2. Configure from environment
//! let config = BankIdAuthConfig::from_env()?;
//!
//! // 3. Mount the routes
//! let app = axum::Router::new().merge(bankid_routes(config, accounts));
//!
//! // 4. Take `VerifiedIdentity` in your login/signup handlers
//! async fn signup(identity: VerifiedIdentity) -> impl IntoResponse { /* ... */ }
//! ```

mod config;
mod error;
mod extractor;
mod render;
mod routes;
mod state;
mod types;

pub use config::BankIdAuthConfig;
pub use error::AuthError;
pub use extractor::VerifiedIdentity;
pub use routes::bankid_routes;
