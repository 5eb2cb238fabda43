#![doc = include_str!("../README.md")]

#[cfg(feature = "client")]
pub mod client;
pub mod error;
pub mod identity;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod orchestrator;
pub mod personal_number;
pub mod provider;
pub mod qr;
mod session;
pub mod token;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
#[cfg(feature = "client")]
pub use client::{BankIdClient, ProviderConfig};
pub use error::{Error, TokenError};
pub use identity::{AccountDirectory, IdentityAssertion, IdentityBridge, IdentityClaims};
pub use orchestrator::{Orchestrator, OrderStatus, QrState, StartedOrder};
pub use personal_number::PersonalNumber;
pub use provider::{PollPolicy, Provider, try_authenticate};
pub use token::{SigningMethod, TokenKey, TokenService};
pub use types::{AuthRequest, CollectResponse, CollectStatus, HintCode, OrderRef};
