//! Stripe implementation of the vouch [`ProviderGateway`].
//!
//! Talks to the Stripe REST API directly over reqwest. Every transport,
//! auth, decode, or provider-side failure is normalised into
//! [`GatewayError`] — nothing from this crate ever reaches the
//! Reconciliation Engine as a panic or an unexpected error type.
//!
//! [`ProviderGateway`]: vouch_core::gateway::ProviderGateway
//! [`GatewayError`]: vouch_core::gateway::GatewayError

mod client;
mod types;

pub use client::{StripeConfig, StripeGateway};
