//! Webhook authentication.

pub mod signature;
