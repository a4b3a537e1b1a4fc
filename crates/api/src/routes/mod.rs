//! Route handlers.

pub mod checkout;
pub mod health;
pub mod inventory;
pub mod metrics;
