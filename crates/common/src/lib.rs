//! Shared types for the checkout platform.

pub mod clock;
pub mod ids;
pub mod money;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{OrderId, PaymentId, ProductId, ReservationId, SessionId, UserId, VariantId};
pub use money::{Currency, Money};
