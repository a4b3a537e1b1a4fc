//! Payments and the idempotency guard in front of the gateway.

pub mod error;
pub mod events;
pub mod gateway;
pub mod guard;
pub mod postgres;
pub mod repository;
pub mod types;

pub use error::{PaymentError, Result};
pub use events::{PaymentFailed, PaymentRefunded, PaymentSucceeded};
pub use gateway::{GatewayError, GatewayOutcome, InMemoryGateway, PaymentGateway};
pub use guard::PaymentGuard;
pub use postgres::PostgresPaymentRepository;
pub use repository::{Expected, InMemoryPaymentRepository, PaymentRepository};
pub use types::{ChargeRequest, Payment, PaymentMethod, PaymentStatus};
