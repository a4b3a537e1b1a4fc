//! Stock levels and reservations.
//!
//! [`ReservationManager`] never oversells: the availability check and the
//! reserved increment are one atomic store operation, in memory
//! ([`InMemoryStockStore`]) as well as in PostgreSQL ([`PostgresStockStore`]).

pub mod error;
pub mod events;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use error::{InventoryError, Result};
pub use events::{InventoryReleased, InventoryReserved};
pub use manager::{DEFAULT_RESERVATION_TTL_SECS, ReservationManager};
pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use store::StockStore;
pub use types::{
    AdjustmentReason, ReleaseReason, ReservationStatus, ReserveRequest, Stock, StockAdjustment,
    StockReservation, Transition,
};
