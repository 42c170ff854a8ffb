pub mod bookings;
pub mod catalog;
pub mod inventory;
pub mod locks;
pub mod qr;
pub mod registration;
pub mod sweeper;

pub use bookings::{BookingEngine, PaymentDetails, RefundOutcome};
pub use catalog::SeatCatalog;
pub use inventory::SeatInventory;
pub use locks::{LockManager, SeatLock};
pub use registration::{RegistrationOutcome, RegistrationService};
pub use sweeper::{ExpirySweeper, SweepReport};
