//! Hold/confirm/release reservation protocol.

pub mod service;
pub mod store;
pub mod types;

pub use service::{HoldService, notified_union};
pub use store::HoldStore;
pub use types::{
    AssignmentInput, AvailabilityGroup, ConfirmReceipt, HoldReceipt, OrderAvailability,
    SimpleConfirmReceipt, compute_availability,
};
