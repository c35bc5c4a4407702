//! haulnet - Trucking-marketplace dispatch core
//!
//! A customer publishes an Order with heterogeneous truck demand; the engine
//! explodes it into individually reservable units, fans the demand out to
//! matching online transporters, and runs the hold/confirm/release protocol
//! that turns taps into race-free assignments.
//!
//! # Modules
//!
//! - [`core_types`] - Id newtypes and shared aliases
//! - [`config`] - Engine knobs + app settings (YAML)
//! - [`models`] - Entities and status machines
//! - [`error`] - Error taxonomy with stable wire codes
//! - [`store`] - Abstract persistent state (CAS rows) + memory impl
//! - [`cache`] - TTL cache (SETNX, sets, counters) + memory impl
//! - [`lock`] - Named locks with owner tokens
//! - [`events`] - Connection registry, event bus, push outbox, ws endpoint
//! - [`match_index`] - (type, subtype) -> online transporters
//! - [`scheduler`] - Cancellable timers and periodic jobs
//! - [`order`] - Order lifecycle and broadcast fan-out
//! - [`hold`] - Hold/confirm/release reservation protocol
//! - [`route`] - Trip route progression
//! - [`engine`] - The wired engine value
//! - [`gateway`] - HTTP + WebSocket delivery edge

pub mod cache;
pub mod config;
pub mod core_types;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod hold;
pub mod lock;
pub mod logging;
pub mod match_index;
pub mod models;
pub mod order;
pub mod route;
pub mod scheduler;
pub mod store;

// Convenient re-exports at crate root
pub use config::{AppConfig, EngineConfig, ServiceConfig};
pub use core_types::{
    AssignmentId, HoldId, OrderId, TimestampMs, TripId, TruckRequestId, UserId, VehicleId,
    VehicleKey, now_ms,
};
pub use engine::DispatchEngine;
pub use error::{DispatchError, DispatchResult};
pub use models::{
    Assignment, AssignmentStatus, Hold, HoldStatus, Location, Order, OrderStatus, Role,
    RoutePoint, RoutePointKind, StopWaitTimer, TruckRequest, TruckRequestStatus, User, Vehicle,
    VehicleStatus,
};
