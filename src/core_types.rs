//! Core identifier types shared across the dispatch engine.
//!
//! Entity ids are ULID-backed newtypes: monotonic, sortable, and mintable
//! without coordination. Trip and assignment ids are minted fresh at confirm
//! time and use UUIDv4. User ids are plain `u64` handed to us by the identity
//! layer upstream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User identifier (customer, transporter or driver), resolved upstream.
pub type UserId = u64;

/// Millisecond unix timestamp, the engine-wide time representation.
pub type TimestampMs = i64;

/// Current wall-clock time in milliseconds.
#[inline]
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Mint a new unique id.
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value.
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id! {
    /// Parent order id.
    OrderId
}

ulid_id! {
    /// One physical truck unit of an order.
    TruckRequestId
}

ulid_id! {
    /// Short-lived reservation id.
    HoldId
}

ulid_id! {
    /// Fleet vehicle id.
    VehicleId
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Mint a new unique id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::from_str(s)?))
            }
        }
    };
}

uuid_id! {
    /// Trip id, minted at confirm time.
    TripId
}

uuid_id! {
    /// Assignment id, minted at confirm time.
    AssignmentId
}

/// Matching key for broadcast fan-out: (vehicle type, vehicle subtype).
///
/// Matching is by declared type only; there is no geospatial component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleKey {
    pub vehicle_type: String,
    pub vehicle_subtype: String,
}

impl VehicleKey {
    pub fn new(vehicle_type: impl Into<String>, vehicle_subtype: impl Into<String>) -> Self {
        Self {
            vehicle_type: vehicle_type.into(),
            vehicle_subtype: vehicle_subtype.into(),
        }
    }
}

impl fmt::Display for VehicleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vehicle_type, self.vehicle_subtype)
    }
}
