//! Realtime eventing: connection registry, event bus, push outbox and the
//! WebSocket endpoint.

pub mod bus;
pub mod connection;
pub mod handler;
pub mod messages;
pub mod push;

pub use bus::{EventBus, FanoutWorker};
pub use connection::{ConnectionId, ConnectionManager, WsSender};
pub use handler::ws_handler;
pub use messages::{Event, order_room, trip_room};
pub use push::{FcmSender, NoopSender, PushNotification, PushOutbox, PushSender};
