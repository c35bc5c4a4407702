//! Order lifecycle and broadcast orchestration.

pub mod service;
pub mod types;

pub use service::OrderService;
pub use types::{
    BroadcastGroupSummary, CancelReceipt, CreateOrderCommand, CreateOrderReceipt, DemandLine,
    MAX_DEMAND_LINES, MAX_LINE_QUANTITY, OrderDetails, OrderStatusView,
};
