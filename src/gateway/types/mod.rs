pub mod requests;
pub mod response;

pub use requests::{
    CancelOrderRequest, ConfirmHoldRequest, CreateOrderRequest, DemandLineRequest, HoldRequest,
    ReleaseHoldRequest, RouteStopRequest,
};
pub use response::{ApiError, ApiResponse, ApiResult, created, ok};
