//! Session gateway: create and discard backend sessions over HTTP.

pub mod gateway;
pub mod http;
pub mod mock;

pub use gateway::{HealthStatus, SessionGateway};
pub use http::{GatewayConfig, HttpSessionGateway};
pub use mock::MockGateway;
