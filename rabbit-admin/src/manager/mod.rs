//! Management API abstraction layer.
//!
//! - HTTP implementation for live brokers
//! - Mock implementation for testing

pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpRabbitManager;
pub use mock::MockRabbitManager;
pub use traits::{AdminError, RabbitManager};
