//! RabbitMQ management API access for the convergence engine.
//!
//! Provides a trait-based boundary over the broker's administrative HTTP API:
//! - [`RabbitManager`]: one async method per management operation
//! - [`HttpRabbitManager`]: reqwest implementation against `/api/...`
//! - [`MockRabbitManager`]: in-memory broker that records every mutating call
//!
//! Mutating calls never interpret the HTTP status themselves. They return an
//! [`ApiResponse`] so callers can check the status codes their operation
//! expects (201 on first creation, 204 on update or delete).

pub mod manager;
pub mod types;

pub use manager::http::{management_url, ClientOptions, HttpRabbitManager};
pub use manager::mock::{MockCall, MockRabbitManager};
pub use manager::traits::{AdminError, RabbitManager};
pub use types::*;
