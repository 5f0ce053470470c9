//! RabbitMQ convergence engine.
//!
//! Drives the broker toward declared vhosts, users, permissions, policies and
//! queues, and reports per-component readiness back on each object:
//! - Components diff desired against observed state through [`RabbitManager`]
//! - The [`Reconciler`] runs a pass per object and aggregates `Ready`
//! - Collaborators (object store, secrets, events, scheduling) sit behind
//!   async traits so hosts can plug in their own
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               Reconciler                 │
//! │  (admission, pass, status aggregation)   │
//! └───────┬──────────────┬───────────────┬───┘
//!         ▼              ▼               ▼
//! ┌──────────────┐ ┌────────────┐ ┌─────────────┐
//! │ Components   │ │ Connection │ │ ObjectStore │
//! │ vhost/user/  │ │ resolver + │ │ SecretStore │
//! │ permissions/ │ │ manager    │ │ EventSink   │
//! │ policies/    │ │ factory    │ │ Scheduler   │
//! │ queue        │ │            │ │             │
//! └──────────────┘ └────────────┘ └─────────────┘
//! ```
//!
//! [`RabbitManager`]: rabbit_admin::RabbitManager

pub mod admission;
pub mod capability;
pub mod components;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod diff;
pub mod error;
pub mod events;
pub mod memory;
pub mod password;
pub mod reconciler;
pub mod resource;
pub mod spec;
pub mod status;
pub mod watch;

pub use admission::Admission;
pub use capability::{ObjectStore, Scheduler, SecretData, SecretStore, StoreError};
pub use config::{ConnectionDefaults, EngineConfig};
pub use connection::{
    resolve, HttpManagerFactory, ManagerFactory, ResolvedConnection, StaticManagerFactory,
};
pub use credentials::UserCredentials;
pub use error::ConvergeError;
pub use events::{Event, EventLog, EventSink, EventType};
pub use memory::{MemoryStore, RecordingScheduler};
pub use password::{generate_password, hash_password, verify_password, HashingAlgorithm};
pub use reconciler::{PassState, ReconcileOutcome, Reconciler};
pub use resource::{Manifest, ObjectKey, ObjectMeta, Resource, ResourceKind, ResourceStatus};
pub use spec::*;
pub use status::{Condition, ConditionStatus, Conditions};
