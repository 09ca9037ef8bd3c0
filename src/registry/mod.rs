//! # Registry Infrastructure
//!
//! Live bookkeeping for instrument services and the adapters used to reach them.
//!
//! ## Overview
//!
//! - **ServiceRegistry**: service lifecycle, load accounting, capacity slots and health
//! - **LoadBalancer**: strategy-based selection among candidate services
//! - **AdapterRegistry**: service type to [`ServiceCaller`](crate::client::ServiceCaller) table
//!
//! ## Architecture
//!
//! ```text
//! ServiceRegistry
//! ├── AdapterRegistry   (who to call for a service type)
//! ├── LoadBalancer      (which service gets the work)
//! └── Persistence       (mirror of every status/load change)
//! ```

pub mod adapter_registry;
pub mod load_balancer;
pub mod service_registry;

pub use adapter_registry::{AdapterRegistration, AdapterRegistry, AdapterRegistryStats};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy, RoundRobinCounters, SelectionContext};
pub use service_registry::{DiscoveryConstraints, ServiceRegistry, SlotAcquisition};
