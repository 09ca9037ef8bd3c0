//! # Service Caller
//!
//! Transport seam between the engine and instrument services. The engine and
//! registry only see [`ServiceCaller`]; [`HttpServiceCaller`] is the bundled
//! HTTP implementation.

pub mod http;
pub mod traits;

pub use http::HttpServiceCaller;
pub use traits::{
    CallerError, HealthProbe, InvokeResponse, RemoteState, RemoteStatus, ServiceCaller,
};
