//! Backend delivery of accepted fixes
//!
//! - [`client`]: the `LocationReporter` boundary and its reqwest implementation
//! - [`publisher`]: the bounded, fire-and-forget `PublishPipeline`
//! - [`types`]: wire payloads and delivery outcomes

pub mod client;
pub mod publisher;
pub mod types;

pub use client::{DeliveryError, HttpReporter, LocationReporter};
pub use publisher::PublishPipeline;
pub use types::{DeliveryOutcome, DeliveryStats, Endpoint, Envelope, LocationUpdate};
