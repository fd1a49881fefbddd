pub mod client;
pub mod delivery;

pub use client::{Transport, TransportConfig, TransportError};
pub use delivery::{DeliveryOutcome, backoff_delay};
