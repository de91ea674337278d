//! Wire-level types for the Polygon.io stream.
//!
//! ## Organization
//!
//! - [`enums`] — Clusters, hosts, control actions and stream topics
//! - [`message`] — The generic inbound [`Message`] and status kinds
//! - [`events`] — Typed payloads for each event code
//!
//! The commonly used names are re-exported at the module root.

pub mod enums;
pub mod events;
pub mod message;

pub use enums::*;
pub use message::{Message, StatusKind};
