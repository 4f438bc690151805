//! # API Models
//!
//! This module defines the request and response structures for the REST API.
//! Orchestrator states are serialized directly; these types wrap them.
//!
//! ## Organization
//!
//! - `requests.rs` - Incoming request bodies
//! - `responses.rs` - Outgoing response bodies
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names are converted to camelCase for JavaScript clients.
//! 256-bit integers are serialized as hex strings.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
