//! # REST API Module
//!
//! This module defines the HTTP control surface for the session's
//! deposit and withdraw flows.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | RPC and attestation liveness |
//! | GET | `/session` | Both flow states plus cached balances |
//! | POST | `/deposit` | Start a deposit (`DepositRequested`) |
//! | POST | `/deposit/acknowledge` | `Confirming → Done` |
//! | POST | `/deposit/retry` | `Error → Input` |
//! | POST | `/deposit/cancel` | Abandon the deposit, back to `Input` |
//! | POST | `/withdraw` | Start a withdrawal |
//! | POST | `/withdraw/{acknowledge,retry,cancel}` | As for deposits |
//! | GET | `/status` | Current status feed |
//! | DELETE | `/status/{id}` | Dismiss one message |
//! | DELETE | `/status` | Clear the feed |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
