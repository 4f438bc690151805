//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                GET
/// ├── /session               GET
/// ├── /deposit               POST
/// │   ├── /acknowledge       POST
/// │   ├── /retry             POST
/// │   └── /cancel            POST
/// ├── /withdraw              POST
/// │   ├── /acknowledge       POST
/// │   ├── /retry             POST
/// │   └── /cancel            POST
/// └── /status                GET, DELETE
///     └── /{id}              DELETE
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))
        .route("/session", web::get().to(handlers::get_session))
        // Deposit flow
        .service(
            web::scope("/deposit")
                .route("", web::post().to(handlers::deposit))
                .route("/acknowledge", web::post().to(handlers::acknowledge_deposit))
                .route("/retry", web::post().to(handlers::retry_deposit))
                .route("/cancel", web::post().to(handlers::cancel_deposit)),
        )
        // Withdraw flow
        .service(
            web::scope("/withdraw")
                .route("", web::post().to(handlers::withdraw))
                .route("/acknowledge", web::post().to(handlers::acknowledge_withdraw))
                .route("/retry", web::post().to(handlers::retry_withdraw))
                .route("/cancel", web::post().to(handlers::cancel_withdraw)),
        )
        // Status feed
        .service(
            web::scope("/status")
                .route("", web::get().to(handlers::get_status))
                .route("", web::delete().to(handlers::clear_status))
                .route("/{id}", web::delete().to(handlers::dismiss_status)),
        );
}
