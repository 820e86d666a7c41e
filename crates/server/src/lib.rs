//! HTTP surface and process wiring for landcost.

pub mod api;
pub mod bootstrap;
pub mod health;
pub mod logging;

use axum::Router;

use bootstrap::Application;

/// Turn API plus health endpoint over one application instance.
pub fn router(app: &Application) -> Router {
    api::router(app.runtime.clone()).merge(health::router(
        app.db_pool.clone(),
        app.config.tariff_service.is_enabled(),
    ))
}
