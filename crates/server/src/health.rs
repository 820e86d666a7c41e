use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use landcost_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    tariff_service_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub tariff_service: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, tariff_service_enabled: bool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, tariff_service_enabled })
}

/// Degraded only when the database is unreachable; a missing tariff service just means
/// quotes fall back to reference rates.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let tariff_service = if state.tariff_service_enabled {
        HealthCheck { status: "configured", detail: "authoritative tariff data enabled".to_string() }
    } else {
        HealthCheck { status: "disabled", detail: "quotes use reference rates".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck { status: "ready", detail: "landcost-server runtime initialized".to_string() },
        database,
        tariff_service,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => HealthCheck { status: "degraded", detail: format!("database query failed: {error}") },
    }
}
