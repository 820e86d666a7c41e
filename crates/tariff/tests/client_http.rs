use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

use landcost_core::config::{AppConfig, TariffServiceConfig};
use landcost_core::domain::tariff::{DetailSource, TariffCode};
use landcost_core::tariff::{DetailOptions, TariffDataSource, TariffIndex};
use landcost_db::InMemoryTariffIndex;
use landcost_tariff::{AuthSession, SessionStore, TariffClient};
use rust_decimal::Decimal;

#[derive(Default)]
struct ServiceState {
    logins: AtomicUsize,
    position_hits: AtomicUsize,
    document_hits: AtomicUsize,
    base_url: std::sync::Mutex<String>,
}

impl ServiceState {
    fn valid_cookie(&self) -> String {
        format!("sid=session-{}", self.logins.load(Ordering::SeqCst))
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let logins = self.logins.load(Ordering::SeqCst);
        logins > 0
            && headers
                .get(header::COOKIE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|cookie| cookie == self.valid_cookie())
    }
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: usize,
}

async fn login(State(state): State<Arc<ServiceState>>, Form(form): Form<LoginForm>) -> Response {
    if form.username != "broker" || form.password != "pw-secret" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.logins.fetch_add(1, Ordering::SeqCst);
    let cookie = format!("{}; Path=/; HttpOnly", state.valid_cookie());
    (StatusCode::SEE_OTHER, [(header::SET_COOKIE, cookie), (header::LOCATION, "/home".to_string())]).into_response()
}

async fn search(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Response {
    if !state.authorized(&headers) {
        return (StatusCode::OK, "<html><form><input type=\"password\" name=\"password\"></form></html>")
            .into_response();
    }
    if !query.q.contains("volquete") {
        return Json(json!([])).into_response();
    }
    let hits = vec![
        json!({"code": "8704.21.10", "label": "Volquetes de peso total inferior o igual a 5 t"}),
        json!({"code": "8704.22.10", "label": "Volquetes de peso total superior a 5 t"}),
        json!({"code": "bogus"}),
    ];
    Json(hits.into_iter().take(query.limit).collect::<Vec<_>>()).into_response()
}

async fn position(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Response {
    if !state.authorized(&headers) {
        return (StatusCode::FOUND, [(header::LOCATION, "/login?next=/api/positions")]).into_response();
    }
    state.position_hits.fetch_add(1, Ordering::SeqCst);
    let base_url = state.base_url.lock().map(|url| url.clone()).unwrap_or_default();
    Json(json!({
        "code": code,
        "label": "Volquetes de peso total inferior o igual a 5 t",
        "path": ["Sección XVII", "Capítulo 87"],
        "rates": {"statistical_fee": 3, "import_duty": 35, "vat": 21, "vat_surcharge": 20},
        "internal_tax_document": format!("{base_url}/docs/internal-tax"),
        "interventions": []
    }))
    .into_response()
}

async fn document(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    state.document_hits.fetch_add(1, Ordering::SeqCst);
    "<html><body><p>Hasta $ 10.000.000: 0%</p><p>Más de $ 10.000.000: 20%</p></body></html>"
}

async fn spawn_service() -> (String, Arc<ServiceState>) {
    let state = Arc::new(ServiceState::default());
    let app = Router::new()
        .route("/login", post(login))
        .route("/api/search", get(search))
        .route("/api/positions/{code}", get(position))
        .route("/docs/internal-tax", get(document))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base_url = format!("http://{}", listener.local_addr().expect("addr"));
    if let Ok(mut url) = state.base_url.lock() {
        *url = base_url.clone();
    }
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (base_url, state)
}

fn config(base_url: &str, cache_dir: &TempDir) -> TariffServiceConfig {
    let mut config = AppConfig::default().tariff_service;
    config.base_url = Some(base_url.to_string());
    config.username = Some("broker".to_string());
    config.password = Some("pw-secret".to_string().into());
    config.cache_dir = cache_dir.path().to_path_buf();
    config.document_retries = 0;
    config.document_backoff_ms = 1;
    config
}

#[tokio::test]
async fn expired_session_triggers_relogin_and_transparent_retry() {
    let (base_url, state) = spawn_service().await;
    let cache_dir = TempDir::new().expect("tempdir");
    SessionStore::new(cache_dir.path())
        .save(&AuthSession { cookie: "sid=expired".to_string(), obtained_at: chrono::Utc::now() })
        .await
        .expect("seed stale session");

    let client = TariffClient::from_config(&config(&base_url, &cache_dir)).expect("client");
    let code = TariffCode::parse("8704.21.10").expect("code");
    let detail = client.get_detail(&code, DetailOptions::default()).await.expect("detail after re-login");

    assert_eq!(state.logins.load(Ordering::SeqCst), 1);
    assert_eq!(detail.provenance.source, DetailSource::Authoritative);
    assert_eq!(detail.rates.import_duty, Some(Decimal::new(35, 0)));
    let persisted = SessionStore::new(cache_dir.path()).load().await.expect("persisted session");
    assert_eq!(persisted.cookie, "sid=session-1");
}

#[tokio::test]
async fn login_page_body_counts_as_unauthenticated() {
    let (base_url, state) = spawn_service().await;
    let cache_dir = TempDir::new().expect("tempdir");
    SessionStore::new(cache_dir.path())
        .save(&AuthSession { cookie: "sid=expired".to_string(), obtained_at: chrono::Utc::now() })
        .await
        .expect("seed stale session");
    let index = Arc::new(InMemoryTariffIndex::new());
    let client = TariffClient::from_config(&config(&base_url, &cache_dir))
        .expect("client")
        .with_index(index.clone());

    let hits = client.search_code("volquete 5 t", 8).await;
    assert_eq!(hits.len(), 2);
    assert_eq!(state.logins.load(Ordering::SeqCst), 1);
    assert_eq!(index.len().await, 2);
    assert!(index
        .get(&TariffCode::parse("8704.22.10").expect("code"))
        .await
        .expect("get")
        .is_some());
}

#[tokio::test]
async fn cached_details_are_served_within_ttl_and_bypassed_on_request() {
    let (base_url, state) = spawn_service().await;
    let cache_dir = TempDir::new().expect("tempdir");
    let client = TariffClient::from_config(&config(&base_url, &cache_dir)).expect("client");
    let code = TariffCode::parse("8704.21.10").expect("code");

    let first = client.get_detail(&code, DetailOptions::default()).await.expect("first");
    assert_eq!(first.provenance.source, DetailSource::Authoritative);
    let schedule = first.internal_tax.as_ref().expect("tiers from document");
    assert_eq!(schedule.tiers().len(), 2);
    assert_eq!(state.document_hits.load(Ordering::SeqCst), 1);

    let cached = client.get_detail(&code, DetailOptions::default()).await.expect("cached");
    assert_eq!(cached.provenance.source, DetailSource::Cache);
    assert_eq!(cached.internal_tax, first.internal_tax);
    assert_eq!(state.position_hits.load(Ordering::SeqCst), 1);

    let fresh = client.get_detail(&code, DetailOptions { bypass_cache: true }).await.expect("bypass");
    assert_eq!(fresh.provenance.source, DetailSource::Authoritative);
    assert_eq!(state.position_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_service_degrades_to_empty_results() {
    let cache_dir = TempDir::new().expect("tempdir");
    let client = TariffClient::from_config(&config("http://127.0.0.1:9", &cache_dir)).expect("client");
    assert!(client.search_code("volquete", 8).await.is_empty());
    let code = TariffCode::parse("8704.21.10").expect("code");
    assert!(client.get_detail(&code, DetailOptions::default()).await.is_none());
}
