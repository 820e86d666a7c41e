use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rust_decimal::Decimal;

use landcost_agent::tools::{DefaultProductResolver, HttpProductResolver, ProductResolver, ResolveError};

const PAGE: &str = r#"<html><head>
<meta property="og:title" content="Hormigonera 350 L trifásica">
<meta property="og:description" content="Motor 2 HP, tambor de acero">
<meta property="product:price:amount" content="1250.00">
<meta property="product:price:currency" content="USD">
</head><body></body></html>"#;

#[derive(Default)]
struct Shop {
    flaky_hits: AtomicUsize,
}

async fn item() -> Html<&'static str> {
    Html(PAGE)
}

async fn flaky(State(shop): State<Arc<Shop>>) -> Response {
    if shop.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Html(PAGE).into_response()
}

async fn gone() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn spawn_shop() -> (String, Arc<Shop>) {
    let shop = Arc::new(Shop::default());
    let router = Router::new()
        .route("/item", get(item))
        .route("/flaky", get(flaky))
        .route("/gone", get(gone))
        .with_state(shop.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    (format!("http://{address}"), shop)
}

fn resolver() -> HttpProductResolver {
    HttpProductResolver::new(Duration::from_secs(5), 2, Duration::from_millis(10)).expect("client")
}

#[tokio::test]
async fn product_page_metadata_becomes_the_snapshot() {
    let (base, _) = spawn_shop().await;
    let link = format!("{base}/item");

    let snapshot = resolver().resolve(&format!("quiero importar esto {link}")).await.expect("snapshot");
    assert_eq!(snapshot.title, "Hormigonera 350 L trifásica");
    assert_eq!(snapshot.description, "Motor 2 HP, tambor de acero");
    assert_eq!(snapshot.source_link.as_deref(), Some(link.as_str()));
    assert_eq!(snapshot.price.expect("price").min, Decimal::new(1_250, 0));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (base, shop) = spawn_shop().await;

    let snapshot = resolver().resolve(&format!("{base}/flaky")).await.expect("snapshot after retry");
    assert_eq!(snapshot.title, "Hormigonera 350 L trifásica");
    assert_eq!(shop.flaky_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_page_is_an_error_and_the_default_resolver_falls_back() {
    let (base, _) = spawn_shop().await;
    let input = format!("hormigonera {base}/gone");

    let error = resolver().resolve(&input).await.expect_err("404");
    assert!(matches!(error, ResolveError::Status(404)));

    let fallback = DefaultProductResolver::new(Some(Arc::new(resolver())));
    let snapshot = fallback.resolve(&input).await.expect("plain text snapshot");
    assert!(snapshot.title.contains("hormigonera"));
    assert_eq!(snapshot.source_link.as_deref(), Some(format!("{base}/gone").as_str()));
}
