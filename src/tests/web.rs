//! Contract tests for the HTTP API.
//!
//! The router is driven directly through tower's Service interface, so
//! no socket is bound. The embedding model name is unresolvable here:
//! handler paths that demand the encoder surface an initialization
//! failure instead of downloading a model.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::catalog::CatalogItem;
use crate::config::Config;
use crate::images;
use crate::services::{ServiceRegistry, ServiceStatus};
use crate::web;

/// Creates a registry over a unique temp directory, with the model name
/// pointed at nothing resolvable.
fn create_registry() -> (Arc<ServiceRegistry>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = Config::defaults_at(tmp.path());
    config.embedding.model = "no-such-model".to_string();
    (Arc::new(ServiceRegistry::new(config)), tmp)
}

fn item(id: &str, category: &str) -> CatalogItem {
    CatalogItem {
        id: id.to_string(),
        name: format!("Test {id}"),
        category: category.to_string(),
        price: 59.0,
        rating: 4.5,
        image_ref: format!("{id}.jpg"),
    }
}

/// Seed the registry's store with three embedded items.
fn seed_store(registry: &ServiceRegistry) {
    let store = registry.store().expect("store opens");
    for (i, (id, category)) in [
        ("canvas-hightop", "shoes"),
        ("leather-boot", "shoes"),
        ("tote-bag", "bags"),
    ]
    .iter()
    .enumerate()
    {
        let cos = 0.9 - i as f32 * 0.1;
        let vector = vec![cos, (1.0 - cos * cos).max(0.0).sqrt(), 0.0];
        store
            .insert(item(id, category), vector)
            .expect("failed to insert");
    }
}

/// The handlers call block_in_place, which needs a multi-thread runtime.
fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime")
        .block_on(future)
}

/// Send one request through the router and decode the JSON body.
async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("request failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not JSON")
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[test]
fn test_products_page_and_total() {
    let (registry, _tmp) = create_registry();
    seed_store(&registry);

    let (status, body) = block_on(send(web::api_router(registry), get("/api/products")));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);

    let products = body["products"].as_array().expect("products array");
    assert_eq!(products.len(), 3);
    assert_eq!(products[0]["id"], "canvas-hightop");
    // Browsing is unscored; no similarity field leaks into the listing.
    assert!(products[0].get("similarity").is_none());
}

#[test]
fn test_products_category_filter_and_pagination() {
    let (registry, _tmp) = create_registry();
    seed_store(&registry);

    let (status, body) = block_on(send(
        web::api_router(registry),
        get("/api/products?category=shoes&offset=1&limit=1"),
    ));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["products"].as_array().unwrap().len(), 1);
    assert_eq!(body["products"][0]["id"], "leather-boot");
}

#[test]
fn test_categories_sorted_distinct() {
    let (registry, _tmp) = create_registry();
    seed_store(&registry);

    let (status, body) = block_on(send(web::api_router(registry), get("/api/categories")));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"categories": ["bags", "shoes"]}));
}

#[test]
fn test_status_reflects_lifecycle() {
    let (registry, _tmp) = create_registry();

    let (status, body) = block_on(send(web::api_router(registry.clone()), get("/api/status")));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"embedding_generator": "uninitialized", "vector_store": "uninitialized"})
    );

    // Probing the endpoint must not have constructed anything.
    assert_eq!(
        registry.status().vector_store,
        ServiceStatus::Uninitialized
    );

    registry.store().expect("store opens");
    let (_, body) = block_on(send(web::api_router(registry.clone()), get("/api/status")));
    assert_eq!(body["vector_store"], "ready");

    // A failed slot serializes as an object carrying the reason.
    registry.encoder().expect_err("bogus model must fail");
    let (_, body) = block_on(send(web::api_router(registry), get("/api/status")));
    let reason = body["embedding_generator"]["failed"]
        .as_str()
        .expect("failed reason");
    assert!(reason.contains("no-such-model"), "reason: {reason}");
}

#[test]
fn test_health_omits_count_until_store_ready() {
    let (registry, _tmp) = create_registry();

    let (status, body) = block_on(send(web::api_router(registry.clone()), get("/api/health")));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    // Health must not force the store open, so no count yet.
    assert!(body.get("indexed_items").is_none());

    seed_store(&registry);
    let (_, body) = block_on(send(web::api_router(registry), get("/api/health")));
    assert_eq!(body["indexed_items"], 3);
}

#[test]
fn test_search_requires_exactly_one_image_source() {
    let (registry, _tmp) = create_registry();

    let (status, body) = block_on(send(
        web::api_router(registry.clone()),
        post_json("/api/search", json!({})),
    ));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");

    let both = json!({
        "image_b64": "aGk=",
        "image_url": "https://example.com/a.jpg",
    });
    let (status, body) = block_on(send(
        web::api_router(registry.clone()),
        post_json("/api/search", both),
    ));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");

    // Rejected requests never construct services.
    let status = registry.status();
    assert_eq!(status.embedding_generator, ServiceStatus::Uninitialized);
    assert_eq!(status.vector_store, ServiceStatus::Uninitialized);
}

#[test]
fn test_search_rejects_undecodable_payloads() {
    let (registry, _tmp) = create_registry();

    // Not base64 at all.
    let (status, body) = block_on(send(
        web::api_router(registry.clone()),
        post_json("/api/search", json!({"image_b64": "!!not-base64!!"})),
    ));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");

    // Valid base64, but the bytes are not an image.
    let noise = STANDARD.encode(b"just some text");
    let (status, body) = block_on(send(
        web::api_router(registry),
        post_json("/api/search", json!({"image_b64": noise})),
    ));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
}

#[test]
fn test_search_rejects_out_of_range_min_score() {
    let (registry, _tmp) = create_registry();
    let png = STANDARD.encode(images::tests::create_png_bytes(16, 16));

    let (status, body) = block_on(send(
        web::api_router(registry),
        post_json("/api/search", json!({"image_b64": png, "min_score": 1.5})),
    ));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
    assert!(body["error"].as_str().unwrap().contains("min_score"));
}

#[test]
fn test_search_surfaces_encoder_failure_as_unavailable() {
    let (registry, _tmp) = create_registry();
    let png = STANDARD.encode(images::tests::create_png_bytes(32, 32));

    let (status, body) = block_on(send(
        web::api_router(registry),
        post_json("/api/search", json!({"image_b64": png})),
    ));
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "embedding");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("failed to initialize"));
}

#[test]
fn test_upload_requires_a_file_part() {
    let (registry, _tmp) = create_registry();

    let boundary = "lookalike-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"min_score\"\r\n\r\n\
         0.5\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/search/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = block_on(send(web::api_router(registry), request));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
    assert!(body["error"].as_str().unwrap().contains("file"));
}

#[test]
fn test_upload_parses_file_and_knob_parts() {
    let (registry, _tmp) = create_registry();
    let png = images::tests::create_png_bytes(16, 16);

    let boundary = "lookalike-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"query.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\n\
             Content-Disposition: form-data; name=\"top_k\"\r\n\r\n\
             3\r\n\
             --{boundary}--\r\n"
        )
        .as_bytes(),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/search/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    // Every part parses; the pipeline then stops at the unresolvable
    // model, which proves the image made it through to the encoder.
    let (status, body) = block_on(send(web::api_router(registry), request));
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "embedding");
}

#[test]
fn test_upload_rejects_non_numeric_min_score() {
    let (registry, _tmp) = create_registry();

    let boundary = "lookalike-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"min_score\"\r\n\r\n\
         warm\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/search/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = block_on(send(web::api_router(registry), request));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("min_score"));
}

#[test]
fn test_oversized_body_is_cut_off() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = Config::defaults_at(tmp.path());
    config.embedding.model = "no-such-model".to_string();
    config.server.max_upload_bytes = 64;
    let registry = Arc::new(ServiceRegistry::new(config));

    // The rejection body is plain text, so only the status is checked.
    let payload = json!({"image_b64": "A".repeat(4096)});
    let response = block_on(
        web::api_router(registry).oneshot(post_json("/api/search", payload)),
    )
    .expect("request failed");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[test]
fn test_admin_ingest_with_nothing_pending_reports_zeroes() {
    let (registry, _tmp) = create_registry();

    // No catalog file on disk: nothing pending, and the unresolvable
    // model is never demanded.
    let (status, body) = block_on(send(
        web::api_router(registry.clone()),
        post_empty("/api/admin/ingest"),
    ));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"embedded": 0, "skipped": 0, "already_present": 0})
    );
    assert_eq!(
        registry.status().embedding_generator,
        ServiceStatus::Uninitialized
    );
}

#[test]
fn test_admin_ingest_surfaces_encoder_failure_as_unavailable() {
    let (registry, _tmp) = create_registry();

    // One item with no stored vector forces an encoder demand.
    crate::catalog::save_catalog(
        &registry.config().catalog_path(),
        &[item("canvas-hightop", "shoes")],
    )
    .expect("failed to write catalog");

    let (status, body) = block_on(send(
        web::api_router(registry),
        post_empty("/api/admin/ingest"),
    ));
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "embedding");
}

#[test]
fn test_admin_reset_reports_fresh_lifecycle() {
    let (registry, _tmp) = create_registry();
    seed_store(&registry);
    assert_eq!(registry.status().vector_store, ServiceStatus::Ready);

    let (status, body) = block_on(send(
        web::api_router(registry.clone()),
        post_empty("/api/admin/reset"),
    ));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"embedding_generator": "uninitialized", "vector_store": "uninitialized"})
    );
    assert_eq!(registry.status().vector_store, ServiceStatus::Uninitialized);
}
