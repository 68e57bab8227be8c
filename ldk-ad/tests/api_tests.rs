//! Integration tests for ldk-ad endpoints
//!
//! Most tests run with shared_secret = 0 (signing disabled) to exercise
//! routing and handlers; the auth section signs requests for real.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use ldk_ad::{build_router, AppState};
use ldk_common::api::auth::{calculate_hash, now_millis, sign_value, DUMMY_HASH};
use ldk_common::db::init_memory_database;
use ldk_common::events::{EventBus, LdkEvent};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::util::ServiceExt; // for `oneshot`

const SECRET: i64 = 987_654_321;

async fn setup_app(shared_secret: i64) -> (Router, SqlitePool, EventBus) {
    let db = init_memory_database().await.expect("memory db");
    let bus = EventBus::new(100);
    let state = AppState::new(db.clone(), bus.clone(), shared_secret);
    (build_router(state), db, bus)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("read body").to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, body)
}

fn vehicle_body(stock: &str, vin: &str) -> Value {
    json!({
        "stock_number": stock,
        "vin": vin,
        "year": 2019,
        "make": "Honda",
        "model": "Accord",
        "trim": "EX-L",
        "mileage": 41000,
        "price": 21500,
        "photo_urls": ["https://img.example/1.jpg"]
    })
}

fn consignment_body(vin: &str) -> Value {
    json!({
        "owner_name": "Sam Lee",
        "owner_email": "sam@example.com",
        "vin": vin,
        "year": 2016,
        "make": "Mazda",
        "model": "CX-5",
        "mileage": 72000,
        "asking_price": 13200,
        "photo_urls": ["https://img.example/cx5.jpg"]
    })
}

async fn create_vehicle(app: &Router, stock: &str, vin: &str) -> Value {
    let request = json_request("POST", "/api/vehicles", vehicle_body(stock, vin));
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

// =============================================================================
// Health and public endpoints
// =============================================================================

#[tokio::test]
async fn test_health_no_auth_required() {
    let (app, _db, _bus) = setup_app(SECRET).await;

    let (status, body) = send(&app, empty_request("GET", "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "ldk-ad");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_consignment_submission_is_public() {
    let (app, _db, bus) = setup_app(SECRET).await;
    let mut rx = bus.subscribe();

    let (status, body) = send(
        &app,
        json_request("POST", "/api/consignments", consignment_body("JM3KE4DY5G0000001")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["status"], "pending");

    assert!(matches!(rx.try_recv().unwrap(), LdkEvent::ConsignmentSubmitted { .. }));

    // Listing submissions still requires a signature
    let (status, _) = send(&app, empty_request("GET", "/api/consignments")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_signed_get_accepted_and_bad_hash_rejected() {
    let (app, _db, _bus) = setup_app(SECRET).await;

    let timestamp = now_millis();
    let hash = calculate_hash(&json!({"timestamp": timestamp, "hash": DUMMY_HASH}), SECRET);
    let uri = format!("/api/vehicles?timestamp={}&hash={}", timestamp, hash);
    let (status, body) = send(&app, empty_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["total"], 0);

    let uri = format!("/api/vehicles?timestamp={}&hash={}", timestamp, DUMMY_HASH);
    let (status, body) = send(&app, empty_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "hash_invalid");
}

#[tokio::test]
async fn test_signed_post_and_stale_timestamp() {
    let (app, _db, _bus) = setup_app(SECRET).await;

    let mut body = vehicle_body("S-1", "1HGCV1F34KA000001");
    sign_value(&mut body, SECRET, now_millis());
    let (status, created) = send(&app, json_request("POST", "/api/vehicles", body)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);

    let mut stale = vehicle_body("S-2", "1HGCV1F34KA000002");
    sign_value(&mut stale, SECRET, now_millis() - 60_000);
    let (status, err) = send(&app, json_request("POST", "/api/vehicles", stale)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"]["code"], "timestamp_invalid");
}

// =============================================================================
// Inventory
// =============================================================================

#[tokio::test]
async fn test_vehicle_crud_and_events() {
    let (app, _db, bus) = setup_app(0).await;
    let mut rx = bus.subscribe();

    let created = create_vehicle(&app, "A-100", "1hgcv1f34ka000001").await;
    assert_eq!(created["status"], "draft");
    assert_eq!(created["vin"], "1HGCV1F34KA000001");
    assert_eq!(created["days_on_lot"], 0);
    assert!(created["vin_check_digit_ok"].is_boolean());
    assert!(matches!(rx.try_recv().unwrap(), LdkEvent::VehicleCreated { .. }));

    let id = created["id"].as_str().unwrap().to_string();

    let (status, updated) = send(
        &app,
        json_request(
            "PUT",
            &format!("/api/vehicles/{}", id),
            json!({"price": 20900, "status": "sold"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["price"], 20900);
    // Status is ignored by the partial update
    assert_eq!(updated["status"], "draft");
    assert!(matches!(rx.try_recv().unwrap(), LdkEvent::VehicleUpdated { .. }));

    let uri = format!("/api/vehicles/{}", id);
    let (status, fetched) = send(&app, empty_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["stock_number"], "A-100");

    let (status, _) = send(&app, empty_request("DELETE", &format!("/api/vehicles/{}", id))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(matches!(rx.try_recv().unwrap(), LdkEvent::VehicleDeleted { .. }));

    let (status, err) = send(&app, empty_request("GET", &format!("/api/vehicles/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_create_vehicle_validation_and_duplicates() {
    let (app, _db, _bus) = setup_app(0).await;
    create_vehicle(&app, "A-100", "1HGCV1F34KA000001").await;

    let (status, err) = send(
        &app,
        json_request("POST", "/api/vehicles", vehicle_body("A-101", "1HGCV1F34KA000001")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(err["error"]["message"].as_str().unwrap().contains("VIN"));

    let (status, _) = send(
        &app,
        json_request("POST", "/api/vehicles", vehicle_body("A-100", "1HGCV1F34KA000002")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut bad_year = vehicle_body("A-102", "1HGCV1F34KA000003");
    bad_year["year"] = json!(1850);
    let (status, err) = send(&app, json_request("POST", "/api/vehicles", bad_year)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "bad_request");

    let (status, _) = send(
        &app,
        json_request("POST", "/api/vehicles", vehicle_body("A-103", "1HGCV1F34KA00000O")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_transitions() {
    let (app, _db, bus) = setup_app(0).await;
    let created = create_vehicle(&app, "A-100", "1HGCV1F34KA000001").await;
    let id = created["id"].as_str().unwrap().to_string();
    let mut rx = bus.subscribe();
    let status_uri = format!("/api/vehicles/{}/status", id);

    // draft -> sold is not allowed
    let request = json_request("POST", &status_uri, json!({"status": "sold"}));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let request = json_request("POST", &status_uri, json!({"status": "available"}));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "available");
    assert!(body["listed_at"].is_string());
    match rx.try_recv().unwrap() {
        LdkEvent::VehicleStatusChanged { old_status, new_status, .. } => {
            assert_eq!(old_status.as_str(), "draft");
            assert_eq!(new_status.as_str(), "available");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let request = json_request("POST", &status_uri, json!({"status": "sold"}));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["sold_at"].is_string());

    // Sold vehicles are archived, not deleted
    let (status, _) = send(&app, empty_request("DELETE", &format!("/api/vehicles/{}", id))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let request = json_request("POST", &status_uri, json!({"status": "teleported"}));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_list_filters_sort_and_paging() {
    let (app, _db, _bus) = setup_app(0).await;
    for (i, price) in [18000, 25000, 31000].iter().enumerate() {
        let mut body = vehicle_body(&format!("P-{}", i), &format!("1HGCV1F34KA00000{}", i));
        body["price"] = json!(price);
        let (status, _) = send(&app, json_request("POST", "/api/vehicles", body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = send(
        &app,
        empty_request("GET", "/api/vehicles?min_price=20000&sort=price&order=asc"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["price"], 25000);
    assert!(page["items"][0]["days_on_lot"].is_i64());

    let (_, page) =
        send(&app, empty_request("GET", "/api/vehicles?page_size=1&page=9&sort=price")).await;
    assert_eq!(page["total_pages"], 3);
    assert_eq!(page["page"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, empty_request("GET", "/api/vehicles?sort=owner_ssn")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, page) = send(&app, empty_request("GET", "/api/vehicles?q=p-1")).await;
    assert_eq!(page["total"], 1);
}

// =============================================================================
// Consignments
// =============================================================================

#[tokio::test]
async fn test_consignment_approval_flow() {
    let (app, _db, bus) = setup_app(0).await;
    let (_, receipt) = send(
        &app,
        json_request("POST", "/api/consignments", consignment_body("JM3KE4DY5G0000001")),
    )
    .await;
    let id = receipt["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        json_request("POST", "/api/consignments", consignment_body("JM3KE4DY5G0000001")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, pending) = send(&app, empty_request("GET", "/api/consignments?status=pending")).await;
    assert_eq!(pending["total"], 1);

    let mut rx = bus.subscribe();
    let (status, approved) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/consignments/{}/approve", id),
            json!({"stock_number": "C-1", "note": "Looks good"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", approved);
    assert_eq!(approved["consignment"]["status"], "approved");
    assert_eq!(approved["vehicle"]["status"], "draft");
    assert_eq!(approved["vehicle"]["source"], "consignment");
    assert_eq!(approved["vehicle"]["price"], 13200);
    assert_eq!(approved["consignment"]["vehicle_id"], approved["vehicle"]["id"]);

    assert!(matches!(rx.try_recv().unwrap(), LdkEvent::VehicleCreated { .. }));
    assert!(matches!(rx.try_recv().unwrap(), LdkEvent::ConsignmentReviewed { .. }));

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/consignments/{}/reject", id),
            json!({"note": "changed my mind"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // VIN is now in inventory, so a new submission for it is refused
    let (status, _) = send(
        &app,
        json_request("POST", "/api/consignments", consignment_body("JM3KE4DY5G0000001")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_consignment_reject_and_unknown_id() {
    let (app, _db, _bus) = setup_app(0).await;
    let (_, receipt) = send(
        &app,
        json_request("POST", "/api/consignments", consignment_body("JM3KE4DY5G0000001")),
    )
    .await;
    let id = receipt["id"].as_str().unwrap().to_string();

    let (status, rejected) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/consignments/{}/reject", id),
            json!({"note": "Salvage title"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["review_note"], "Salvage title");

    let (status, _) = send(
        &app,
        empty_request("GET", &format!("/api/consignments/{}", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Alerts, settings, dashboard
// =============================================================================

async fn seed_alert(db: &SqlitePool, vehicle_id: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO alerts (id, vehicle_id, kind, severity, message, data, created_at) \
         VALUES (?, ?, 'stale_inventory', 'warning', 'On lot 90 days', '{}', ?)",
    )
    .bind(&id)
    .bind(vehicle_id)
    .bind(ldk_common::time::to_db(&ldk_common::time::now()))
    .execute(db)
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn test_alert_list_and_acknowledge() {
    let (app, db, _bus) = setup_app(0).await;
    let vehicle = create_vehicle(&app, "A-1", "1HGCV1F34KA000001").await;
    let alert_id = seed_alert(&db, vehicle["id"].as_str().unwrap()).await;

    let (_, open) = send(&app, empty_request("GET", "/api/alerts")).await;
    assert_eq!(open["total"], 1);
    assert_eq!(open["items"][0]["kind"], "stale_inventory");

    let (status, acked) = send(
        &app,
        json_request("POST", &format!("/api/alerts/{}/acknowledge", alert_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(acked["acknowledged_at"].is_string());

    let (_, open) = send(&app, empty_request("GET", "/api/alerts?open=true")).await;
    assert_eq!(open["total"], 0);
    let (_, all) =
        send(&app, empty_request("GET", "/api/alerts?open=false&kind=stale_inventory")).await;
    assert_eq!(all["total"], 1);

    let (status, _) = send(&app, empty_request("GET", "/api/alerts?kind=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_settings_catalog_and_update() {
    let (app, _db, _bus) = setup_app(0).await;

    let (status, body) = send(&app, empty_request("GET", "/api/settings")).await;
    assert_eq!(status, StatusCode::OK);
    let settings = body["settings"].as_array().unwrap();
    assert_eq!(body["total_settings"], settings.len());
    assert!(settings.iter().all(|s| s["key"] != "api_shared_secret"));
    let stale = settings.iter().find(|s| s["key"] == "stale_inventory_days").unwrap();
    assert_eq!(stale["value"], "60");

    let (status, row) = send(
        &app,
        json_request("PUT", "/api/settings/stale_inventory_days", json!({"value": 45})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["value"], "45");

    let (status, _) = send(
        &app,
        json_request("PUT", "/api/settings/stale_inventory_days", json!({"value": "soon"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request("PUT", "/api/settings/api_shared_secret", json!({"value": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dashboard_summary() {
    let (app, db, _bus) = setup_app(0).await;
    let a = create_vehicle(&app, "A-1", "1HGCV1F34KA000001").await;
    create_vehicle(&app, "A-2", "1HGCV1F34KA000002").await;
    send(
        &app,
        json_request(
            "POST",
            &format!("/api/vehicles/{}/status", a["id"].as_str().unwrap()),
            json!({"status": "available"}),
        ),
    )
    .await;
    send(
        &app,
        json_request("POST", "/api/consignments", consignment_body("JM3KE4DY5G0000001")),
    )
    .await;
    seed_alert(&db, a["id"].as_str().unwrap()).await;

    let (status, dash) = send(&app, empty_request("GET", "/api/dashboard")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dash["vehicles_by_status"]["available"], 1);
    assert_eq!(dash["vehicles_by_status"]["draft"], 1);
    assert_eq!(dash["vehicles_by_status"]["sold"], 0);
    assert_eq!(dash["average_days_on_lot"], 0.0);
    assert_eq!(dash["pending_consignments"], 1);
    assert_eq!(dash["open_alerts"], 1);
    assert_eq!(dash["market_positions"]["no_snapshot"], 1);
    assert_eq!(dash["market_positions"]["competitive"], 0);
}
