use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use courier_mesh::api::rest::router;
use courier_mesh::app::spawn_workers;
use courier_mesh::config::RelayConfig;
use courier_mesh::engine::notifier::LogSink;
use courier_mesh::engine::pricing::PricingConfig;
use courier_mesh::events::bus::ChannelBus;
use courier_mesh::state::AppState;
use courier_mesh::store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ChannelBus::new(1024)),
        PricingConfig::default(),
        1024,
    ));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn create_courier(app: &axum::Router, name: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/couriers",
            json!({ "name": name, "phone": "+7 900 000-00-00", "vehicle_type": "bike" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_order(app: &axum::Router) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/orders",
            json!({
                "sender_name": "Anna",
                "recipient_name": "Boris",
                "address_from": "Tverskaya 1",
                "address_to": "Nevsky 2",
                "weight": 2.0,
                "length": 1.0,
                "width": 0.5,
                "height": 0.2,
                "urgency": 1
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

/// Polls `uri` until `done` accepts the body.
async fn wait_for(app: &axum::Router, uri: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..250 {
        let (status, body) = send(app, get_request(uri)).await;
        if status == StatusCode::OK && done(&body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition on {uri} not reached");
}

#[tokio::test]
async fn health_reports_backends() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["bus"], "channel");
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    create_order(&app).await;

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("order_transitions_total{transition=\"created\"} 1"));
}

#[tokio::test]
async fn create_order_returns_created_order() {
    let (app, _state) = setup();
    let id = create_order(&app).await;

    let (status, body) = send(&app, get_request(&format!("/orders/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");
    assert_eq!(body["recipient_name"], "Boris");
    assert_eq!(body["urgency"], 1);
    assert_eq!(body["weight"], 2.0);
    assert!(body["courier_id"].is_null());
    assert!(body["completed_at"].is_null());

    let (_, list) = send(&app, get_request("/orders")).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_order_with_wrong_field_type_returns_400() {
    let (app, _state) = setup();
    let (status, body) = send(
        &app,
        json_request("POST", "/orders", json!({ "weight": "heavy" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn create_order_with_negative_weight_returns_400() {
    let (app, _state) = setup();
    let (status, _) = send(
        &app,
        json_request("POST", "/orders", json!({ "recipient_name": "Boris", "weight": -1.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_returns_404() {
    let (app, _state) = setup();

    let (status, body) = send(&app, get_request("/orders/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));

    let (status, _) = send(
        &app,
        json_request("PUT", "/orders/missing/assign-courier", json!({ "courier_id": "c-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, empty_request("PUT", "/orders/missing/finish")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_order_then_404() {
    let (app, _state) = setup();
    let id = create_order(&app).await;

    let (status, _) = send(&app, empty_request("DELETE", &format!("/orders/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, empty_request("DELETE", &format!("/orders/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn assign_finish_and_terminal_state() {
    let (app, _state) = setup();
    let courier_id = create_courier(&app, "Kolya").await;
    let order_id = create_order(&app).await;

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{order_id}/assign-courier"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "assigned", "courier_id": courier_id }));

    let (status, body) = send(&app, empty_request("PUT", &format!("/orders/{order_id}/finish"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "completed" }));

    let (status, _) = send(&app, empty_request("PUT", &format!("/orders/{order_id}/finish"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{order_id}/assign-courier"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, order) = send(&app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["status"], "completed");
    assert!(order["completed_at"].is_string());

    let (_, courier) = send(&app, get_request(&format!("/couriers/{courier_id}"))).await;
    assert!(courier["active_order_id"].is_null());
}

#[tokio::test]
async fn empty_courier_id_unassigns() {
    let (app, _state) = setup();
    let courier_id = create_courier(&app, "Kolya").await;
    let order_id = create_order(&app).await;
    let uri = format!("/orders/{order_id}/assign-courier");

    send(&app, json_request("PUT", &uri, json!({ "courier_id": courier_id }))).await;
    let (status, body) = send(&app, json_request("PUT", &uri, json!({ "courier_id": "" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "created", "courier_id": null }));
}

#[tokio::test]
async fn busy_courier_returns_409() {
    let (app, _state) = setup();
    let courier_id = create_courier(&app, "Kolya").await;
    let first = create_order(&app).await;
    let second = create_order(&app).await;

    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{first}/assign-courier"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{second}/assign-courier"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains(&first));
}

#[tokio::test]
async fn assign_unknown_courier_returns_404() {
    let (app, _state) = setup();
    let order_id = create_order(&app).await;

    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{order_id}/assign-courier"),
            json!({ "courier_id": "ghost" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn calculate_applies_urgency_factor() {
    let (app, _state) = setup();
    let request = |urgency: u8| {
        json_request(
            "POST",
            "/calculate",
            json!({
                "from_lat": 55.7558, "from_lng": 37.6173,
                "to_lat": 59.9343, "to_lng": 30.3351,
                "weight": 2.0, "length": 1.0, "width": 0.5, "height": 0.2,
                "urgency": urgency
            }),
        )
    };

    let (status, standard) = send(&app, request(1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(standard["currency"], "USD");

    let (_, express) = send(&app, request(2)).await;
    let standard = standard["estimated_cost"].as_f64().unwrap();
    let express = express["estimated_cost"].as_f64().unwrap();
    assert!(standard > 50.0);
    assert!((express - standard * 1.5).abs() < 1e-6);
}

#[tokio::test]
async fn calculate_rejects_negative_weight() {
    let (app, _state) = setup();
    let (status, body) = send(
        &app,
        json_request("POST", "/calculate", json!({ "weight": -2.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("weight"));
}

#[tokio::test]
async fn analytics_general_rejects_bad_date() {
    let (app, _state) = setup();

    let (status, _) = send(&app, get_request("/analytics/general?from=2024-13-01")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get_request("/analytics/general?to=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        get_request("/analytics/general?from=2024-01-01&to=2024-01-31"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_orders"], 0);
    assert_eq!(body["average_completion_time_seconds"], 0.0);
}

#[tokio::test]
async fn unknown_courier_stats_return_404() {
    let (app, _state) = setup();
    let (status, _) = send(&app, get_request("/analytics/couriers/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tracking_upsert_and_lookup() {
    let (app, _state) = setup();

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/couriers/tracking",
            json!({ "courier_id": "c-7", "status": "en_route", "latitude": 59.93, "longitude": 30.33 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "en_route");

    send(
        &app,
        json_request(
            "POST",
            "/couriers/tracking",
            json!({ "courier_id": "c-7", "status": "en_route", "latitude": 59.94, "longitude": 30.34 }),
        ),
    )
    .await;

    let (status, body) = send(&app, get_request("/couriers/tracking/c-7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latitude"], 59.94);

    let (status, _) = send(&app, get_request("/couriers/tracking/nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/couriers/tracking",
            json!({ "courier_id": "c-7", "status": "en_route", "latitude": 95.0, "longitude": 30.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gps_ping_keeps_assigned_order() {
    let (app, _state) = setup();
    let courier_id = create_courier(&app, "Kolya").await;
    let order_id = create_order(&app).await;
    send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{order_id}/assign-courier"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/couriers/tracking",
            json!({ "courier_id": courier_id, "status": "", "latitude": 55.76, "longitude": 37.62 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order_id"], order_id.as_str());

    let (status, body) = send(&app, get_request(&format!("/couriers/tracking/{courier_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_id"], order_id.as_str());

    let (status, body) = send(&app, get_request(&format!("/tracking/{order_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["courier_id"], courier_id.as_str());
    assert_eq!(body["latitude"], 55.76);
}

#[tokio::test]
async fn order_tracking_upsert_and_lookup() {
    let (app, _state) = setup();
    let order_id = create_order(&app).await;

    let (status, _) = send(&app, get_request(&format!("/tracking/{order_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/tracking",
            json!({ "order_id": order_id, "courier_id": "c-3", "status": "in_transit", "latitude": 59.93, "longitude": 30.33 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_transit");

    let (status, body) = send(&app, get_request(&format!("/tracking/{order_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_id"], order_id.as_str());
    assert_eq!(body["courier_id"], "c-3");
    assert_eq!(body["longitude"], 30.33);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/tracking",
            json!({ "order_id": "nope", "courier_id": "c-3", "latitude": 1.0, "longitude": 1.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unassigned order and no courier in the request.
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/tracking",
            json!({ "order_id": order_id, "latitude": 1.0, "longitude": 1.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analytics_general_with_future_from_is_empty() {
    let (app, _state) = setup();
    create_order(&app).await;

    let (status, body) = send(&app, get_request("/analytics/general?from=2999-01-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_orders"], 0);
    assert_eq!(body["completed_orders"], 0);
}

#[tokio::test]
async fn notification_lookup_validates_id() {
    let (app, _state) = setup();

    let (status, _) = send(&app, get_request("/notifications/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get_request("/notifications/99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get_request("/notifications")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn completed_order_flows_into_analytics_and_notifications() {
    let (app, state) = setup();
    let relay = RelayConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 100,
        publish_timeout: Duration::from_millis(500),
    };
    let workers = spawn_workers(state.clone(), relay, Duration::from_secs(1), Arc::new(LogSink))
        .await
        .unwrap();

    let courier_id = create_courier(&app, "Kolya").await;
    let order_id = create_order(&app).await;
    wait_for(&app, "/analytics/counters", |body| {
        body["total_orders"] == 1 && body["active_orders"] == 1
    })
    .await;

    send(
        &app,
        json_request(
            "PUT",
            &format!("/orders/{order_id}/assign-courier"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/calculate",
            json!({
                "from_lat": 55.75, "from_lng": 37.61, "to_lat": 55.75, "to_lng": 37.61,
                "order_id": order_id, "courier_id": courier_id
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, empty_request("PUT", &format!("/orders/{order_id}/finish"))).await;
    assert_eq!(status, StatusCode::OK);

    let stats_uri = format!("/analytics/couriers/{courier_id}");
    let stats = wait_for(&app, &stats_uri, |body| {
        body["completed_orders"] == 1
            && body["total_revenue"].as_f64() == Some(50.0)
            && body["courier_name"] == "Kolya"
    })
    .await;

    let counters = wait_for(&app, "/analytics/counters", |body| body["completed_orders"] == 1).await;
    assert_eq!(counters["total_orders"], 1);
    assert_eq!(counters["active_orders"], 0);

    let (_, report) = send(&app, get_request("/analytics/general")).await;
    assert_eq!(report["total_orders"], 1);
    assert_eq!(report["active_orders"], 0);
    assert_eq!(report["completed_orders"], stats["completed_orders"]);
    let report_mean = report["average_completion_time_seconds"].as_f64().unwrap();
    let stats_mean = stats["average_delivery_time_sec"].as_f64().unwrap();
    assert!((report_mean - stats_mean).abs() < 0.01);

    let (_, leaderboard) = send(&app, get_request("/analytics/couriers")).await;
    assert_eq!(leaderboard[0]["courier_id"], courier_id.as_str());

    let notifications = wait_for(&app, "/notifications", |body| {
        body.as_array().is_some_and(|items| items.len() == 1 && items[0]["status"] == "sent")
    })
    .await;
    assert_eq!(notifications[0]["type"], "order_completed");
    assert_eq!(notifications[0]["recipient"], "Boris");

    let (status, _) = send(&app, get_request("/notifications/1")).await;
    assert_eq!(status, StatusCode::OK);

    for worker in workers {
        worker.abort();
    }
}
