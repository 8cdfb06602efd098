use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};
use parcel_dispatch::api::rest::router;
use parcel_dispatch::config::Config;
use parcel_dispatch::engine::presence;
use parcel_dispatch::models::caller::CallerContext;
use parcel_dispatch::realtime::events::{EtaTarget, RealtimeEvent};
use parcel_dispatch::realtime::hub::{Channel, Envelope};
use parcel_dispatch::realtime::session::{ClientMessage, Session};
use parcel_dispatch::state::AppState;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

struct Caller {
    id: String,
    role: &'static str,
}

impl Caller {
    fn user(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: "user",
        }
    }

    fn driver(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: "driver",
        }
    }
}

const ADMIN_TOKEN: &str = "back-office-secret";

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::from_config(Config {
        otp_expose_codes: true,
        admin_token: Some(ADMIN_TOKEN.to_string()),
        ..Config::default()
    }));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, caller: Option<&Caller>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(caller) = caller {
        builder = builder
            .header("x-caller-id", caller.id.as_str())
            .header("x-caller-role", caller.role);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn with_admin_token(mut request: Request<Body>, token: &'static str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-admin-token", HeaderValue::from_static(token));
    request
}

fn verification_request(driver_id: &str, caller: Option<&Caller>) -> Request<Body> {
    json_request(
        "PATCH",
        &format!("/drivers/{driver_id}/verification"),
        caller,
        json!({ "status": "APPROVED" }),
    )
}

fn get_request(uri: &str, caller: Option<&Caller>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header("x-caller-id", caller.id.as_str())
            .header("x-caller-role", caller.role);
    }
    builder.body(Body::empty()).unwrap()
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

async fn create_user(app: &axum::Router, mobile: &str) -> Caller {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/users",
            None,
            json!({ "name": "Sam Sender", "mobile": mobile, "email": "sam@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let user = body_json(res).await;
    Caller::user(user["id"].as_str().unwrap())
}

/// Registers, approves and brings a driver online. Returns the caller and
/// the receiving end of the driver's connection queue.
async fn online_driver(
    app: &axum::Router,
    state: &Arc<AppState>,
    name: &str,
) -> (Caller, mpsc::Receiver<Envelope>) {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            None,
            json!({
                "name": name,
                "mobile": "+4917600000000",
                "vehicle": { "kind": "scooter", "plate_number": "B-DR-42" },
                "rating": 4.8
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let driver = body_json(res).await;
    assert_eq!(driver["verification_status"], "PENDING");
    let id = driver["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(with_admin_token(verification_request(&id, None), ADMIN_TOKEN))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (tx, rx) = mpsc::channel(64);
    presence::go_online(state, Uuid::parse_str(&id).unwrap(), tx).unwrap();
    (Caller::driver(&id), rx)
}

fn order_body() -> Value {
    json!({
        "pickup": { "address": "Alexanderplatz 1, Berlin", "location": { "lat": 52.5219, "lng": 13.4132 } },
        "dropoff": { "address": "Kurfürstendamm 21, Berlin", "location": { "lat": 52.5037, "lng": 13.3320 } },
        "package": { "size": "small", "fragile": false },
        "price": { "total": 14.5, "driver_earning": 11.0, "platform_fee": 3.5, "distance_km": 6.1 }
    })
}

async fn create_order(app: &axum::Router, user: &Caller) -> Value {
    let res = app
        .clone()
        .oneshot(json_request("POST", "/orders", Some(user), order_body()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

fn drain(rx: &mut mpsc::Receiver<Envelope>) -> Vec<RealtimeEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["online_drivers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics", None)).await.unwrap();

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
    assert!(body.contains("online_drivers"));
}

#[tokio::test]
async fn missing_caller_headers_return_401() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request("POST", "/orders", None, order_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn create_user_empty_name_returns_400() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/users",
            None,
            json!({ "name": "  ", "mobile": "+4915100000000" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn driver_cannot_approve_themselves() {
    let (app, state) = setup();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            None,
            json!({
                "name": "Mallory",
                "mobile": "+4917600000001",
                "vehicle": { "kind": "car", "plate_number": "B-MA-1" }
            }),
        ))
        .await
        .unwrap();
    let id = body_json(res).await["id"].as_str().unwrap().to_string();
    let own_headers = Caller::driver(&id);

    let res = app
        .clone()
        .oneshot(verification_request(&id, Some(&own_headers)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["code"], "UNAUTHORIZED");

    let res = app
        .clone()
        .oneshot(verification_request(&id, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .clone()
        .oneshot(with_admin_token(
            verification_request(&id, Some(&own_headers)),
            "guessed-token",
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .oneshot(get_request("/drivers/me", Some(&own_headers)))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["verification_status"], "PENDING");

    let (tx, _rx) = mpsc::channel(8);
    let driver_id = Uuid::parse_str(&id).unwrap();
    assert!(presence::go_online(&state, driver_id, tx).is_err());
}

#[tokio::test]
async fn verification_is_closed_without_configured_token() {
    let state = Arc::new(AppState::from_config(Config::default()));
    let app = router(state);

    let res = app
        .oneshot(with_admin_token(
            verification_request(&Uuid::new_v4().to_string(), None),
            ADMIN_TOKEN,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (driver, _rx) = online_driver(&app, &state, "Dana").await;
    let order = create_order(&app, &user).await;
    let pickup_uri = format!("/orders/{}/verify-pickup", order["id"].as_str().unwrap());

    for code in [json!(null), json!(-5), json!(123456.0)] {
        let res = app
            .clone()
            .oneshot(json_request("POST", &pickup_uri, Some(&driver), json!({ "code": code })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "code {code}");
        let body = body_json(res).await;
        assert_eq!(body["code"], "VALIDATION");
        assert!(body.get("remaining_attempts").is_none());
    }

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            Some(&user),
            json!({ "pickup": "somewhere" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "VALIDATION");

    let raw = Request::builder()
        .method("POST")
        .uri("/users")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let res = app.oneshot(raw).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "VALIDATION");
}

#[tokio::test]
async fn create_order_with_bad_price_returns_400() {
    let (app, _state) = setup();
    let user = create_user(&app, "+4915100000001").await;

    let mut body = order_body();
    body["price"]["driver_earning"] = json!(99.0);

    let response = app
        .oneshot(json_request("POST", "/orders", Some(&user), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn new_order_is_searching_and_announced_to_online_drivers() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (_driver, mut driver_rx) = online_driver(&app, &state, "Dana").await;

    let order = create_order(&app, &user).await;
    assert_eq!(order["status"], "SEARCHING_DRIVER");
    assert!(order["driver_id"].is_null());
    assert_eq!(order["pickup_otp"].as_str().unwrap().len(), 6);
    assert_eq!(order["delivery_otp"].as_str().unwrap().len(), 6);
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));

    let events = drain(&mut driver_rx);
    assert!(events.iter().any(|event| matches!(
        event,
        RealtimeEvent::NewOrderAlert(summary) if summary.id.to_string() == order["id"].as_str().unwrap()
    )));
}

#[tokio::test]
async fn driver_view_hides_checkpoint_codes() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (driver, _rx) = online_driver(&app, &state, "Dana").await;
    let order = create_order(&app, &user).await;
    let order_id = order["id"].as_str().unwrap();

    let res = app
        .clone()
        .oneshot(get_request("/orders/available", Some(&driver)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let available = body_json(res).await;
    assert_eq!(available.as_array().unwrap().len(), 1);
    assert!(available[0].get("pickup_otp").is_none());

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            Some(&driver),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}"), Some(&driver)))
        .await
        .unwrap();
    let body = body_json(res).await;
    assert_eq!(body["status"], "DRIVER_ASSIGNED");
    assert!(body.get("pickup_otp").is_none());
    assert!(body.get("delivery_otp").is_none());
}

#[tokio::test]
async fn stranger_cannot_read_order() {
    let (app, _state) = setup();
    let owner = create_user(&app, "+4915100000001").await;
    let stranger = create_user(&app, "+4915100000002").await;
    let order = create_order(&app, &owner).await;

    let res = app
        .oneshot(get_request(
            &format!("/orders/{}", order["id"].as_str().unwrap()),
            Some(&stranger),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_accepts_bind_exactly_one_driver() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (first, _rx1) = online_driver(&app, &state, "Dana").await;
    let (second, _rx2) = online_driver(&app, &state, "Eli").await;
    let order = create_order(&app, &user).await;
    let uri = format!("/orders/{}/accept", order["id"].as_str().unwrap());

    let (res_a, res_b) = tokio::join!(
        app.clone()
            .oneshot(json_request("POST", &uri, Some(&first), json!({}))),
        app.clone()
            .oneshot(json_request("POST", &uri, Some(&second), json!({}))),
    );
    let (res_a, res_b) = (res_a.unwrap(), res_b.unwrap());

    let statuses = [res_a.status(), res_b.status()];
    assert!(statuses.contains(&StatusCode::OK));
    assert!(statuses.contains(&StatusCode::CONFLICT));

    let (winner, loser) = if res_a.status() == StatusCode::OK {
        (res_a, res_b)
    } else {
        (res_b, res_a)
    };
    assert_eq!(body_json(winner).await["status"], "DRIVER_ASSIGNED");
    let rejection = body_json(loser).await;
    assert_eq!(rejection["code"], "CONFLICT");
    assert!(rejection["error"].as_str().unwrap().contains("already assigned"));
}

#[tokio::test]
async fn full_delivery_flow_with_checkpoints() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (driver, mut driver_rx) = online_driver(&app, &state, "Dana").await;
    let (_other, mut other_rx) = online_driver(&app, &state, "Eli").await;

    let user_id = Uuid::parse_str(&user.id).unwrap();
    let (user_tx, mut user_rx) = mpsc::channel(64);
    let user_channel = state.hub.subscribe(Channel::User(user_id), user_tx);

    let order = create_order(&app, &user).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let pickup_code: u64 = order["pickup_otp"].as_str().unwrap().parse().unwrap();
    let delivery_code = order["delivery_otp"].as_str().unwrap().to_string();
    drain(&mut driver_rx);
    drain(&mut other_rx);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            Some(&driver),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let user_events = drain(&mut user_rx);
    let assigned = user_events
        .iter()
        .find_map(|event| match event {
            RealtimeEvent::DriverAssigned(assigned) => Some(assigned.clone()),
            _ => None,
        })
        .expect("driver-assigned event for the user");
    assert_eq!(assigned.driver.name, "Dana");
    assert_eq!(assigned.pickup_otp, pickup_code.to_string());
    assert_eq!(assigned.delivery_otp, delivery_code);
    assert!(
        drain(&mut other_rx)
            .iter()
            .any(|event| matches!(event, RealtimeEvent::OrderTaken { .. }))
    );
    user_channel.unsubscribe();

    let status_uri = format!("/orders/{order_id}/status");

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &status_uri,
            Some(&driver),
            json!({ "status": "IN_TRANSIT" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &status_uri,
            Some(&driver),
            json!({ "status": "DRIVER_ARRIVED" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &status_uri,
            Some(&driver),
            json!({ "status": "PICKED_UP" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let pickup_uri = format!("/orders/{order_id}/verify-pickup");
    let res = app
        .clone()
        .oneshot(json_request("POST", &pickup_uri, Some(&driver), json!({ "code": pickup_code })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "PICKED_UP");
    assert_eq!(body["pickup_otp_verified"], true);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &pickup_uri,
            Some(&driver),
            json!({ "code": format!(" {pickup_code} ") }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    for status in ["IN_TRANSIT", "REACHED_DESTINATION"] {
        let res = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &status_uri,
                Some(&driver),
                json!({ "status": status }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let delivery_uri = format!("/orders/{order_id}/verify-delivery");
    let wrong = if delivery_code == "999999" { "888888" } else { "999999" };
    let res = app
        .clone()
        .oneshot(json_request("POST", &delivery_uri, Some(&driver), json!({ "code": wrong })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["code"], "INVALID_CODE");

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &delivery_uri,
            Some(&driver),
            json!({ "code": delivery_code }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "DELIVERED");
    assert_eq!(body["delivery_otp_verified"], true);
    assert!(body["delivered_at"].is_string());

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &delivery_uri,
            Some(&driver),
            json!({ "code": delivery_code }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}/history"), Some(&user)))
        .await
        .unwrap();
    let history = body_json(res).await;
    let statuses: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["status"].as_str().unwrap())
        .collect();
    assert_eq!(
        statuses,
        vec![
            "SEARCHING_DRIVER",
            "DRIVER_ASSIGNED",
            "DRIVER_ARRIVED",
            "PICKED_UP",
            "IN_TRANSIT",
            "REACHED_DESTINATION",
            "DELIVERED"
        ]
    );

    let res = app
        .oneshot(get_request("/drivers/me/earnings", Some(&driver)))
        .await
        .unwrap();
    let earnings = body_json(res).await;
    assert_eq!(earnings["total_orders"], 1);
    assert_eq!(earnings["total_earnings"], 11.0);
    assert_eq!(earnings["earnings"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn active_driver_cannot_accept_second_order_until_done() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (driver, _rx) = online_driver(&app, &state, "Dana").await;
    let first = create_order(&app, &user).await;
    let second = create_order(&app, &user).await;

    let accept = |order: &Value| format!("/orders/{}/accept", order["id"].as_str().unwrap());

    let res = app
        .clone()
        .oneshot(json_request("POST", &accept(&first), Some(&driver), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request("POST", &accept(&second), Some(&driver), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{}/cancel", first["id"].as_str().unwrap()),
            Some(&user),
            json!({ "reason": "changed my mind" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request("POST", &accept(&second), Some(&driver), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn user_cancellation_notifies_bound_driver_and_is_terminal() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (driver, _pool_rx) = online_driver(&app, &state, "Dana").await;
    let order = create_order(&app, &user).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let (driver_tx, mut driver_rx) = mpsc::channel(16);
    let _personal = state.hub.subscribe(
        Channel::Driver(Uuid::parse_str(&driver.id).unwrap()),
        driver_tx,
    );

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            Some(&driver),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    drain(&mut driver_rx);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/cancel"),
            Some(&user),
            json!({ "reason": "  no longer needed " }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["cancelled_by"], "USER");
    assert_eq!(body["cancellation_reason"], "no longer needed");

    let events = drain(&mut driver_rx);
    assert!(events.iter().any(|event| matches!(
        event,
        RealtimeEvent::OrderCancelled { order_id: id, .. } if id.to_string() == order_id
    )));

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some(&driver),
            json!({ "status": "DRIVER_ARRIVED" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/cancel"),
            Some(&user),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_otp_flow_with_attempt_cap() {
    let (app, _state) = setup();
    let user = create_user(&app, "+49 151 0000 0009").await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/otp",
            None,
            json!({ "mobile": "+4915100000009" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let issued = body_json(res).await;
    let code = issued["code"].as_str().unwrap().to_string();
    let wrong = if code == "111111" { "222222" } else { "111111" };

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/otp/verify",
            None,
            json!({ "mobile": "+4915100000009", "code": wrong }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(res).await;
    assert_eq!(body["code"], "INVALID_CODE");
    assert_eq!(body["remaining_attempts"], 2);

    let numeric: u64 = code.parse().unwrap();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/otp/verify",
            None,
            json!({ "mobile": "+4915100000009", "code": numeric }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["user_id"], user.id);

    let res = app
        .oneshot(json_request(
            "POST",
            "/auth/otp/verify",
            None,
            json!({ "mobile": "+4915100000009", "code": code }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::GONE);
    assert_eq!(body_json(res).await["code"], "EXPIRED");
}

#[tokio::test]
async fn disconnected_driver_drops_out_of_online_set() {
    let (app, state) = setup();
    let (driver, _rx) = online_driver(&app, &state, "Dana").await;
    let driver_id = Uuid::parse_str(&driver.id).unwrap();

    let (tx, _session_rx) = mpsc::channel(16);
    let mut session = Session::open(state.clone(), CallerContext::driver(driver_id), tx).unwrap();
    session.handle(ClientMessage::GoOnline).await.unwrap();

    let res = app
        .clone()
        .oneshot(get_request("/drivers/online", None))
        .await
        .unwrap();
    let online = body_json(res).await;
    assert_eq!(online["count"], 1);
    assert_eq!(online["drivers"][0], driver.id);

    session.close();

    let res = app
        .clone()
        .oneshot(get_request("/drivers/online", None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["count"], 0);

    let res = app
        .oneshot(get_request("/drivers/me", Some(&driver)))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["is_online"], false);
}

#[tokio::test]
async fn location_ping_reaches_order_subscribers_with_eta() {
    let (app, state) = setup();
    let user = create_user(&app, "+4915100000001").await;
    let (driver, _rx) = online_driver(&app, &state, "Dana").await;
    let order = create_order(&app, &user).await;
    let order_id = Uuid::parse_str(order["id"].as_str().unwrap()).unwrap();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            Some(&driver),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let user_id = Uuid::parse_str(&user.id).unwrap();
    let (user_tx, mut user_rx) = mpsc::channel(16);
    let mut user_session = Session::open(state.clone(), CallerContext::user(user_id), user_tx).unwrap();
    user_session
        .handle(ClientMessage::SubscribeOrder { order_id })
        .await
        .unwrap();
    assert_eq!(user_session.tracked_orders(), vec![order_id]);

    let stranger = create_user(&app, "+4915100000002").await;
    let (stranger_tx, _stranger_rx) = mpsc::channel(16);
    let mut stranger_session = Session::open(
        state.clone(),
        CallerContext::user(Uuid::parse_str(&stranger.id).unwrap()),
        stranger_tx,
    )
    .unwrap();
    assert!(
        stranger_session
            .handle(ClientMessage::SubscribeOrder { order_id })
            .await
            .is_err()
    );

    let driver_id = Uuid::parse_str(&driver.id).unwrap();
    let (driver_tx, _driver_rx) = mpsc::channel(16);
    let mut driver_session = Session::open(state.clone(), CallerContext::driver(driver_id), driver_tx).unwrap();
    driver_session
        .handle(ClientMessage::LocationPing {
            order_id: Some(order_id),
            lat: 52.52,
            lng: 13.40,
        })
        .await
        .unwrap();

    let relayed = drain(&mut user_rx)
        .into_iter()
        .find_map(|event| match event {
            RealtimeEvent::DriverLocation(location) => Some(location),
            _ => None,
        })
        .expect("driver-location relayed to the order channel");
    assert_eq!(relayed.order_id, order_id);
    assert_eq!(relayed.eta_type, EtaTarget::Pickup);
    assert!(relayed.eta_minutes.is_some());
    assert!(relayed.estimated_arrival.is_some());

    let stored = state.driver(driver_id).unwrap();
    assert_eq!(stored.location.unwrap().lat, 52.52);

    user_session.close();
    stranger_session.close();
    driver_session.close();
}
