//! HTTP surface over the in-memory store: status codes, response envelopes
//! and the caller identity header.

#![allow(clippy::unwrap_used)]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::Harness;
use event_booking::controllers;
use event_booking::middleware::USER_ID_HEADER;
use event_booking::models::RegistrationMode;

/// Sends one request and returns the status with the decoded JSON body.
async fn json_request(
    router: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(USER_ID_HEADER, user.to_string());
    }

    let body = match body {
        Some(json_body) => {
            request = request.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!(null));
    (status, json)
}

#[tokio::test]
async fn health_and_root() {
    let h = Harness::new();
    let router = controllers::app(h.state.clone());

    let (status, body) = json_request(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = json_request(&router, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "event_booking");
}

#[tokio::test]
async fn seat_listing_and_availability() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let router = controllers::app(h.state.clone());

    let (status, body) =
        json_request(&router, "GET", &format!("/api/events/{}/seats", ev.event_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_seats"], 4);
    assert_eq!(body["data"]["available_seats"], 4);
    assert_eq!(body["data"]["seats"][2]["type"], "VIP");
    assert_eq!(body["data"]["seats"][0]["status"], "AVAILABLE");

    let (status, body) = json_request(
        &router,
        "GET",
        &format!("/api/events/{}/seats/available", ev.event_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["available_seats"], 4);

    let (status, body) =
        json_request(&router, "GET", &format!("/api/events/{}/seats", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn locking_requires_a_caller_identity() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let router = controllers::app(h.state.clone());
    let uri = format!("/api/events/{}/seats/lock", ev.event_id);
    let body = json!({ "seat_ids": [ev.seat_ids[0]] });

    let (status, _) = json_request(&router, "POST", &uri, None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri(&uri)
        .header("Content-Type", "application/json")
        .header(USER_ID_HEADER, "not-a-uuid")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn lock_conflict_reports_the_contested_seats() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let router = controllers::app(h.state.clone());
    let uri = format!("/api/events/{}/seats/lock", ev.event_id);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, body) = json_request(
        &router,
        "POST",
        &uri,
        Some(alice),
        Some(json!({ "seat_ids": [ev.seat_ids[1]], "ttl_secs": 120 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_id"], alice.to_string());

    let (status, body) = json_request(
        &router,
        "POST",
        &uri,
        Some(bob),
        Some(json!({ "seat_ids": [ev.seat_ids[0], ev.seat_ids[1]] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["conflicting_seat_ids"], json!([ev.seat_ids[1]]));

    let (status, _) = json_request(&router, "POST", &uri, Some(bob), Some(json!({ "seat_ids": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn booking_and_webhook_round_trip() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let router = controllers::app(h.state.clone());
    let user = Uuid::new_v4();

    let (status, _) = json_request(
        &router,
        "POST",
        &format!("/api/events/{}/seats/lock", ev.event_id),
        Some(user),
        Some(json!({ "seat_ids": [ev.seat_ids[2]] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = json_request(
        &router,
        "POST",
        "/api/bookings",
        Some(user),
        Some(json!({ "event_id": ev.event_id, "seat_ids": [ev.seat_ids[2]] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "PENDING");
    let booking_id = body["data"]["id"].as_str().unwrap().to_string();

    let webhook = json!({
        "booking_id": booking_id,
        "transaction_id": "pay_abc",
        "gateway": "RAZORPAY",
        "amount": "250.00",
        "status": "CAPTURED",
        "payload": { "event": "payment.captured" },
    });
    let (status, body) =
        json_request(&router, "POST", "/api/payments/webhook", None, Some(webhook.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["booking"]["status"], "CONFIRMED");
    let qr = body["data"]["booking"]["qr_code_data"].clone();
    assert!(qr.is_string());

    // gateway retry
    let (status, body) = json_request(&router, "POST", "/api/payments/webhook", None, Some(webhook)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["booking"]["qr_code_data"], qr);

    let (status, body) =
        json_request(&router, "GET", &format!("/api/bookings/{booking_id}/seats"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["price"], "250.00");
}

#[tokio::test]
async fn bookings_are_private_to_their_owner() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let router = controllers::app(h.state.clone());
    let (owner, stranger) = (Uuid::new_v4(), Uuid::new_v4());

    h.state.locks.lock_seats(ev.event_id, owner, &[ev.seat_ids[0]], None).await.unwrap();
    let booking = h
        .state
        .bookings
        .create_booking(ev.event_id, owner, &[ev.seat_ids[0]])
        .await
        .unwrap();

    let uri = format!("/api/bookings/{}", booking.id);
    let (status, _) = json_request(&router, "GET", &uri, Some(stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = json_request(&router, "GET", &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], booking.id.to_string());

    let (status, _) = json_request(
        &router,
        "POST",
        &format!("/api/bookings/{}/cancel", booking.id),
        Some(stranger),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = json_request(
        &router,
        "POST",
        &format!("/api/bookings/{}/refunds", booking.id),
        Some(stranger),
        Some(json!({ "amount": "10.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        json_request(&router, "GET", &format!("/api/bookings/{}", Uuid::new_v4()), Some(owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = json_request(
        &router,
        "POST",
        &format!("/api/bookings/{}/cancel", booking.id),
        Some(owner),
        Some(json!({ "reason": "duplicate order" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CANCELLED");

    let (status, _) = json_request(
        &router,
        "POST",
        &format!("/api/bookings/{}/cancel", booking.id),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn registration_endpoints() {
    let h = Harness::new();
    let event_id = h.admission_event(1, RegistrationMode::AutoApprove).await;
    let router = controllers::app(h.state.clone());
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
    let uri = format!("/api/events/{event_id}/registrations");

    let (status, body) = json_request(&router, "POST", &uri, Some(first), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "APPROVED");

    let (status, body) = json_request(&router, "POST", &uri, Some(second), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "WAITLISTED");
    assert_eq!(body["data"]["data"]["position"], 1);

    let (status, body) =
        json_request(&router, "GET", &format!("/api/events/{event_id}/waitlist"), Some(first), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) =
        json_request(&router, "POST", &format!("{uri}/cancel"), Some(first), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CANCELLED");

    let (status, body) =
        json_request(&router, "GET", &format!("/api/events/{event_id}/waitlist"), Some(first), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(h.registration_count(event_id).await, 1);

    let (status, _) = json_request(
        &router,
        "POST",
        &format!("{uri}/{second}/reject"),
        Some(first),
        Some(json!({ "reason": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
