use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use ulid::Ulid;

use vespers::engine::{Engine, SchedulingPolicy};
use vespers::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

const FUTURE: &str = "2099-06-15";

async fn start_test_server_with(policy: SchedulingPolicy) -> (String, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("vespers_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(dir.join("vespers.wal"), Arc::new(NotifyHub::new()), policy).unwrap(),
    );

    let served = engine.clone();
    tokio::spawn(async move {
        let _ = vespers::http::serve(listener, served, std::future::pending()).await;
    });

    (format!("http://{addr}"), engine)
}

async fn start_test_server() -> (String, Arc<Engine>) {
    start_test_server_with(SchedulingPolicy::default()).await
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"]["code"].as_str().unwrap().to_string()
}

fn booking_body(date: &str, time: &str) -> Value {
    json!({
        "type": "Baptism",
        "venue": "St. Joseph Cathedral",
        "date": date,
        "time": time,
        "name": "Juan Dela Cruz",
        "phone": "09123456789",
        "email": "juan@example.com",
    })
}

// ── Schedule entries ─────────────────────────────────────────

#[tokio::test]
async fn create_then_conflict_on_same_slot() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let body = json!({
        "type": "Matrimony",
        "date": FUTURE,
        "time": "9:30 AM",
        "place": "Main Church",
        "priest": "Fr. Santos",
    });
    let created = client
        .post(format!("{base}/api/schedules"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let entry: Value = created.json().await.unwrap();
    assert_eq!(entry["type"], "Matrimony");
    assert_eq!(entry["time"], "9:30 AM");
    assert_eq!(entry["officiant"], "Fr. Santos");

    let clash = client
        .post(format!("{base}/api/schedules"))
        .json(&json!({
            "type": "Baptism",
            "date": FUTURE,
            "time": "9:30 AM",
            "place": "Chapel",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(clash.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(clash).await, "slot_conflict");

    let listed: Vec<Value> = client
        .get(format!("{base}/api/schedules?from={FUTURE}&to={FUTURE}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], entry["id"]);
}

#[tokio::test]
async fn bad_input_is_a_validation_error() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let off_grid = client
        .post(format!("{base}/api/schedules"))
        .json(&json!({
            "type": "Baptism",
            "date": FUTURE,
            "time": "9:00 AM",
            "place": "Chapel",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(off_grid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(off_grid).await, "validation");

    let past = client
        .post(format!("{base}/api/bookings"))
        .json(&booking_body("2000-01-01", "8:00 AM"))
        .send()
        .await
        .unwrap();
    assert_eq!(past.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(past).await, "validation");

    let malformed = client
        .post(format!("{base}/api/schedules"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let bad_window = client
        .get(format!("{base}/api/schedules?from=2099-06-20&to=2099-06-10"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_window.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_and_delete_entry() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let entry: Value = client
        .post(format!("{base}/api/schedules"))
        .json(&json!({
            "type": "Confirmation",
            "date": FUTURE,
            "time": "11:00 AM",
            "place": "Chapel",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = entry["id"].as_str().unwrap();

    let moved: Value = client
        .put(format!("{base}/api/schedules/{id}"))
        .json(&json!({ "time": "2:00 PM" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(moved["time"], "2:00 PM");
    assert_eq!(moved["place"], "Chapel");

    let deleted = client
        .delete(format!("{base}/api/schedules/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let again = client
        .delete(format!("{base}/api/schedules/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(again).await, "not_found");
}

// ── Booking queue ────────────────────────────────────────────

#[tokio::test]
async fn booking_flow_through_approval() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let submitted = client
        .post(format!("{base}/api/bookings"))
        .json(&booking_body(FUTURE, "3:30 PM"))
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status(), StatusCode::CREATED);
    let booking: Value = submitted.json().await.unwrap();
    assert_eq!(booking["status"], "Pending");
    let id = booking["id"].as_str().unwrap();

    // A pending request does not hold the slot.
    let slots: Vec<Value> = client
        .get(format!("{base}/api/availability?date={FUTURE}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let slot = slots.iter().find(|s| s["time"] == "3:30 PM").unwrap();
    assert_eq!(slot["available"], true);

    let approved: Value = client
        .put(format!("{base}/api/bookings/{id}"))
        .json(&json!({ "status": "Approved" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(approved["status"], "Approved");
    assert!(approved["schedule_entry_id"].is_string());

    let slots: Vec<Value> = client
        .get(format!("{base}/api/availability?date={FUTURE}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let slot = slots.iter().find(|s| s["time"] == "3:30 PM").unwrap();
    assert_eq!(slot["available"], false);

    let day: Vec<Value> = client
        .get(format!("{base}/api/calendar/day/{FUTURE}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(day.len(), 1);
    assert_eq!(day[0]["type"], "Baptism");

    // A second decision on a terminal request is refused.
    let twice = client
        .post(format!("{base}/api/bookings/{id}/reject"))
        .send()
        .await
        .unwrap();
    assert_eq!(twice.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(twice).await, "invalid_state");

    // The slot is now committed, so a new submission for it is refused.
    let late = client
        .post(format!("{base}/api/bookings"))
        .json(&booking_body(FUTURE, "3:30 PM"))
        .send()
        .await
        .unwrap();
    assert_eq!(late.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn competing_requests_only_one_approved() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let booking: Value = client
            .post(format!("{base}/api/bookings"))
            .json(&booking_body(FUTURE, "8:00 AM"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ids.push(booking["id"].as_str().unwrap().to_string());
    }

    let first = client
        .post(format!("{base}/api/bookings/{}/approve", ids[0]))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = client
        .post(format!("{base}/api/bookings/{}/approve", ids[1]))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(second).await, "slot_conflict");

    let loser: Value = client
        .get(format!("{base}/api/bookings/{}", ids[1]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(loser["status"], "Pending");

    let summary: Value = client
        .get(format!("{base}/api/bookings/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary, json!({ "pending": 1, "approved": 1, "rejected": 0 }));

    let pending: Vec<Value> = client
        .get(format!("{base}/api/bookings?status=Pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], ids[1].as_str());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();
    let missing = Ulid::new();

    let booking = client
        .get(format!("{base}/api/bookings/{missing}"))
        .send()
        .await
        .unwrap();
    assert_eq!(booking.status(), StatusCode::NOT_FOUND);

    let entry = client
        .put(format!("{base}/api/schedules/{missing}"))
        .json(&json!({ "place": "Chapel" }))
        .send()
        .await
        .unwrap();
    assert_eq!(entry.status(), StatusCode::NOT_FOUND);

    let garbage = client
        .get(format!("{base}/api/bookings/not-an-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn closed_intake_is_service_unavailable() {
    let policy = SchedulingPolicy {
        accepting_bookings: false,
        ..SchedulingPolicy::default()
    };
    let (base, _engine) = start_test_server_with(policy).await;
    let client = Client::new();

    let refused = client
        .post(format!("{base}/api/bookings"))
        .json(&booking_body(FUTURE, "8:00 AM"))
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(refused).await, "bookings_closed");

    // Staff scheduling still works.
    let created = client
        .post(format!("{base}/api/schedules"))
        .json(&json!({
            "type": "MassIntention",
            "date": FUTURE,
            "time": "8:00 AM",
            "place": "Main Church",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
}

// ── Calendar ─────────────────────────────────────────────────

#[tokio::test]
async fn month_view_marks_busy_days() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/api/schedules"))
        .json(&json!({
            "type": "Memorial",
            "date": "2099-02-10",
            "time": "12:30 PM",
            "place": "Chapel",
        }))
        .send()
        .await
        .unwrap();

    let month: Value = client
        .get(format!("{base}/api/calendar/month/2099-02"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let days = month.as_object().unwrap();
    assert_eq!(days.len(), 28);
    assert_eq!(days["2099-02-10"], true);
    assert_eq!(days["2099-02-11"], false);

    let invalid = client
        .get(format!("{base}/api/calendar/month/2099-13"))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn change_feed_streams_schedule_writes() {
    let (base, engine) = start_test_server().await;
    let client = Client::new();

    let mut feed = client
        .get(format!("{base}/api/calendar/changes"))
        .send()
        .await
        .unwrap();
    assert_eq!(feed.status(), StatusCode::OK);

    // Wait for the handler to subscribe before writing.
    for _ in 0..50 {
        if engine.notify.receiver_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client
        .post(format!("{base}/api/schedules"))
        .json(&json!({
            "type": "Conversion",
            "date": FUTURE,
            "time": "5:00 PM",
            "place": "Parish Hall",
        }))
        .send()
        .await
        .unwrap();

    let mut received = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !received.contains("\n\n") {
        let chunk = tokio::time::timeout_at(deadline, feed.chunk())
            .await
            .expect("timed out waiting for change event")
            .unwrap()
            .expect("feed closed");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.contains("event: change"), "got {received:?}");
    assert!(received.contains("\"kind\":\"created\""), "got {received:?}");
    assert!(received.contains(FUTURE), "got {received:?}");
}

// ── Announcements & health ───────────────────────────────────

#[tokio::test]
async fn announcements_lifecycle() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let posted = client
        .post(format!("{base}/api/announcements"))
        .json(&json!({ "content": "No evening mass on Friday" }))
        .send()
        .await
        .unwrap();
    assert_eq!(posted.status(), StatusCode::CREATED);
    let announcement: Value = posted.json().await.unwrap();
    assert_eq!(announcement["active"], true);
    let id = announcement["id"].as_str().unwrap();

    let empty = client
        .post(format!("{base}/api/announcements"))
        .json(&json!({ "content": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let hidden: Value = client
        .put(format!("{base}/api/announcements/{id}"))
        .json(&json!({ "is_active": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hidden["active"], false);

    let active: Vec<Value> = client
        .get(format!("{base}/api/announcements?active=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(active.is_empty());

    let all: Vec<Value> = client
        .get(format!("{base}/api/announcements"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let deleted = client
        .delete(format!("{base}/api/announcements/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn health_and_slots() {
    let (base, _engine) = start_test_server().await;
    let client = Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let slots: Vec<String> = client
        .get(format!("{base}/api/slots"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        slots,
        vec!["8:00 AM", "9:30 AM", "11:00 AM", "12:30 PM", "2:00 PM", "3:30 PM", "5:00 PM"]
    );
}
