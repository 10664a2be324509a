//! API integration tests
//!
//! These run against a live server (`cargo run`) with a freshly migrated
//! database seeded with two users: id 1 (admin) and id 2 (student).
//! Run with: cargo test -- --ignored

use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use lendkit_server::models::user::{Role, UserClaims};

const BASE_URL: &str = "http://localhost:8080/api/v1";
const DEV_SECRET: &str = "change-this-secret-in-production";

fn admin_token() -> String {
    UserClaims::new(1, "admin@lendkit.test", Role::Admin, 1)
        .create_token(DEV_SECRET)
        .expect("Failed to mint admin token")
}

fn student_token() -> String {
    UserClaims::new(2, "student@lendkit.test", Role::Student, 1)
        .create_token(DEV_SECRET)
        .expect("Failed to mint student token")
}

/// Create an equipment item and return its JSON
async fn create_equipment(client: &Client, name: &str, quantity: i32) -> Value {
    let response = client
        .post(format!("{}/equipment", BASE_URL))
        .bearer_auth(admin_token())
        .json(&json!({
            "name": name,
            "category": "sports",
            "condition": "good",
            "quantity": quantity
        }))
        .send()
        .await
        .expect("Failed to create equipment");

    assert_eq!(response.status(), 201);
    response.json().await.expect("Failed to parse equipment")
}

/// Submit a borrow request for a single line item
async fn create_request(client: &Client, equipment_id: i64, quantity: i32) -> reqwest::Response {
    let borrow = Utc::now();
    let ret = borrow + Duration::days(7);
    client
        .post(format!("{}/requests", BASE_URL))
        .bearer_auth(student_token())
        .json(&json!({
            "items": [{"equipment": equipment_id, "quantity": quantity, "return_date": ret}],
            "borrow_date": borrow,
            "reason": "Needed for the weekend tournament practice sessions"
        }))
        .send()
        .await
        .expect("Failed to send request")
}

async fn get_equipment(client: &Client, id: i64) -> Value {
    let response = client
        .get(format!("{}/equipment/{}", BASE_URL, id))
        .bearer_auth(admin_token())
        .send()
        .await
        .expect("Failed to get equipment");
    assert!(response.status().is_success());
    response.json().await.expect("Failed to parse equipment")
}

async fn set_status(client: &Client, request_id: i64, body: Value) -> reqwest::Response {
    client
        .put(format!("{}/requests/{}/status", BASE_URL, request_id))
        .bearer_auth(admin_token())
        .json(&body)
        .send()
        .await
        .expect("Failed to update status")
}

#[tokio::test]
#[ignore]
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_create_request_reserves_inventory() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Basketball", 10).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let response = create_request(&client, equipment_id, 3).await;
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["request"]["status"], "pending");
    assert!(body["request"]["expires_at"].is_string());
    assert!(body["request"]["request_id"]
        .as_str()
        .unwrap()
        .starts_with("REQ-"));

    // Soft reservation took effect immediately
    let after = get_equipment(&client, equipment_id).await;
    assert_eq!(after["available"], 7);
    assert_eq!(after["quantity"], 10);
}

#[tokio::test]
#[ignore]
async fn test_approve_keeps_reservation() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Microscope", 10).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let created: Value = create_request(&client, equipment_id, 3)
        .await
        .json()
        .await
        .unwrap();
    let request_id = created["request"]["id"].as_i64().unwrap();

    let response = set_status(&client, request_id, json!({"status": "approved"})).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request"]["status"], "approved");
    assert!(body["request"]["expires_at"].is_null());

    let after = get_equipment(&client, equipment_id).await;
    assert_eq!(after["available"], 7);
}

#[tokio::test]
#[ignore]
async fn test_reject_releases_reservation() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Keyboard", 10).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let created: Value = create_request(&client, equipment_id, 3)
        .await
        .json()
        .await
        .unwrap();
    let request_id = created["request"]["id"].as_i64().unwrap();

    let response = set_status(
        &client,
        request_id,
        json!({"status": "rejected", "rejection_reason": "Out for maintenance"}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request"]["status"], "rejected");
    assert_eq!(body["request"]["rejection_reason"], "Out for maintenance");

    let after = get_equipment(&client, equipment_id).await;
    assert_eq!(after["available"], 10);
}

#[tokio::test]
#[ignore]
async fn test_return_releases_and_stamps_date() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Violin", 10).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let created: Value = create_request(&client, equipment_id, 3)
        .await
        .json()
        .await
        .unwrap();
    let request_id = created["request"]["id"].as_i64().unwrap();

    set_status(&client, request_id, json!({"status": "approved"})).await;
    let response = set_status(&client, request_id, json!({"status": "returned"})).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request"]["status"], "returned");
    assert!(body["request"]["items"][0]["actual_return_date"].is_string());

    let after = get_equipment(&client, equipment_id).await;
    assert_eq!(after["available"], 10);
}

#[tokio::test]
#[ignore]
async fn test_overbooking_rejected_with_available_count() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Projector", 10).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    // First request holds 3 units
    assert_eq!(create_request(&client, equipment_id, 3).await.status(), 201);

    // Overlapping request for 8 exceeds the remaining 7
    let response = create_request(&client, equipment_id, 8).await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("7"));
}

#[tokio::test]
#[ignore]
async fn test_requesting_exactly_available_succeeds() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Tripod", 5).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let response = create_request(&client, equipment_id, 5).await;
    assert_eq!(response.status(), 201);

    let after = get_equipment(&client, equipment_id).await;
    assert_eq!(after["available"], 0);
}

#[tokio::test]
#[ignore]
async fn test_return_date_must_follow_borrow_date() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Camera", 5).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let borrow = Utc::now();
    let response = Client::new()
        .post(format!("{}/requests", BASE_URL))
        .bearer_auth(student_token())
        .json(&json!({
            "items": [{"equipment": equipment_id, "quantity": 1, "return_date": borrow}],
            "borrow_date": borrow,
            "reason": "Photography club exhibition over the weekend"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_delete_approved_request_forbidden() {
    let client = Client::new();
    let equipment = create_equipment(&client, "Telescope", 5).await;
    let equipment_id = equipment["id"].as_i64().unwrap();

    let created: Value = create_request(&client, equipment_id, 1)
        .await
        .json()
        .await
        .unwrap();
    let request_id = created["request"]["id"].as_i64().unwrap();

    set_status(&client, request_id, json!({"status": "approved"})).await;

    let response = client
        .delete(format!("{}/requests/{}", BASE_URL, request_id))
        .bearer_auth(admin_token())
        .send()
        .await
        .expect("Failed to send delete");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_student_listing_is_scoped_to_own_requests() {
    let client = Client::new();

    let response = client
        .get(format!("{}/requests", BASE_URL))
        .bearer_auth(student_token())
        .send()
        .await
        .expect("Failed to list requests");

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    for request in body.as_array().unwrap() {
        assert_eq!(request["user_id"], 2);
    }
}

#[tokio::test]
#[ignore]
async fn test_overdue_listing_requires_staff() {
    let client = Client::new();

    let response = client
        .get(format!("{}/requests/overdue", BASE_URL))
        .bearer_auth(student_token())
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}

#[tokio::test]
#[ignore]
async fn test_manual_reminder_run_is_admin_only() {
    let client = Client::new();

    let forbidden = client
        .post(format!("{}/requests/reminders/run", BASE_URL))
        .bearer_auth(student_token())
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(forbidden.status(), 403);

    let response = client
        .post(format!("{}/requests/reminders/run", BASE_URL))
        .bearer_auth(admin_token())
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["sent"].is_number());
}

#[tokio::test]
#[ignore]
async fn test_missing_token_is_unauthorized() {
    let client = Client::new();

    let response = client
        .get(format!("{}/equipment", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}
