//! Background job integration tests
//!
//! These run the scheduler passes directly against a freshly migrated
//! database (no running server needed). They read `DATABASE_URL` from the
//! environment or `.env`. Passes observe the whole table, so run these
//! single-threaded:
//! cargo test --test scheduler_tests -- --ignored --test-threads=1

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use lendkit_server::config::EmailConfig;
use lendkit_server::repository::Repository;
use lendkit_server::services::{
    email::EmailService,
    expiration::ExpirationScheduler,
    notifications::AvailabilityNotifier,
    overdue::OverdueMonitor,
    reconciler::{ConsistencyReconciler, SystemClock},
};

async fn test_pool() -> PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("Failed to connect to database")
}

fn test_email_service() -> EmailService {
    // Points at nothing; send failures are logged and swallowed by the
    // fan-out, which is exactly the behavior under test
    EmailService::new(EmailConfig {
        smtp_host: "localhost".to_string(),
        smtp_port: 2525,
        smtp_username: None,
        smtp_password: None,
        smtp_from: "noreply@lendkit.test".to_string(),
        smtp_from_name: None,
        smtp_use_tls: false,
    })
}

fn expiration_scheduler(repository: Repository) -> ExpirationScheduler {
    let notifier = Arc::new(AvailabilityNotifier::new(
        repository.clone(),
        test_email_service(),
    ));
    ExpirationScheduler::new(repository, notifier, 60)
}

/// Unique suffix so reruns against the same database never collide on
/// unique columns
fn unique_tag() -> i64 {
    Utc::now().timestamp_micros()
}

async fn seed_user(pool: &PgPool) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (name, email, role) VALUES ($1, $2, 'student') RETURNING id",
    )
    .bind("Taylor Reed")
    .bind(format!("taylor.reed+{}@lendkit.test", unique_tag()))
    .fetch_one(pool)
    .await
    .expect("Failed to seed user")
}

async fn seed_equipment(pool: &PgPool, name: &str, quantity: i32, available: i32) -> i32 {
    sqlx::query_scalar(
        r#"
        INSERT INTO equipment (name, category, condition, quantity, available)
        VALUES ($1, 'sports', 'good', $2, $3)
        RETURNING id
        "#,
    )
    .bind(format!("{} {}", name, unique_tag()))
    .bind(quantity)
    .bind(available)
    .fetch_one(pool)
    .await
    .expect("Failed to seed equipment")
}

async fn seed_request(
    pool: &PgPool,
    user_id: i32,
    status: &str,
    expires_at: Option<DateTime<Utc>>,
) -> i32 {
    sqlx::query_scalar(
        r#"
        INSERT INTO requests (request_id, user_id, borrow_date, status, reason, expires_at)
        VALUES ($1, $2, now(), $3, 'Borrowed for the regional robotics tournament', $4)
        RETURNING id
        "#,
    )
    .bind(format!("REQ-T{}", unique_tag()))
    .bind(user_id)
    .bind(status)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .expect("Failed to seed request")
}

async fn seed_item(
    pool: &PgPool,
    request_pk: i32,
    equipment_id: i32,
    quantity: i32,
    return_date: DateTime<Utc>,
    status: &str,
) -> i32 {
    sqlx::query_scalar(
        r#"
        INSERT INTO request_items
            (request_id, equipment_id, equipment_name, equipment_category,
             quantity, return_date, status)
        VALUES ($1, $2, 'Seeded item', 'sports', $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(request_pk)
    .bind(equipment_id)
    .bind(quantity)
    .bind(return_date)
    .bind(status)
    .fetch_one(pool)
    .await
    .expect("Failed to seed request item")
}

async fn available_of(pool: &PgPool, equipment_id: i32) -> i32 {
    sqlx::query_scalar("SELECT available FROM equipment WHERE id = $1")
        .bind(equipment_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read equipment")
}

#[tokio::test]
#[ignore]
async fn test_expiration_releases_units_and_records_history() {
    let pool = test_pool().await;
    let repository = Repository::new(pool.clone());
    let scheduler = expiration_scheduler(repository);

    let user_id = seed_user(&pool).await;
    let equipment_id = seed_equipment(&pool, "Stopwatch", 10, 7).await;
    let request_pk = seed_request(
        &pool,
        user_id,
        "pending",
        Some(Utc::now() - Duration::hours(1)),
    )
    .await;
    seed_item(
        &pool,
        request_pk,
        equipment_id,
        3,
        Utc::now() + Duration::days(7),
        "pending",
    )
    .await;

    let expired = scheduler.process_expired().await.expect("Pass failed");
    assert!(expired >= 1);

    // Reservation released back to the pool
    assert_eq!(available_of(&pool, equipment_id).await, 10);

    let request = sqlx::query("SELECT status, expires_at, expired_reason FROM requests WHERE id = $1")
        .bind(request_pk)
        .fetch_one(&pool)
        .await
        .expect("Failed to read request");
    assert_eq!(request.get::<String, _>("status"), "expired");
    assert!(request.get::<Option<DateTime<Utc>>, _>("expires_at").is_none());
    assert!(request.get::<Option<String>, _>("expired_reason").is_some());

    let item_status: String =
        sqlx::query_scalar("SELECT status FROM request_items WHERE request_id = $1")
            .bind(request_pk)
            .fetch_one(&pool)
            .await
            .expect("Failed to read item");
    assert_eq!(item_status, "expired");

    // History entry attributed to the request's owner by convention
    let actor: Option<i32> = sqlx::query_scalar(
        "SELECT actor_id FROM status_history WHERE request_id = $1 AND status = 'expired'",
    )
    .bind(request_pk)
    .fetch_one(&pool)
    .await
    .expect("Failed to read history");
    assert_eq!(actor, Some(user_id));
}

#[tokio::test]
#[ignore]
async fn test_expiration_pass_with_nothing_eligible_is_noop() {
    let pool = test_pool().await;
    let repository = Repository::new(pool.clone());
    let scheduler = expiration_scheduler(repository);

    // First pass drains whatever is eligible; with the queue empty the
    // next pass must report zero
    scheduler.process_expired().await.expect("Drain pass failed");
    let expired = scheduler.process_expired().await.expect("No-op pass failed");
    assert_eq!(expired, 0);

    // A pending request still inside its window is left alone
    let user_id = seed_user(&pool).await;
    let equipment_id = seed_equipment(&pool, "Metronome", 5, 4).await;
    let request_pk = seed_request(
        &pool,
        user_id,
        "pending",
        Some(Utc::now() + Duration::hours(23)),
    )
    .await;
    seed_item(
        &pool,
        request_pk,
        equipment_id,
        1,
        Utc::now() + Duration::days(7),
        "pending",
    )
    .await;

    let expired = scheduler.process_expired().await.expect("Pass failed");
    assert_eq!(expired, 0);
    assert_eq!(available_of(&pool, equipment_id).await, 4);
}

#[tokio::test]
#[ignore]
async fn test_overdue_pass_flags_without_touching_inventory() {
    let pool = test_pool().await;
    let repository = Repository::new(pool.clone());
    let monitor = OverdueMonitor::new(repository, 60);

    let user_id = seed_user(&pool).await;
    let equipment_id = seed_equipment(&pool, "Oscilloscope", 5, 2).await;
    let request_pk = seed_request(&pool, user_id, "approved", None).await;
    let item_id = seed_item(
        &pool,
        request_pk,
        equipment_id,
        3,
        Utc::now() - Duration::days(2),
        "approved",
    )
    .await;

    let flagged = monitor.process_overdue().await.expect("Pass failed");
    assert!(flagged >= 1);

    let request_status: String = sqlx::query_scalar("SELECT status FROM requests WHERE id = $1")
        .bind(request_pk)
        .fetch_one(&pool)
        .await
        .expect("Failed to read request");
    assert_eq!(request_status, "overdue");

    let item_status: String =
        sqlx::query_scalar("SELECT status FROM request_items WHERE id = $1")
            .bind(item_id)
            .fetch_one(&pool)
            .await
            .expect("Failed to read item");
    assert_eq!(item_status, "overdue");

    // The equipment is still out
    assert_eq!(available_of(&pool, equipment_id).await, 2);

    // Flipped items fall out of the scan, so this request stays untouched
    monitor.process_overdue().await.expect("Second pass failed");
    let history_entries: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM status_history WHERE request_id = $1 AND status = 'overdue'",
    )
    .bind(request_pk)
    .fetch_one(&pool)
    .await
    .expect("Failed to count history");
    assert_eq!(history_entries, 1);
}

#[tokio::test]
#[ignore]
async fn test_reconciler_heals_drift_then_is_idempotent() {
    let pool = test_pool().await;
    let repository = Repository::new(pool.clone());
    let reconciler = ConsistencyReconciler::new(repository, 300, Arc::new(SystemClock));

    let user_id = seed_user(&pool).await;
    // 4 units held by an active item, so ground truth says available = 6,
    // but the stored count has drifted to 9
    let equipment_id = seed_equipment(&pool, "Spectrometer", 10, 9).await;
    let request_pk = seed_request(
        &pool,
        user_id,
        "pending",
        Some(Utc::now() + Duration::hours(23)),
    )
    .await;
    seed_item(
        &pool,
        request_pk,
        equipment_id,
        4,
        Utc::now() + Duration::days(7),
        "pending",
    )
    .await;

    let first = reconciler.reconcile_ids(&[equipment_id]).await;
    assert_eq!(first.checked, 1);
    assert_eq!(first.fixed, 1);
    assert_eq!(available_of(&pool, equipment_id).await, 6);

    let second = reconciler.reconcile_ids(&[equipment_id]).await;
    assert_eq!(second.checked, 1);
    assert_eq!(second.fixed, 0);
    assert_eq!(available_of(&pool, equipment_id).await, 6);
}
