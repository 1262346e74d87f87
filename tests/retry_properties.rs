//! Retry behaviour of `Database::execute` against a scripted pool.
//!
//! All tests run on a paused clock, so backoff sleeps complete instantly while
//! the measured gaps stay exact.

mod helpers;

use std::time::Duration;

use helpers::{assert_backoff, scripted_database, ScriptedHandle, Step};
use pg_resilience::{ErrorKind, QueryRequest, SqlValue, MAX_RETRIES};

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let pool = ScriptedHandle::new(
        "primary",
        vec![Step::ConnectionReset, Step::ConnectionReset],
        Step::Succeed,
    );
    let (db, _) = scripted_database(pool.clone(), vec![]).await;

    let started = tokio::time::Instant::now();
    let result = db
        .execute("SELECT * FROM messages WHERE user_id = $1", &[SqlValue::Int(7)])
        .await
        .expect("third attempt should succeed");

    assert_eq!(result.row_count, 1);
    assert_eq!(pool.call_count(), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_backoff(&pool.gaps(), &[100, 200]);
    assert_eq!(db.stats().retries(), 2);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_stop_after_four_attempts() {
    for step in [Step::ConnectionReset, Step::AcquireTimeout] {
        let pool = ScriptedHandle::new("primary", vec![], step);
        let (db, _) = scripted_database(pool.clone(), vec![]).await;

        let err = db.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.attempts() as usize, MAX_RETRIES + 1);
        assert_eq!(pool.call_count(), MAX_RETRIES + 1);

        let gaps = pool.gaps();
        assert_backoff(&gaps, &[100, 200, 400]);
        assert!(gaps.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[tokio::test(start_paused = true)]
async fn structural_errors_are_returned_after_one_attempt() {
    let cases = [
        (Step::UndefinedTable, ErrorKind::Schema, "42P01"),
        (Step::UniqueViolation, ErrorKind::ConstraintViolation, "23505"),
        (Step::SerializationFailure, ErrorKind::Query, "40001"),
    ];
    for (step, kind, code) in cases {
        let pool = ScriptedHandle::new("primary", vec![step], Step::Succeed);
        let (db, _) = scripted_database(pool.clone(), vec![]).await;

        let err = db.execute("SELECT * FROM missing", &[]).await.unwrap_err();
        assert_eq!(err.kind(), kind);
        assert_eq!(err.code(), Some(code));
        assert_eq!(err.attempts(), 1);
        assert_eq!(pool.call_count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn missing_table_fails_without_backoff() {
    let pool = ScriptedHandle::new("primary", vec![Step::UndefinedTable], Step::Succeed);
    let (db, _) = scripted_database(pool.clone(), vec![]).await;

    let started = tokio::time::Instant::now();
    let err = db
        .execute("SELECT * FROM table_that_does_not_exist", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(db.stats().failure_count(ErrorKind::Schema), 1);
    assert_eq!(db.stats().retries(), 0);
}

#[tokio::test(start_paused = true)]
async fn writes_are_not_replayed_after_a_dispatched_failure() {
    let pool = ScriptedHandle::new("primary", vec![Step::ConnectionReset], Step::Succeed);
    let (db, _) = scripted_database(pool.clone(), vec![]).await;

    let err = db
        .execute(
            "INSERT INTO messages (user_id, body) VALUES ($1, $2)",
            &[SqlValue::Int(7), SqlValue::from("hello")],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert_eq!(err.attempts(), 1);
    assert_eq!(pool.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn writes_are_retried_when_never_dispatched_or_marked_idempotent() {
    let pool = ScriptedHandle::new(
        "primary",
        vec![Step::AcquireTimeout, Step::Succeed, Step::ConnectionReset],
        Step::Succeed,
    );
    let (db, _) = scripted_database(pool.clone(), vec![]).await;

    let deleted = db
        .execute("DELETE FROM sessions WHERE expires_at < now()", &[])
        .await
        .expect("acquire timeout is safe to retry");
    assert_eq!(deleted.row_count, 1);
    assert_eq!(pool.call_count(), 2);
    assert_backoff(&pool.gaps(), &[100]);

    let upsert = QueryRequest::new(
        "INSERT INTO usage (user_id, day) VALUES ($1, current_date) ON CONFLICT DO NOTHING",
        vec![SqlValue::Int(7)],
    )
    .idempotent(true);
    db.execute_request(&upsert).await.expect("idempotent write retried");
    assert_eq!(pool.call_count(), 4);
    assert_eq!(db.stats().retries(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_executions_are_counted() {
    let pool = ScriptedHandle::new(
        "primary",
        vec![Step::Slow(Duration::from_millis(1500))],
        Step::Succeed,
    );
    let (db, _) = scripted_database(pool.clone(), vec![]).await;

    let started = tokio::time::Instant::now();
    db.execute("SELECT pg_sleep(1.5)", &[]).await.expect("slow but fine");
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(db.stats().slow_queries(), 1);

    db.execute("SELECT 1", &[]).await.expect("fast");
    assert_eq!(db.stats().slow_queries(), 1);
    assert_eq!(db.stats().successes(), 2);
}
