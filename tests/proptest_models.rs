//! Property-based coverage for the username/email/password format rules
//! (§3 User) and SPEC_FULL.md §8 property 10, the job queue's
//! attempt-counting backoff/archive behavior.

use inkwell::validation::{validate_email, validate_password, validate_username};
use proptest::prelude::*;
use sqlx::SqlitePool;
use std::time::Duration;

proptest! {
    /// §3 User: a username is accepted iff it is 3-64 bytes of
    /// `[A-Za-z0-9_-]`, independent of what any particular test fixture
    /// happens to pick.
    #[test]
    fn username_validity_matches_charset_and_length(value in "[\\PC]{0,80}") {
        let accepted = validate_username(&value).is_ok();
        let matches_rule = value.len() >= 3
            && value.len() <= 64
            && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        prop_assert_eq!(accepted, matches_rule);
    }

    /// §3 User: password validation is a pure byte-length bound.
    #[test]
    fn password_validity_matches_length_bound(value in "[\\PC]{0,100}") {
        let accepted = validate_password(&value).is_ok();
        let matches_rule = value.len() >= 12 && value.len() <= 72;
        prop_assert_eq!(accepted, matches_rule);
    }

    /// §3 User: an email longer than 254 bytes is always rejected,
    /// regardless of whether the local/domain shape would otherwise pass.
    #[test]
    fn overlong_email_is_always_rejected(local in "[a-z]{240,300}") {
        let candidate = format!("{local}@example.com");
        if candidate.len() > 254 {
            prop_assert!(validate_email(&candidate).is_err());
        }
    }
}

async fn test_queue(max_attempts: i64) -> (inkwell::tasks::TaskQueue, SqlitePool) {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations_tasks").run(&pool).await.unwrap();
    let queue = inkwell::tasks::TaskQueue::new(
        pool.clone(),
        vec![inkwell::tasks::QueueConfig {
            name: "proptest_queue",
            max_attempts,
            backoff: chrono::Duration::seconds(0),
            timeout: Duration::from_secs(5),
            retention: chrono::Duration::days(1),
            retention_only_failed: false,
        }],
    );
    (queue, pool)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property 10: a job fails `max_attempts - 1` times and stays `pending`
    /// with a growing attempt count each time, then archives as `failed` on
    /// the attempt that reaches `max_attempts` — never fewer, never more.
    #[test]
    fn job_archives_as_failed_exactly_at_max_attempts(max_attempts in 1i64..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (queue, pool) = test_queue(max_attempts).await;
            queue.add("proptest_queue", &serde_json::json!({})).await.unwrap();

            for expected_attempts in 1..max_attempts {
                let job = queue.poll().await.unwrap().expect("job should still be pending");
                queue.retry_or_fail(&job, "boom").await.unwrap();

                let row: (i64, String) = sqlx::query_as("SELECT attempts, status FROM jobs WHERE id = ?1")
                    .bind(&job.id)
                    .fetch_one(&pool)
                    .await
                    .unwrap();
                prop_assert_eq!(row.0, expected_attempts);
                prop_assert_eq!(row.1, "pending");
            }

            let job = queue.poll().await.unwrap().expect("job should still be pending before the final attempt");
            queue.retry_or_fail(&job, "final boom").await.unwrap();

            let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs").fetch_one(&pool).await.unwrap();
            prop_assert_eq!(remaining.0, 0);
            let archived: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs_archive WHERE status = 'failed'")
                .fetch_one(&pool)
                .await
                .unwrap();
            prop_assert_eq!(archived.0, 1);
            Ok(())
        })?;
    }
}
