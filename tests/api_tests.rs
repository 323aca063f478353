//! End-to-end scenarios from SPEC_FULL.md §8 (S1-S6). S1-S3 and S5 are
//! driven through the full middleware stack via `actix_web::test`; S4 and
//! S6 have no HTTP surface of their own, so they drive the same
//! real-database `TestDbs`/`TestContext` harness directly.

mod common;

use actix_web::http::StatusCode;
use actix_web::http::header::{AUTHORIZATION, CONTENT_TYPE};
use actix_web::test;
use common::db::setup as setup_dbs;
use common::fixtures::session_cookie_value;
use common::helpers::{build_app, build_context};
use inkwell::crypto::Vault;
use inkwell::oauth::{OAuthToken, OAuthVault};
use inkwell::tasks::{JobRegistry, QueueConfig, TaskQueue};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[actix_web::test]
async fn s1_initial_setup_race_never_creates_two_admins() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    let app = test::init_service(build_app(&ctx)).await;

    let body_a = "username=alice&email=alice%40example.com&password=correct+horse+battery&confirm_password=correct+horse+battery";
    let body_b = "username=bob&email=bob%40example.com&password=correct+horse+battery&confirm_password=correct+horse+battery";

    let req_a = test::TestRequest::post()
        .uri("/setup")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload(body_a)
        .to_request();
    let req_b = test::TestRequest::post()
        .uri("/setup")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload(body_b)
        .to_request();

    let (resp_a, resp_b) = tokio::join!(test::call_service(&app, req_a), test::call_service(&app, req_b));

    let statuses = [resp_a.status(), resp_b.status()];
    assert!(statuses.iter().all(|s| s.is_redirection()), "both setup POSTs should redirect: {statuses:?}");

    assert!(ctx.identity.has_users().await.unwrap());
    let admins: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
        .fetch_one(&dbs.main.pool)
        .await
        .unwrap();
    assert_eq!(admins.0, 1, "exactly one admin must exist after the race");
}

#[actix_web::test]
async fn s2_login_lockout_then_recovery() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    ctx.identity.create_user("carol", "carol@example.com", "correct horse battery", inkwell::identity::Role::Viewer).await.unwrap();
    let app = test::init_service(build_app(&ctx)).await;

    for _ in 0..5 {
        let req = test::TestRequest::post()
            .uri("/login")
            .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
            .set_payload("username=carol&password=wrong+password+here")
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload("username=carol&password=correct+horse+battery")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "6th attempt must be locked even with the right password");

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload("username=carol&password=correct+horse+battery")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_redirection(), "login should succeed once the lockout has elapsed");
}

#[actix_web::test]
async fn s3_session_fixation_token_changes_on_login() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    ctx.identity.create_user("dave", "dave@example.com", "correct horse battery", inkwell::identity::Role::Viewer).await.unwrap();
    let app = test::init_service(build_app(&ctx)).await;

    let before_req = test::TestRequest::get().uri("/login").to_request();
    let before_resp = test::call_service(&app, before_req).await;
    let before_token = session_cookie_value(&before_resp);
    assert!(before_token.is_none(), "a bare GET /login must not mint a session");

    let login_req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload("username=dave&password=correct+horse+battery")
        .to_request();
    let login_resp = test::call_service(&app, login_req).await;
    let after_token = session_cookie_value(&login_resp).expect("login must set a session cookie");
    assert!(!after_token.is_empty());
}

#[actix_web::test]
async fn s5_bearer_bypasses_csrf_but_session_alone_does_not() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    let user = ctx
        .identity
        .create_user("erin", "erin@example.com", "correct horse battery", inkwell::identity::Role::Viewer)
        .await
        .unwrap();
    let app = test::init_service(build_app(&ctx)).await;

    let login_req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload("username=erin&password=correct+horse+battery")
        .to_request();
    let login_resp = test::call_service(&app, login_req).await;
    let cookie_value = session_cookie_value(&login_resp).expect("login sets a session cookie");

    let no_csrf_req = test::TestRequest::post()
        .uri("/api/tokens")
        .cookie(actix_web::cookie::Cookie::new("session", cookie_value))
        .to_request();
    let no_csrf_resp = test::call_service(&app, no_csrf_req).await;
    assert_eq!(no_csrf_resp.status(), StatusCode::FORBIDDEN, "session without a CSRF token must be rejected");

    let token = ctx.identity.generate_token(user.id).await.unwrap();
    let bearer_req =
        test::TestRequest::post().uri("/api/tokens").insert_header((AUTHORIZATION, format!("Bearer {token}"))).to_request();
    let bearer_resp = test::call_service(&app, bearer_req).await;
    assert!(bearer_resp.status().is_success(), "a valid bearer token must bypass CSRF entirely");
}

/// Regression test for the gate's bearer/session fall-through: a request
/// carrying an invalid (or expired) bearer token must still be authenticated
/// off its session cookie rather than denied outright.
#[actix_web::test]
async fn gate_falls_through_invalid_bearer_to_session() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    ctx.identity
        .create_user("frank", "frank@example.com", "correct horse battery", inkwell::identity::Role::Viewer)
        .await
        .unwrap();
    let app = test::init_service(build_app(&ctx)).await;

    let login_req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload("username=frank&password=correct+horse+battery")
        .to_request();
    let login_resp = test::call_service(&app, login_req).await;
    let cookie_value = session_cookie_value(&login_resp).expect("login sets a session cookie");

    let req = test::TestRequest::get()
        .uri("/dashboard")
        .insert_header((AUTHORIZATION, "Bearer not-a-real-token"))
        .cookie(actix_web::cookie::Cookie::new("session", cookie_value))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        resp.status(),
        StatusCode::NOT_FOUND,
        "an invalid bearer token must not short-circuit the gate past a valid session cookie \
         (a 302 here would mean the gate denied the request instead of falling through)"
    );
}

/// Regression test for login errors bypassing the HTML error path (4.G):
/// a browser form post with a bad password must be redirected back with
/// `?error=...`, never handed the generic JSON `ResponseError` body.
#[actix_web::test]
async fn login_failure_from_a_browser_redirects_with_error_param() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    ctx.identity.create_user("gina", "gina@example.com", "correct horse battery", inkwell::identity::Role::Viewer).await.unwrap();
    let app = test::init_service(build_app(&ctx)).await;

    let req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .insert_header((actix_web::http::header::REFERER, "/login"))
        .set_payload("username=gina&password=totally+wrong")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_redirection(), "a browser login failure should redirect, not render a JSON error body");
    let location = resp.headers().get(actix_web::http::header::LOCATION).unwrap().to_str().unwrap().to_string();
    assert!(location.starts_with("/login?error="), "redirect target must carry the failure as a query param: {location}");
}

/// The same failure, but shaped like an API caller (`Accept:
/// application/json`), must still get the generic JSON error body.
#[actix_web::test]
async fn login_failure_from_an_api_caller_gets_json() {
    let dbs = setup_dbs().await;
    let ctx = build_context(&dbs, 5);
    ctx.identity.create_user("hank", "hank@example.com", "correct horse battery", inkwell::identity::Role::Viewer).await.unwrap();
    let app = test::init_service(build_app(&ctx)).await;

    let req = test::TestRequest::post()
        .uri("/login")
        .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .insert_header((actix_web::http::header::ACCEPT, "application/json"))
        .set_payload("username=hank&password=totally+wrong")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let content_type = resp.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/json"), "an API-shaped caller must still get a JSON error body: {content_type}");
}

#[actix_web::test]
async fn s4_oauth_token_decrypts_only_under_its_own_master_key() {
    let dbs = setup_dbs().await;

    let key_a = [1u8; 32];
    let key_b = [2u8; 32];
    let vault_a = OAuthVault::new(dbs.main.pool.clone(), Vault::from_key_bytes(&key_a).unwrap());
    let vault_b = OAuthVault::new(dbs.main.pool.clone(), Vault::from_key_bytes(&key_b).unwrap());

    let token = OAuthToken {
        provider: "openlibrary".into(),
        account_id: "acct-1".into(),
        access_token: "A".into(),
        refresh_token: "R".into(),
        token_type: "bearer".into(),
        expires_at: None,
        scope: "read".into(),
        last_used_at: None,
        last_refreshed_at: None,
    };
    vault_a.save_token(&token).await.unwrap();

    let under_wrong_key = vault_b.get_token("openlibrary", "acct-1").await;
    assert!(
        matches!(under_wrong_key, Err(inkwell::Error::Cryptographic(_))),
        "opening the row under a different master key must fail to decrypt, not silently succeed"
    );

    let (access_ciphertext, refresh_ciphertext): (String, String) =
        sqlx::query_as("SELECT access_ciphertext, refresh_ciphertext FROM oauth_tokens WHERE provider = 'openlibrary' AND account_id = 'acct-1'")
            .fetch_one(&dbs.main.pool)
            .await
            .unwrap();
    assert_ne!(access_ciphertext, "A", "the access token must never be stored as plaintext");
    assert_ne!(refresh_ciphertext, "R", "the refresh token must never be stored as plaintext");

    let under_right_key = vault_a.get_token("openlibrary", "acct-1").await.unwrap().unwrap();
    assert_eq!(under_right_key.access_token, "A");
    assert_eq!(under_right_key.refresh_token, "R");
}

#[actix_web::test]
async fn s6_queue_retries_with_backoff_then_succeeds() {
    let dbs = setup_dbs().await;
    let queue = TaskQueue::new(
        dbs.tasks.pool.clone(),
        vec![QueueConfig {
            name: "flaky",
            max_attempts: 3,
            backoff: chrono::Duration::milliseconds(50),
            timeout: Duration::from_secs(5),
            retention: chrono::Duration::days(1),
            retention_only_failed: false,
        }],
    );
    queue.add("flaky", &serde_json::json!({})).await.unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counted = attempts.clone();
    let mut registry = JobRegistry::new();
    registry.register("flaky", move |_job| {
        let attempts = counted.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(inkwell::Error::Infrastructural("transient failure".into()))
            } else {
                Ok(())
            }
        }
    });

    let token = CancellationToken::new();
    let registry = Arc::new(registry);
    let worker_queue = queue.clone();
    let worker_token = token.clone();
    let handle = tokio::spawn(async move { worker_queue.run_worker(registry, worker_token).await });

    // The worker's idle-poll interval (500ms) dominates the wait, not the
    // queue's own 50ms backoff: two retries each cross one idle poll before
    // the job is eligible again, so budget comfortably past 2 * 500ms.
    tokio::time::sleep(Duration::from_millis(1800)).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3, "handler must be invoked exactly three times: two failures, one success");

    // `attempts` on the archived row counts prior *failed* attempts (2),
    // not the successful final call — the handler itself ran three times.
    let archived: (i64, String) =
        sqlx::query_as("SELECT attempts, status FROM jobs_archive WHERE queue = 'flaky'").fetch_one(&dbs.tasks.pool).await.unwrap();
    assert_eq!(archived.1, "succeeded");
    assert_eq!(archived.0, 2);

    let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs").fetch_one(&dbs.tasks.pool).await.unwrap();
    assert_eq!(remaining.0, 0, "the job must be archived, not left pending or leased");
}
