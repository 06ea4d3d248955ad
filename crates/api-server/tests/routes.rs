use std::sync::Arc;

use api_server::{app_router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use job_runner::{Job, JobQueue, QueuedRun};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use watchlist_store::{SessionStore, UserStore, WatchlistDb, WatchlistRepository};

/// Router over an in-memory database. The queue receiver is returned so
/// tests can see what the handlers enqueued.
async fn build_test_router() -> (Router, mpsc::Receiver<QueuedRun>) {
    let db = WatchlistDb::new("sqlite::memory:").await.unwrap();
    let (queue, receiver) = JobQueue::new(db.pool().clone(), 16).await.unwrap();

    let state = AppState {
        users: Arc::new(UserStore::new(db.clone())),
        sessions: Arc::new(SessionStore::new(db.clone())),
        watchlists: Arc::new(WatchlistRepository::new(db)),
        queue,
        session_ttl: chrono::Duration::hours(1),
    };
    (app_router(state), receiver)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn sign_up(app: &Router, email: &str) -> String {
    let response = send(
        app,
        Method::POST,
        "/api/auth/sign-up",
        None,
        Some(json!({
            "email": email,
            "password": "password123",
            "fullName": "Ada Lovelace",
            "country": "United Kingdom",
            "investmentGoals": "Growth",
            "riskTolerance": "Medium",
            "preferredIndustry": "Technology",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    body["data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let (app, _rx) = build_test_router().await;

    let response = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let (app, _rx) = build_test_router().await;

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn test_watchlist_requires_a_session() {
    let (app, _rx) = build_test_router().await;

    let response = send(&app, Method::GET, "/api/watchlist", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "User not authenticated");

    let response = send(&app, Method::GET, "/api/watchlist", Some("not-a-session"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_up_queues_the_welcome_email() {
    let (app, mut rx) = build_test_router().await;

    sign_up(&app, "Ada@Example.com").await;

    let queued = rx.try_recv().unwrap();
    assert_eq!(queued.run_id, "welcome:ada@example.com");
    match queued.job {
        Job::WelcomeEmail(event) => {
            assert_eq!(event.email, "ada@example.com");
            assert_eq!(event.name, "Ada Lovelace");
            assert_eq!(event.preferred_industry, "Technology");
        }
        other => panic!("unexpected job {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_sign_up_is_rejected() {
    let (app, _rx) = build_test_router().await;
    sign_up(&app, "ada@example.com").await;

    let response = send(
        &app,
        Method::POST,
        "/api/auth/sign-up",
        None,
        Some(json!({ "email": "ADA@example.com", "password": "password123", "fullName": "Ada" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("already exists for ada@example.com"));
}

#[tokio::test]
async fn test_sign_in_and_sign_out() {
    let (app, _rx) = build_test_router().await;
    sign_up(&app, "ada@example.com").await;

    let response = send(
        &app,
        Method::POST,
        "/api/auth/sign-in",
        None,
        Some(json!({ "email": "ada@example.com", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &app,
        Method::POST,
        "/api/auth/sign-in",
        None,
        Some(json!({ "email": "ada@example.com", "password": "password123" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = json_body(response).await["data"]["token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(&app, Method::GET, "/api/watchlist", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, Method::POST, "/api/auth/sign-out", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["revoked"], true);

    let response = send(&app, Method::GET, "/api/watchlist", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_watchlist_add_list_remove() {
    let (app, _rx) = build_test_router().await;
    let token = sign_up(&app, "ada@example.com").await;

    let response = send(
        &app,
        Method::POST,
        "/api/watchlist",
        Some(&token),
        Some(json!({ "symbol": " aapl ", "company": "Apple Inc." })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["symbol"], "AAPL");
    assert_eq!(body["data"]["company"], "Apple Inc.");

    let response = send(
        &app,
        Method::POST,
        "/api/watchlist",
        Some(&token),
        Some(json!({ "symbol": "AAPL" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(
        &app,
        Method::POST,
        "/api/watchlist",
        Some(&token),
        Some(json!({ "symbol": "   " })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, Method::GET, "/api/watchlist", Some(&token), None).await;
    let body = json_body(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let response = send(&app, Method::DELETE, "/api/watchlist/aapl", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["symbol"], "AAPL");

    let response = send(&app, Method::DELETE, "/api/watchlist/AAPL", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_watchlists_are_per_user() {
    let (app, _rx) = build_test_router().await;
    let ada = sign_up(&app, "ada@example.com").await;
    let grace = sign_up(&app, "grace@example.com").await;

    send(
        &app,
        Method::POST,
        "/api/watchlist",
        Some(&ada),
        Some(json!({ "symbol": "MSFT", "company": "Microsoft" })),
    )
    .await;

    let response = send(&app, Method::GET, "/api/watchlist", Some(&grace), None).await;
    let body = json_body(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let response = send(&app, Method::DELETE, "/api/watchlist/MSFT", Some(&grace), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_job_runs() {
    let (app, mut rx) = build_test_router().await;
    let token = sign_up(&app, "ada@example.com").await;
    // drain the welcome email
    rx.try_recv().unwrap();

    let response = send(&app, Method::POST, "/api/jobs/price-refresh", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, Method::POST, "/api/jobs/price-refresh", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let run_id = body["data"]["runId"].as_str().unwrap().to_string();
    assert!(run_id.starts_with("price-refresh:manual:"));
    assert_eq!(body["data"]["job"], "price-refresh");

    let queued = rx.try_recv().unwrap();
    assert_eq!(queued.run_id, run_id);
    assert_eq!(queued.job, Job::PriceRefresh);

    let uri = format!("/api/jobs/runs/{}", run_id);
    let response = send(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["attempts"], 0);

    let response = send(&app, Method::POST, "/api/jobs/daily-digest", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(rx.try_recv().unwrap().job, Job::DailyDigest);

    let response = send(&app, Method::GET, "/api/jobs/runs/missing", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
