// Router-level tests for the rate limit middleware and the user endpoints.
// Requests are driven in-process with `tower::ServiceExt::oneshot`; the
// limiter keys on an `x-client-id` header since there is no peer address.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Method, Request, StatusCode, header};
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tollgate::ErrorResponse;
use tollgate::clock::ManualClock;
use tollgate::config::Config;
use tollgate::rate_limit::{KeyExtractor, RateLimitPolicy, RateLimiter, spawn_idle_eviction};
use tollgate::server::{AppState, build_router};
use tollgate::user::{InMemoryUserRepository, UserService};
use tower::ServiceExt;

const CLIENT_HEADER: &str = "x-client-id";

struct TestApp {
    router: Router,
    limiter: Arc<RateLimiter>,
    clock: Arc<ManualClock>,
}

impl TestApp {
    fn new(requests_per_minute: f64, burst_size: u32) -> Self {
        let policy = RateLimitPolicy::new(requests_per_minute, burst_size)
            .unwrap()
            .with_key_extractor(KeyExtractor::Header(HeaderName::from_static(CLIENT_HEADER)));
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::with_clock(policy, clock.clone()));
        let state = AppState::new(Arc::new(Config::default()), user_service(), Some(limiter.clone()));

        Self {
            router: build_router(state),
            limiter,
            clock,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, client: &str) -> Response {
        self.send(
            Request::builder()
                .uri(uri)
                .header(CLIENT_HEADER, client)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post_json(&self, uri: &str, client: &str, body: Value) -> Response {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CLIENT_HEADER, client)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

fn user_service() -> Arc<UserService> {
    Arc::new(UserService::new(Arc::new(InMemoryUserRepository::new())))
}

async fn body_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn burst_then_too_many_requests() {
    let app = TestApp::new(60.0, 2);

    assert_eq!(app.get("/users", "alice").await.status(), StatusCode::OK);
    assert_eq!(app.get("/users", "alice").await.status(), StatusCode::OK);

    let denied = app.get("/users", "alice").await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(denied.headers().contains_key("x-request-id"));

    let body: ErrorResponse = body_json(denied).await;
    assert_eq!(body.error, "Rate limit exceeded");
    assert_eq!(body.code, "TOO_MANY_REQUESTS");
}

#[tokio::test]
async fn denied_request_never_reaches_handler() {
    let app = TestApp::new(60.0, 1);

    let created = app
        .post_json("/users", "bob", json!({"name": "First", "email": "first@example.com"}))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let denied = app
        .post_json("/users", "bob", json!({"name": "Second", "email": "second@example.com"}))
        .await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::from_secs(60));
    let listed = app.get("/users", "bob").await;
    assert_eq!(listed.status(), StatusCode::OK);
    let body: Value = body_json(listed).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["users"][0]["email"], "first@example.com");
}

#[tokio::test]
async fn skip_path_bypasses_limiter() {
    let app = TestApp::new(60.0, 1);

    for _ in 0..5 {
        let response = app.get("/healthz", "carol").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(app.limiter.is_empty());

    // Limited paths still start from a full bucket.
    assert_eq!(app.get("/users", "carol").await.status(), StatusCode::OK);
    assert_eq!(
        app.get("/users", "carol").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.limiter.len(), 1);
}

#[tokio::test]
async fn clients_are_limited_independently() {
    let app = TestApp::new(60.0, 1);

    assert_eq!(app.get("/users", "noisy").await.status(), StatusCode::OK);
    assert_eq!(
        app.get("/users", "noisy").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.get("/users", "quiet").await.status(), StatusCode::OK);
    assert_eq!(
        app.get("/users", "noisy").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn refill_over_time_readmits() {
    // 1 rpm: 30s refills half a token, 90s refills one and a half.
    let app = TestApp::new(1.0, 2);

    assert_eq!(app.get("/users", "k").await.status(), StatusCode::OK);
    assert_eq!(app.get("/users", "k").await.status(), StatusCode::OK);
    assert_eq!(app.get("/users", "k").await.status(), StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::from_secs(30));
    assert_eq!(app.get("/users", "k").await.status(), StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::from_secs(60));
    assert_eq!(app.get("/users", "k").await.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_requests_share_one_bucket() {
    let app = TestApp::new(60.0, 5);

    let tasks: Vec<_> = (0..40)
        .map(|_| {
            let router = app.router.clone();
            tokio::spawn(async move {
                let request = Request::builder()
                    .uri("/users")
                    .header(CLIENT_HEADER, "stampede")
                    .body(Body::empty())
                    .unwrap();
                router.oneshot(request).await.unwrap().status()
            })
        })
        .collect();

    let statuses: Vec<StatusCode> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let allowed = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let denied = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .count();

    assert_eq!(allowed, 5);
    assert_eq!(denied, 35);
    assert_eq!(app.limiter.len(), 1);
}

#[tokio::test]
async fn disabled_limiter_never_rejects() {
    let state = AppState::new(Arc::new(Config::default()), user_service(), None);
    let router = build_router(state);

    for _ in 0..50 {
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn user_endpoints_round_trip() {
    let app = TestApp::new(600.0, 50);

    let created = app
        .post_json("/users", "u", json!({"name": " Ada ", "email": "ADA@example.com"}))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let user: Value = body_json(created).await;
    assert_eq!(user["name"], "Ada");
    assert_eq!(user["email"], "ada@example.com");
    let id = user["id"].as_str().unwrap().to_string();

    let fetched = app.get(&format!("/users/{id}"), "u").await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let fetched: Value = body_json(fetched).await;
    assert_eq!(fetched, user);

    let listed: Value = body_json(app.get("/users?offset=0&limit=10", "u").await).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["limit"], 10);
    assert_eq!(listed["users"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn user_endpoint_errors_use_envelope() {
    let app = TestApp::new(600.0, 50);

    let missing = app.get("/users/does-not-exist", "u").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = body_json(missing).await;
    assert_eq!(body.code, "USER_NOT_FOUND");

    let bad_json = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/users")
                .header(CLIENT_HEADER, "u")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = body_json(bad_json).await;
    assert_eq!(body.code, "INVALID_JSON");

    let bad_email = app
        .post_json("/users", "u", json!({"name": "Ada", "email": "nope"}))
        .await;
    assert_eq!(bad_email.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = body_json(bad_email).await;
    assert_eq!(body.code, "INVALID_EMAIL");

    let first = app
        .post_json("/users", "u", json!({"name": "Ada", "email": "dup@example.com"}))
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let dup = app
        .post_json("/users", "u", json!({"name": "Ada", "email": "dup@example.com"}))
        .await;
    assert_eq!(dup.status(), StatusCode::CONFLICT);
    let body: ErrorResponse = body_json(dup).await;
    assert_eq!(body.code, "DUPLICATE_EMAIL");
}

#[tokio::test]
async fn request_id_is_propagated() {
    let app = TestApp::new(60.0, 5);

    let response = app
        .send(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = app.get("/healthz", "anyone").await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn metrics_endpoint_reports_limiter() {
    let app = TestApp::new(60.0, 1);
    app.get("/users", "a").await;
    app.get("/users", "a").await;

    let response = app.get("/metrics", "scraper").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tollgate_rate_limit_buckets"));
    assert!(text.contains("tollgate_rate_limit_exceeded_total"));
}

#[tokio::test]
async fn idle_eviction_task_sweeps_stale_buckets() {
    let app = TestApp::new(60.0, 1);
    assert_eq!(app.get("/users", "gone").await.status(), StatusCode::OK);
    assert_eq!(app.limiter.len(), 1);

    app.clock.advance(Duration::from_secs(600));
    let task = spawn_idle_eviction(app.limiter.clone(), Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    task.abort();

    assert!(app.limiter.is_empty());
}
