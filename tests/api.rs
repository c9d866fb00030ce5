//! HTTP surface of the router, driven in-process with `oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use auth_engine::api::{app, API_PREFIX};
use auth_engine::config::Config;
use auth_engine::models::validity::PolicyType;
use auth_engine::store::memory::MemoryStore;
use auth_engine::AppState;

fn router() -> Router {
    let mut cfg = Config::local("test");
    cfg.policy_types = vec![PolicyType::Daily, PolicyType::Weekly, PolicyType::DateRange];
    let state = AppState::new(Arc::new(MemoryStore::new()), cfg).unwrap();
    app(Arc::new(state))
}

fn bearer() -> String {
    let claims = json!({ "sub": "u-1", "preferred_username": "alice" });
    let jwt = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"signed-elsewhere"),
    )
    .unwrap();
    format!("Bearer {}", jwt)
}

fn v1(path: &str) -> String {
    format!("{}/v1{}", API_PREFIX, path)
}

fn json_request(method: Method, uri: &str, body: Value, auth: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if auth {
        builder = builder.header(header::AUTHORIZATION, bearer());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn create_all_week(app: &Router, scenario: &str) -> Value {
    let body = json!({
        "appScenarioName": scenario,
        "modelName": "qwen-72b",
        "maxConcurrency": 2,
        "enableValidityPolicy": true,
        "policyType": "WEEKLY",
        "validityPolicy": [{ "startDay": "MONDAY", "endDay": "SUNDAY" }]
    });
    let (status, body) = send(
        app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/add"), body, true),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["result"].clone()
}

#[tokio::test]
async fn ping_echoes_authorization() {
    let app = router();
    let req = Request::builder()
        .uri(format!("{}/ping", API_PREFIX))
        .header(header::AUTHORIZATION, "Bearer abc")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");
    assert_eq!(body["authorization"], "Bearer abc");
}

#[tokio::test]
async fn management_routes_require_a_bearer_jwt() {
    let app = router();
    let (status, body) = send(
        &app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/list"), json!({}), false),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 401);
    assert_eq!(
        body["message"],
        "Unauthorized: No authorization header provided."
    );

    let req = Request::builder()
        .uri(v1("/envs"))
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthorized: Failed to parse JWT.");
}

#[tokio::test]
async fn envs_lists_configured_environments() {
    let app = router();
    let req = Request::builder()
        .uri(v1("/envs"))
        .header(header::AUTHORIZATION, bearer())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"][0]["name"], "test");
    assert_eq!(body["result"][0]["isDefault"], true);
}

#[tokio::test]
async fn create_then_authenticate_and_fetch() {
    let app = router();
    let token = create_all_week(&app, "chat").await;
    assert_eq!(token["createBy"], "alice");
    assert_eq!(token["envName"], "test");

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            &format!("{}/token/auth", API_PREFIX),
            json!({ "token": token["token"] }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "success");

    let req = Request::builder()
        .uri(v1(&format!(
            "/workspaces/ws-1/tokens/{}",
            token["id"].as_str().unwrap()
        )))
        .header(header::AUTHORIZATION, bearer())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["validityPolicy"][0]["endDay"], "SUNDAY");
}

#[tokio::test]
async fn unknown_secret_is_forbidden() {
    let app = router();
    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            &format!("{}/token/auth", API_PREFIX),
            json!({ "token": "sk-nope" }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Token is invalid.");
}

#[tokio::test]
async fn invalid_policy_is_a_bad_request() {
    let app = router();
    let body = json!({
        "appScenarioName": "chat",
        "modelName": "qwen-72b",
        "enableValidityPolicy": true,
        "policyType": "DAILY",
        "validityPolicy": [{ "startTime": "25:00:00", "endTime": "18:00:00" }]
    });
    let (status, body) = send(
        &app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/add"), body, true),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "startTime is invalid.");

    let (_, list) = send(
        &app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/list"), json!({}), true),
    )
    .await;
    assert_eq!(list["result"]["total"], 0);
}

#[tokio::test]
async fn list_pages_newest_first() {
    let app = router();
    for scenario in ["a", "b", "c"] {
        create_all_week(&app, scenario).await;
    }
    let body = json!({
        "pageParam": { "pageNum": 1, "pageSize": 2 },
        "orderParam": { "column": "createTime", "order": "desc" }
    });
    let (status, body) = send(
        &app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/list"), body, true),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["total"], 3);
    assert_eq!(body["result"]["pages"], 2);
    let records = body["result"]["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["appScenarioName"], "c");
}

#[tokio::test]
async fn huge_page_params_are_clamped() {
    let app = router();
    create_all_week(&app, "chat").await;

    let far_page = json!({ "pageParam": { "pageNum": i64::MAX, "pageSize": 10 } });
    let (status, body) = send(
        &app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/list"), far_page, true),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["result"]["total"], 1);
    assert!(body["result"]["records"].as_array().unwrap().is_empty());
    assert!(body["result"]["offset"].as_i64().unwrap() > 0);

    let huge_size = json!({ "pageParam": { "pageNum": 1, "pageSize": i64::MAX } });
    let (status, body) = send(
        &app,
        json_request(Method::POST, &v1("/workspaces/ws-1/tokens/list"), huge_size, true),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["result"]["pages"], 1);
    assert_eq!(body["result"]["size"], 1000);
    assert_eq!(body["result"]["records"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_and_delete_round() {
    let app = router();
    let token = create_all_week(&app, "chat").await;
    let uri = v1(&format!(
        "/workspaces/ws-1/tokens/{}",
        token["id"].as_str().unwrap()
    ));

    let body = json!({
        "appScenarioName": "chat",
        "modelName": "qwen-72b",
        "enableValidityPolicy": true,
        "policyType": "DAILY",
        "validityPolicy": [{ "startTime": "09:00:00", "endTime": "18:00:00" }]
    });
    let (status, body) = send(&app, json_request(Method::PUT, &uri, body, true)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["result"]["policyType"], "DAILY");

    let req = Request::builder()
        .method(Method::DELETE)
        .uri(&uri)
        .header(header::AUTHORIZATION, bearer())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "delete token success");

    let req = Request::builder()
        .uri(&uri)
        .header(header::AUTHORIZATION, bearer())
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_token_id_is_rejected() {
    let app = router();
    let req = Request::builder()
        .uri(v1("/workspaces/ws-1/tokens/not-a-uuid"))
        .header(header::AUTHORIZATION, bearer())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Token ID is invalid.");
}

#[tokio::test]
async fn export_then_import_through_multipart() {
    let source = router();
    let token = create_all_week(&source, "chat").await;
    let export_uri = v1(&format!(
        "/workspaces/ws-1/tokens/{}/export",
        token["id"].as_str().unwrap()
    ));

    let (status, body) = send(
        &source,
        json_request(Method::POST, &export_uri, json!({}), true),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "EnvName is required.");

    let resp = source
        .clone()
        .oneshot(json_request(
            Method::POST,
            &export_uri,
            json!({ "envName": "test" }),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename="));
    assert!(disposition.ends_with("-chat-qwen-72b-test.txt"));
    let file = to_bytes(resp.into_body(), usize::MAX).await.unwrap();

    let boundary = "auth-engine-boundary";
    let mut multipart = Vec::new();
    multipart.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"token.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    multipart.extend_from_slice(&file);
    multipart.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let target = router();
    let req = Request::builder()
        .method(Method::POST)
        .uri(v1("/workspaces/ws-2/tokens/import"))
        .header(header::AUTHORIZATION, bearer())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(multipart))
        .unwrap();
    let (status, body) = send(&target, req).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["result"]["workspaceId"], "ws-2");
    assert_eq!(body["result"]["token"], token["token"]);
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = router();
    let resp = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["cache-control"], "no-store");
}

#[tokio::test]
async fn unknown_routes_get_the_json_envelope() {
    let app = router();
    let (status, body) = send(
        &app,
        Request::builder().uri("/nope").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn readiness_reports_store_health() {
    let app = router();
    let resp = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
