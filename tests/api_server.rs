use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use catenis_api_emulator::config::Config;
use catenis_api_emulator::handlers::api::emulate_request;
use catenis_api_emulator::models::credentials::DeviceCredentials;
use catenis_api_emulator::services::auth::{AuthService, RequestAuthenticator};
use catenis_api_emulator::services::context::ContextStore;
use catenis_api_emulator::services::signature;

const DEVICE_ID: &str = "drc3XdxNtzoucpw9xiRp";
const SECRET: &str = "4c1749c8e86f65e0a73e5fb19f2aa9e74a716bc22d7956bf3072b4bc66fd1c77";
const HOST: &str = "localhost:3500";

fn test_config() -> Config {
    Config {
        api_port: 3500,
        cmd_port: 3501,
        api_version: "0.13".to_string(),
        log_level: "info".to_string(),
    }
}

/// Assemble the emulated API app around the given store, the way the
/// server binary wires it.
macro_rules! init_api {
    ($store:expr) => {{
        let store: Arc<ContextStore> = $store.clone();
        let authenticator: Arc<dyn RequestAuthenticator> =
            Arc::new(AuthService::new(store.clone()));
        test::init_service(
            App::new()
                .app_data(web::Data::from(store))
                .app_data(web::Data::new(test_config()))
                .app_data(web::Data::new(authenticator))
                .default_service(web::route().to(emulate_request)),
        )
        .await
    }};
}

fn install_credentials(store: &ContextStore) {
    store
        .set_credentials(vec![DeviceCredentials {
            device_id: DEVICE_ID.to_string(),
            api_access_secret: SECRET.to_string(),
        }])
        .unwrap();
}

fn install_context(store: &ContextStore, context: serde_json::Value) {
    store
        .set_http_context(serde_json::from_value(context).unwrap())
        .unwrap();
}

fn signed_headers(method: &str, url: &str, body: &[u8]) -> (String, String) {
    let now = Utc::now();
    let timestamp = signature::format_timestamp(now);
    let sign_date = signature::format_sign_date(now);
    let sig = signature::sign_request(SECRET, &sign_date, &timestamp, method, url, HOST, body);

    (
        timestamp,
        signature::format_authorization(DEVICE_ID, &sign_date, &sig),
    )
}

async fn body_json(resp: actix_web::dev::ServiceResponse) -> serde_json::Value {
    let bytes = test::read_body(resp).await;
    serde_json::from_slice(&bytes).unwrap()
}

#[actix_web::test]
async fn success_scenario_replays_installed_response() {
    let store = Arc::new(ContextStore::new());
    install_credentials(&store);
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "POST",
                "apiMethodPath": "messages/log",
                "data": "{\"message\":\"Test message #1\"}",
                "authenticate": true
            },
            "requiredResponse": {
                "data": "{\"messageId\":\"mdx8vuCGWdb2TFeWFZd6\"}"
            }
        }),
    );
    let app = init_api!(store);

    let body = r#"{"message":"Test message #1"}"#;
    let (timestamp, authorization) =
        signed_headers("POST", "/api/0.13/messages/log", body.as_bytes());
    let req = test::TestRequest::post()
        .uri("/api/0.13/messages/log")
        .insert_header((header::HOST, HOST))
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .insert_header(("x-bcot-timestamp", timestamp))
        .insert_header((header::AUTHORIZATION, authorization))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "application/json"
    );

    let bytes = test::read_body(resp).await;
    let text = std::str::from_utf8(&bytes).unwrap();
    // Envelope order and two-space pretty printing are part of the wire
    // contract.
    assert!(text.starts_with("{\n  \"status\": \"success\""), "body: {}", text);
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(
        value,
        json!({"status": "success", "data": {"messageId": "mdx8vuCGWdb2TFeWFZd6"}})
    );
}

#[actix_web::test]
async fn mismatched_body_yields_diagnostic() {
    let store = Arc::new(ContextStore::new());
    install_credentials(&store);
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "POST",
                "apiMethodPath": "messages/log",
                "data": "{\"message\":\"Test message #1\"}"
            }
        }),
    );
    let app = init_api!(store);

    let body = r#"{"message":"WRONG"}"#;
    let req = test::TestRequest::post()
        .uri("/api/0.13/messages/log")
        .insert_header((header::HOST, HOST))
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let message = body_json(resp).await;
    let message = message.as_str().unwrap();
    assert!(
        message.starts_with("Unexpected HTTP request body:"),
        "message: {}",
        message
    );
    assert!(message.contains("WRONG"));
}

#[actix_web::test]
async fn installed_error_response_is_replayed() {
    let store = Arc::new(ContextStore::new());
    install_credentials(&store);
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "POST",
                "apiMethodPath": "messages/log",
                "authenticate": false
            },
            "requiredResponse": {
                "statusCode": 400,
                "errorMessage": "Not enough credits to pay for log message service"
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::post()
        .uri("/api/0.13/messages/log")
        .insert_header((header::HOST, HOST))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(resp).await,
        json!({
            "status": "error",
            "message": "Not enough credits to pay for log message service"
        })
    );
}

#[actix_web::test]
async fn unknown_device_is_rejected() {
    let store = Arc::new(ContextStore::new());
    // Credentials registry deliberately left empty.
    install_context(
        &store,
        json!({
            "expectedRequest": {"httpMethod": "GET", "apiMethodPath": "messages"}
        }),
    );
    let app = init_api!(store);

    let (timestamp, authorization) = signed_headers("GET", "/api/0.13/messages", b"");
    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .insert_header(("x-bcot-timestamp", timestamp))
        .insert_header((header::AUTHORIZATION, authorization))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(resp).await,
        json!("Authorization failed; invalid device or signature")
    );
}

#[actix_web::test]
async fn stale_timestamp_is_rejected() {
    let store = Arc::new(ContextStore::new());
    install_credentials(&store);
    install_context(
        &store,
        json!({
            "expectedRequest": {"httpMethod": "GET", "apiMethodPath": "messages"}
        }),
    );
    let app = init_api!(store);

    let now = Utc::now();
    let timestamp = signature::format_timestamp(now - Duration::seconds(600));
    let sign_date = signature::format_sign_date(now);
    let sig = signature::sign_request(
        SECRET,
        &sign_date,
        &timestamp,
        "GET",
        "/api/0.13/messages",
        HOST,
        b"",
    );
    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .insert_header(("x-bcot-timestamp", timestamp))
        .insert_header((
            header::AUTHORIZATION,
            signature::format_authorization(DEVICE_ID, &sign_date, &sig),
        ))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(resp).await,
        json!("Authorization failed; timestamp not within acceptable time variation")
    );
}

#[actix_web::test]
async fn missing_http_context_is_reported() {
    let store = Arc::new(ContextStore::new());
    let app = init_api!(store);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await, json!("Missing HTTP context"));
}

#[actix_web::test]
async fn method_mismatch_yields_diagnostic() {
    let store = Arc::new(ContextStore::new());
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "POST",
                "apiMethodPath": "messages/log",
                "authenticate": false
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages/log")
        .insert_header((header::HOST, HOST))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(resp).await,
        json!("Unexpected HTTP request method: expected: POST; received: GET")
    );
}

#[actix_web::test]
async fn query_sets_are_compared_order_insensitively() {
    let store = Arc::new(ContextStore::new());
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "GET",
                "apiMethodPath": "messages?a=1&b=2&b=3",
                "authenticate": false
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages?b=3&a=1&b=2")
        .insert_header((header::HOST, HOST))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages?a=1&b=2")
        .insert_header((header::HOST, HOST))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let message = body_json(resp).await;
    assert!(message
        .as_str()
        .unwrap()
        .starts_with("Unexpected HTTP request query string:"));
}

#[actix_web::test]
async fn unexpected_content_type_yields_diagnostic() {
    let store = Arc::new(ContextStore::new());
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "POST",
                "apiMethodPath": "messages/log",
                "data": "{\"message\":\"Test message #1\"}",
                "authenticate": false
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::post()
        .uri("/api/0.13/messages/log")
        .insert_header((header::HOST, HOST))
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload(r#"{"message":"Test message #1"}"#)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(resp)
        .await
        .as_str()
        .unwrap()
        .starts_with("Unexpected content type of HTTP request:"));
}

#[actix_web::test]
async fn matching_request_without_installed_response_yields_empty_ok() {
    let store = Arc::new(ContextStore::new());
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "GET",
                "apiMethodPath": "messages",
                "authenticate": false
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert!(test::read_body(resp).await.is_empty());
}

#[actix_web::test]
async fn origin_is_echoed_with_vary() {
    let store = Arc::new(ContextStore::new());
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "GET",
                "apiMethodPath": "messages",
                "authenticate": false
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .insert_header((header::ORIGIN, "http://example.com"))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://example.com"
    );
    assert_eq!(resp.headers().get(header::VARY).unwrap(), "Origin");
}

#[actix_web::test]
async fn cors_preflight_is_answered_generically() {
    let store = Arc::new(ContextStore::new());
    let app = init_api!(store);

    let req = test::TestRequest::default()
        .method(actix_web::http::Method::OPTIONS)
        .uri("/api/0.13/anything")
        .insert_header((header::HOST, HOST))
        .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap(),
        "POST, GET, OPTIONS"
    );
    let allow_headers = resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(allow_headers.contains("X-Bcot-Timestamp"));
    assert!(allow_headers.contains("Authorization"));
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_MAX_AGE).unwrap(),
        "86400"
    );
}

#[actix_web::test]
async fn context_install_is_immediately_observable() {
    let store = Arc::new(ContextStore::new());
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "GET",
                "apiMethodPath": "messages",
                "authenticate": false
            }
        }),
    );
    let app = init_api!(store);

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::OK
    );

    // Replace the expectation; the very next request matches the new one.
    install_context(
        &store,
        json!({
            "expectedRequest": {
                "httpMethod": "GET",
                "apiMethodPath": "assets",
                "authenticate": false
            }
        }),
    );

    let req = test::TestRequest::get()
        .uri("/api/0.13/messages")
        .insert_header((header::HOST, HOST))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );

    let req = test::TestRequest::get()
        .uri("/api/0.13/assets")
        .insert_header((header::HOST, HOST))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::OK
    );
}
