use actix_web::http::{header, Method, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::config::Config;
use crate::errors::json_string_body;
use crate::models::http_context::RequiredResponse;
use crate::services::auth::{AuthRequestParts, RequestAuthenticator};
use crate::services::context::ContextStore;

#[derive(Serialize)]
struct SuccessEnvelope<'a> {
    status: &'a str,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    status: &'a str,
    message: &'a str,
}

/// Catch-all handler of the emulated API surface: every request is checked
/// against the installed HTTP expectation and answered with the installed
/// response.
pub async fn emulate_request(
    req: HttpRequest,
    body: web::Bytes,
    store: web::Data<ContextStore>,
    config: web::Data<Config>,
    authenticator: web::Data<Arc<dyn RequestAuthenticator>>,
) -> HttpResponse {
    process_request(
        &req,
        body,
        &store,
        &config,
        authenticator.get_ref().clone(),
    )
    .await
}

/// Expectation matching shared by the catch-all route and the notification
/// route's non-upgrade fallback.
pub(crate) async fn process_request(
    req: &HttpRequest,
    body: web::Bytes,
    store: &ContextStore,
    config: &Config,
    authenticator: Arc<dyn RequestAuthenticator>,
) -> HttpResponse {
    if is_preflight(req) {
        debug!("Answering CORS preflight for {}", req.uri());
        return preflight_response(req);
    }

    let context = match store.http_context() {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to read HTTP context: {}", e);
            return json_message(req, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    let Some(context) = context else {
        return json_message(req, StatusCode::INTERNAL_SERVER_ERROR, "Missing HTTP context");
    };
    let expected = &context.expected_request;

    if req.method().as_str() != expected.http_method.as_str() {
        return json_message(
            req,
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!(
                "Unexpected HTTP request method: expected: {}; received: {}",
                expected.http_method,
                req.method()
            ),
        );
    }

    let host = req.connection_info().host().to_string();
    let received_url = match Url::parse(&format!("http://{}{}", host, req.uri())) {
        Ok(url) => url,
        Err(e) => {
            error!("Failed to parse request URL {}: {}", req.uri(), e);
            return json_message(req, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    let expected_url = match resolve_expected_url(
        &config.api_base_path(),
        &host,
        &expected.api_method_path,
    ) {
        Ok(url) => url,
        Err(e) => {
            error!(
                "Failed to resolve expected URL {}: {}",
                expected.api_method_path, e
            );
            return json_message(req, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    if received_url.path() != expected_url.path() {
        return json_message(
            req,
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!(
                "Unexpected HTTP request path: expected: {}; received: {}",
                expected_url.path(),
                received_url.path()
            ),
        );
    }

    if !queries_equivalent(&expected_url, &received_url) {
        return json_message(
            req,
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!(
                "Unexpected HTTP request query string: expected: {}; received: {}",
                expected_url.query().unwrap_or(""),
                received_url.query().unwrap_or("")
            ),
        );
    }

    if let Some(expected_data) = &expected.data {
        if !body.is_empty() {
            let content_type = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            if !content_type.starts_with("application/json") {
                return json_message(
                    req,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!(
                        "Unexpected content type of HTTP request: expected: application/json; received: {}",
                        content_type
                    ),
                );
            }

            if body.as_ref() != expected_data.as_bytes() {
                return json_message(
                    req,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!(
                        "Unexpected HTTP request body: expected: {}; received: {}",
                        expected_data,
                        String::from_utf8_lossy(&body)
                    ),
                );
            }
        }
    }

    if expected.must_authenticate() {
        // The signature covers the body only when the expectation reads
        // one; otherwise it covers empty bytes.
        let signing_body = if expected.data.is_some() {
            body.to_vec()
        } else {
            Vec::new()
        };
        let parts = AuthRequestParts::from_request(req);
        match authenticator.authenticate(parts, signing_body).await {
            Ok(device_id) => debug!("Request authenticated for device {}", device_id),
            Err(failure) => {
                info!("Request authentication failed: {}", failure.message);
                return json_message(req, failure.status, &failure.message);
            }
        }
    }

    match &context.required_response {
        Some(RequiredResponse::Error {
            status_code,
            error_message,
        }) => {
            let status = StatusCode::from_u16(*status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            json_response(
                req,
                status,
                &ErrorEnvelope {
                    status: "error",
                    message: error_message,
                },
            )
        }
        Some(RequiredResponse::Success { data }) => match serde_json::from_str(data) {
            Ok(value) => json_response(
                req,
                StatusCode::OK,
                &SuccessEnvelope {
                    status: "success",
                    data: value,
                },
            ),
            Err(e) => {
                // Guarded against at install time.
                error!("Installed response data no longer parses: {}", e);
                json_message(req, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        },
        None => empty_response(req, StatusCode::OK),
    }
}

/// Resolve the expected request URL by joining the installed method path
/// (leading slash stripped) against the API base path on the request's
/// authority.
pub(crate) fn resolve_expected_url(
    base_path: &str,
    host: &str,
    api_method_path: &str,
) -> Result<Url, url::ParseError> {
    let base = Url::parse(&format!("http://{}{}", host, base_path))?;
    base.join(api_method_path.trim_start_matches('/'))
}

/// Compare the query strings of two URLs as sets of parameter names with
/// per-name value multisets; order never matters.
pub(crate) fn queries_equivalent(a: &Url, b: &Url) -> bool {
    fn values_by_name(url: &Url) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in url.query_pairs() {
            map.entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        for values in map.values_mut() {
            values.sort();
        }
        map
    }

    values_by_name(a) == values_by_name(b)
}

fn is_preflight(req: &HttpRequest) -> bool {
    req.method() == Method::OPTIONS
        && (req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_HEADERS)
            || req
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD))
}

fn preflight_response(req: &HttpRequest) -> HttpResponse {
    let mut builder = HttpResponse::build(StatusCode::NO_CONTENT);
    apply_cors_origin(req, &mut builder);
    builder
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, OPTIONS"))
        .insert_header((
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Origin, X-Requested-With, Content-Type, Accept, X-Bcot-Timestamp, Authorization",
        ))
        .insert_header((header::ACCESS_CONTROL_MAX_AGE, "86400"))
        .finish()
}

/// Every emulated response carries an allow-origin header: the request's
/// origin echoed back (with a matching Vary) when present, the wildcard
/// otherwise.
fn apply_cors_origin(req: &HttpRequest, builder: &mut actix_web::HttpResponseBuilder) {
    match req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
    {
        Some(origin) => {
            builder.insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin));
            builder.insert_header((header::VARY, "Origin"));
        }
        None => {
            builder.insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"));
        }
    }
}

fn empty_response(req: &HttpRequest, status: StatusCode) -> HttpResponse {
    let mut builder = HttpResponse::build(status);
    apply_cors_origin(req, &mut builder);
    builder.finish()
}

/// Emit a JSON-encoded string body, the framing shared by diagnostics and
/// authentication failures.
pub(crate) fn json_message(req: &HttpRequest, status: StatusCode, message: &str) -> HttpResponse {
    let mut builder = HttpResponse::build(status);
    apply_cors_origin(req, &mut builder);
    builder
        .insert_header(header::ContentType::json())
        .body(json_string_body(message))
}

fn json_response<T: Serialize>(req: &HttpRequest, status: StatusCode, payload: &T) -> HttpResponse {
    let body = match serde_json::to_string_pretty(payload) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize response body: {}", e);
            return json_message(req, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let mut builder = HttpResponse::build(status);
    apply_cors_origin(req, &mut builder);
    builder.insert_header(header::ContentType::json()).body(body)
}
