use actix_web::http::StatusCode;
use actix_web::HttpRequest;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::services::context::ContextStore;
use crate::services::signature;

/// The pieces of a request that participate in authentication. Kept as an
/// owned value so the WebSocket handshake can retain the upgrade request
/// and later inject the header values received in the auth frame.
#[derive(Debug, Clone)]
pub struct AuthRequestParts {
    pub method: String,
    /// Raw request URL (path and query) exactly as received
    pub url: String,
    /// Value of the host header
    pub host: String,
    pub timestamp: Option<String>,
    pub authorization: Option<String>,
}

impl AuthRequestParts {
    pub fn from_request(req: &HttpRequest) -> Self {
        let host = req.connection_info().host().to_string();

        AuthRequestParts {
            method: req.method().to_string(),
            url: req.uri().to_string(),
            host,
            timestamp: header_value(req, "x-bcot-timestamp"),
            authorization: header_value(req, "authorization"),
        }
    }

    /// Replace the authentication header values, as done when a WebSocket
    /// auth frame supplies them for the retained upgrade request.
    pub fn with_auth_values(mut self, timestamp: &str, authorization: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self.authorization = Some(authorization.to_string());
        self
    }
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Failure of request authentication, carrying the HTTP status the caller
/// should surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub status: StatusCode,
    pub message: String,
}

impl AuthFailure {
    fn unauthorized(message: impl Into<String>) -> Self {
        AuthFailure {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        AuthFailure {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_string(),
        }
    }
}

/// Capability to authenticate a request against the installed device
/// credentials. Injected into the WebSocket subsystem so it can reuse the
/// API server's authentication without owning it.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    /// Authenticate a request; returns the device ID the request was
    /// signed for.
    async fn authenticate(
        &self,
        parts: AuthRequestParts,
        body: Vec<u8>,
    ) -> Result<String, AuthFailure>;
}

/// Authenticator backed by the emulator's credentials registry.
pub struct AuthService {
    store: Arc<ContextStore>,
}

impl AuthService {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestAuthenticator for AuthService {
    async fn authenticate(
        &self,
        parts: AuthRequestParts,
        body: Vec<u8>,
    ) -> Result<String, AuthFailure> {
        let auth_data = signature::parse_auth_data(
            parts.timestamp.as_deref(),
            parts.authorization.as_deref(),
            &parts.host,
            Utc::now(),
        )
        .map_err(|e| {
            debug!("Request authentication headers rejected: {}", e);
            AuthFailure::unauthorized(e.to_string())
        })?;

        let secret = self
            .store
            .api_access_secret(&auth_data.device_id)
            .map_err(|_| AuthFailure::internal())?;

        let Some(secret) = secret else {
            warn!("Unknown device in authorization header: {}", auth_data.device_id);
            return Err(AuthFailure::unauthorized(
                "Authorization failed; invalid device or signature",
            ));
        };

        let expected_signature = signature::sign_request(
            &secret,
            &auth_data.sign_date,
            &auth_data.timestamp,
            &parts.method,
            &parts.url,
            &parts.host,
            &body,
        );

        if expected_signature != auth_data.signature {
            warn!("Signature mismatch for device {}", auth_data.device_id);
            return Err(AuthFailure::unauthorized(
                "Authorization failed; invalid device or signature",
            ));
        }

        debug!("Device {} authenticated", auth_data.device_id);
        Ok(auth_data.device_id)
    }
}
