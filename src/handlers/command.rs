use actix::Addr;
use actix_web::dev::ServerHandle;
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::errors::{json_string_body, EmulatorError, EmulatorResult};
use crate::models::credentials::CredentialsInstall;
use crate::models::http_context::HttpContext;
use crate::models::notification::NotifyContext;
use crate::services::context::ContextStore;
use crate::services::dispatcher::{CloseAllChannels, NotificationDispatcher};

struct Handles {
    api: ServerHandle,
    command: ServerHandle,
}

/// Handles of the two HTTP listeners, registered after both servers are
/// created so the close endpoint can stop them.
#[derive(Clone, Default)]
pub struct ServerControl {
    handles: Arc<Mutex<Option<Handles>>>,
}

impl ServerControl {
    pub fn register(&self, api: ServerHandle, command: ServerHandle) {
        if let Ok(mut slot) = self.handles.lock() {
            *slot = Some(Handles { api, command });
        }
    }

    /// Stop the API server gracefully, then the command server. Runs in
    /// the background so the caller can answer its request first.
    pub fn shutdown(&self) {
        let handles = match self.handles.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };

        let Some(handles) = handles else {
            warn!("Shutdown requested but no server handles registered");
            return;
        };

        tokio::spawn(async move {
            info!("Closing API server");
            handles.api.stop(true).await;
            info!("Closing command server");
            handles.command.stop(true).await;
        });
    }
}

fn json_body(status: StatusCode, body: String) -> HttpResponse {
    HttpResponse::build(status)
        .insert_header(header::ContentType::json())
        .body(body)
}

fn empty_ok() -> HttpResponse {
    HttpResponse::Ok().finish()
}

fn has_json_content_type(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

fn pretty<T: serde::Serialize>(value: &T) -> EmulatorResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| EmulatorError::internal(e.to_string()))
}

/// GET /device-credentials
pub async fn get_device_credentials(
    store: web::Data<ContextStore>,
) -> EmulatorResult<HttpResponse> {
    let entries = store.credentials()?;

    Ok(json_body(StatusCode::OK, pretty(&entries)?))
}

/// POST /device-credentials
pub async fn set_device_credentials(
    req: HttpRequest,
    body: web::Bytes,
    store: web::Data<ContextStore>,
) -> HttpResponse {
    let installed = has_json_content_type(&req)
        .then(|| serde_json::from_slice::<CredentialsInstall>(&body).ok())
        .flatten()
        .map(|install| store.set_credentials(install.into_entries()));

    match installed {
        Some(Ok(())) => {
            info!("Device credentials installed");
            empty_ok()
        }
        _ => {
            warn!("Rejected device credentials install");
            json_body(
                StatusCode::BAD_REQUEST,
                json_string_body("Invalid device credentials"),
            )
        }
    }
}

/// GET /http-context
pub async fn get_http_context(store: web::Data<ContextStore>) -> EmulatorResult<HttpResponse> {
    let context = store.http_context()?;

    Ok(json_body(StatusCode::OK, pretty(&context.as_deref())?))
}

/// POST /http-context
pub async fn set_http_context(
    req: HttpRequest,
    body: web::Bytes,
    store: web::Data<ContextStore>,
) -> HttpResponse {
    let installed = has_json_content_type(&req)
        .then(|| serde_json::from_slice::<HttpContext>(&body).ok())
        .flatten()
        .map(|context| store.set_http_context(context));

    match installed {
        Some(Ok(())) => {
            info!("HTTP context installed");
            empty_ok()
        }
        _ => {
            warn!("Rejected HTTP context install");
            json_body(
                StatusCode::BAD_REQUEST,
                json_string_body("Invalid HTTP context"),
            )
        }
    }
}

/// GET /notify-context
pub async fn get_notify_context(store: web::Data<ContextStore>) -> EmulatorResult<HttpResponse> {
    let context = store.notify_context()?;

    Ok(json_body(StatusCode::OK, pretty(&context.as_deref())?))
}

/// POST /notify-context
pub async fn set_notify_context(
    req: HttpRequest,
    body: web::Bytes,
    store: web::Data<ContextStore>,
) -> HttpResponse {
    let installed = has_json_content_type(&req)
        .then(|| serde_json::from_slice::<NotifyContext>(&body).ok())
        .flatten()
        .map(|context| store.set_notify_context(context));

    match installed {
        Some(Ok(())) => {
            info!("Notification context installed");
            empty_ok()
        }
        _ => {
            warn!("Rejected notification context install");
            json_body(
                StatusCode::BAD_REQUEST,
                json_string_body("Invalid notification context"),
            )
        }
    }
}

/// POST /notify-close
pub async fn close_notification_channels(
    dispatcher: web::Data<Addr<NotificationDispatcher>>,
) -> EmulatorResult<HttpResponse> {
    let closed = dispatcher.send(CloseAllChannels).await.map_err(|e| {
        error!("Failed to reach notification dispatcher: {}", e);
        EmulatorError::internal(e.to_string())
    })?;

    info!("Close requested for {} notification channel(s)", closed);
    Ok(empty_ok())
}

/// GET /info
pub async fn server_info() -> HttpResponse {
    json_body(
        StatusCode::OK,
        json_string_body(&format!(
            "Catenis API Emulator (ver. {})",
            env!("CARGO_PKG_VERSION")
        )),
    )
}

/// POST /close
pub async fn close_server(
    dispatcher: web::Data<Addr<NotificationDispatcher>>,
    control: web::Data<ServerControl>,
) -> HttpResponse {
    info!("Server close requested");
    dispatcher.do_send(CloseAllChannels);
    control.shutdown();

    empty_ok()
}

/// Fallback for unknown control-plane routes and mismatched methods.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().finish()
}
