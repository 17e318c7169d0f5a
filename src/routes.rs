use actix_web::web;

use crate::handlers::api::emulate_request;
use crate::handlers::command::{
    close_notification_channels, close_server, get_device_credentials, get_http_context,
    get_notify_context, not_found, server_info, set_device_credentials, set_http_context,
    set_notify_context,
};
use crate::handlers::websocket::notify_ws_route;

/// Routes of the emulated API surface. The notification URL accepts
/// WebSocket upgrades; everything else, including non-upgrade requests on
/// the notification URL, is handled by the expectation matcher.
pub fn api_routes(cfg: &mut web::ServiceConfig, api_base_path: &str) {
    cfg.service(
        web::resource(format!("{}notify/ws/{{event}}", api_base_path))
            .route(web::get().to(notify_ws_route))
            .default_service(web::route().to(emulate_request)),
    )
    .default_service(web::route().to(emulate_request));
}

/// Control-plane routes. Each path answers only its documented methods;
/// everything else is a 404.
pub fn command_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/device-credentials")
            .route(web::get().to(get_device_credentials))
            .route(web::post().to(set_device_credentials))
            .default_service(web::route().to(not_found)),
    )
    .service(
        web::resource("/http-context")
            .route(web::get().to(get_http_context))
            .route(web::post().to(set_http_context))
            .default_service(web::route().to(not_found)),
    )
    .service(
        web::resource("/notify-context")
            .route(web::get().to(get_notify_context))
            .route(web::post().to(set_notify_context))
            .default_service(web::route().to(not_found)),
    )
    .service(
        web::resource("/notify-close")
            .route(web::post().to(close_notification_channels))
            .default_service(web::route().to(not_found)),
    )
    .service(
        web::resource("/info")
            .route(web::get().to(server_info))
            .default_service(web::route().to(not_found)),
    )
    .service(
        web::resource("/close")
            .route(web::post().to(close_server))
            .default_service(web::route().to(not_found)),
    )
    .default_service(web::route().to(not_found));
}
