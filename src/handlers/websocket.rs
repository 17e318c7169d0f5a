use actix::{Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Handler, SpawnHandle, StreamHandler};
use actix_web::http::header;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use futures::StreamExt;
use nanoid::nanoid;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::handlers::api;
use crate::models::notification::NotificationEvent;
use crate::services::auth::{AuthRequestParts, RequestAuthenticator};
use crate::services::context::ContextStore;
use crate::services::dispatcher::{
    CloseChannel, Connect, DeliverNotification, Disconnect, NotificationDispatcher, Subscribe,
};

/// Subprotocol a notification client must negotiate.
pub const NOTIFICATION_SUBPROTOCOL: &str = "notify.catenis.io";
/// Text frame confirming that a notification channel is open.
pub const CHANNEL_OPEN_MESSAGE: &str = "NOTIFICATION_CHANNEL_OPEN";

/// Grace period for the client to send its authentication frame.
pub const AUTH_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);
/// Period between server pings on an authenticated channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Tracks the authentication state of a notification channel
#[derive(Debug, Clone, Copy, PartialEq)]
enum AuthState {
    /// No authentication frame received yet
    NotAuthenticated,
    /// Authentication frame received, verification in progress
    Authenticating,
    /// Channel has been authenticated successfully
    Authenticated,
    /// Authentication has failed; the channel is closing
    Failed,
}

/// First frame a client must send: the two authentication header values,
/// verbatim.
#[derive(Debug, Deserialize)]
struct AuthFrame {
    #[serde(rename = "x-bcot-timestamp")]
    timestamp: String,
    #[serde(rename = "authorization")]
    authorization: String,
}

/// A single accepted notification WebSocket connection.
pub struct NotificationChannel {
    /// Unique session id
    id: String,
    /// Event this channel subscribes to, taken from the upgrade URL
    event: NotificationEvent,
    /// Device the channel authenticated as
    device_id: Option<String>,
    /// Cleared on every ping, set on every pong
    alive: bool,
    auth_state: AuthState,
    /// Upgrade request parts retained for the auth handshake
    upgrade: AuthRequestParts,
    authenticator: Arc<dyn RequestAuthenticator>,
    dispatcher: Addr<NotificationDispatcher>,
    auth_deadline: Option<SpawnHandle>,
}

impl NotificationChannel {
    pub fn new(
        event: NotificationEvent,
        upgrade: AuthRequestParts,
        authenticator: Arc<dyn RequestAuthenticator>,
        dispatcher: Addr<NotificationDispatcher>,
    ) -> Self {
        Self {
            id: nanoid!(),
            event,
            device_id: None,
            alive: false,
            auth_state: AuthState::NotAuthenticated,
            upgrade,
            authenticator,
            dispatcher,
            auth_deadline: None,
        }
    }

    /// Arm the auth deadline: a channel that has not completed its
    /// handshake when it fires is closed.
    fn start_auth_deadline(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.auth_deadline = Some(ctx.run_later(AUTH_MESSAGE_TIMEOUT, |act, ctx| {
            if act.auth_state != AuthState::Authenticated {
                warn!("Channel {} failed to authenticate in time", act.id);
                act.close_with(
                    ws::CloseCode::Protocol,
                    "Failed to receive authentication message",
                    ctx,
                );
            }
        }));
    }

    /// Start the heartbeat process
    fn start_heartbeat(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.alive = true;
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if !act.alive {
                warn!("Notification channel {} missed heartbeat, terminating", act.id);
                ctx.stop();
                return;
            }
            act.alive = false;
            ctx.ping(b"");
        });
    }

    fn close_with(
        &mut self,
        code: ws::CloseCode,
        description: &str,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        ctx.close(Some(ws::CloseReason {
            code,
            description: Some(description.to_string()),
        }));
        ctx.stop();
    }

    /// Handle the authentication frame: validate its shape, inject the
    /// header values into the retained upgrade request and verify the
    /// signature against an empty body (the upgrade request carries none).
    fn handle_auth_frame(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let frame = match serde_json::from_str::<AuthFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Channel {} sent malformed auth frame: {}", self.id, e);
                self.auth_state = AuthState::Failed;
                self.close_with(ws::CloseCode::Protocol, "Invalid authentication message", ctx);
                return;
            }
        };

        self.auth_state = AuthState::Authenticating;
        let authenticator = self.authenticator.clone();
        let parts = self
            .upgrade
            .clone()
            .with_auth_values(&frame.timestamp, &frame.authorization);

        let verify = actix::fut::wrap_future(async move {
            authenticator.authenticate(parts, Vec::new()).await
        })
        .map(|result, act: &mut NotificationChannel, ctx| match result {
            Ok(device_id) => {
                info!(
                    "Notification channel {} authenticated for device {}",
                    act.id, device_id
                );
                act.auth_state = AuthState::Authenticated;
                act.device_id = Some(device_id.clone());
                if let Some(handle) = act.auth_deadline.take() {
                    ctx.cancel_future(handle);
                }
                act.start_heartbeat(ctx);
                ctx.text(CHANNEL_OPEN_MESSAGE);
                act.dispatcher.do_send(Subscribe {
                    session_id: act.id.clone(),
                    device_id,
                    event: act.event,
                    channel: ctx.address().recipient(),
                });
            }
            Err(failure) => {
                warn!(
                    "Notification channel {} authentication failed: {}",
                    act.id, failure.message
                );
                act.auth_state = AuthState::Failed;
                let code = if failure.status.is_server_error() {
                    ws::CloseCode::Error
                } else {
                    ws::CloseCode::Protocol
                };
                act.close_with(code, &failure.message, ctx);
            }
        });
        ctx.spawn(verify);
    }
}

impl Actor for NotificationChannel {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            "Notification channel {} opened for {} events",
            self.id, self.event
        );
        self.dispatcher.do_send(Connect {
            session_id: self.id.clone(),
            channel: ctx.address().recipient(),
        });
        self.start_auth_deadline(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> actix::Running {
        info!("Notification channel {} closed", self.id);
        self.dispatcher.do_send(Disconnect {
            session_id: self.id.clone(),
            device_id: self.device_id.clone(),
            event: self.event,
        });
        actix::Running::Stop
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for NotificationChannel {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.alive = true;
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.alive = true;
            }
            Ok(ws::Message::Text(text)) => match self.auth_state {
                AuthState::NotAuthenticated => self.handle_auth_frame(&text, ctx),
                AuthState::Authenticating | AuthState::Failed => {
                    debug!("Channel {} sent frame during handshake, ignoring", self.id);
                }
                AuthState::Authenticated => {
                    debug!("Channel {} sent unexpected text frame, ignoring", self.id);
                }
            },
            Ok(ws::Message::Binary(bin)) => {
                debug!(
                    "Channel {} sent unexpected binary frame ({} bytes), ignoring",
                    self.id,
                    bin.len()
                );
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("Channel {} closed by peer: {:?}", self.id, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Channel {} sent continuation frame, not supported", self.id);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error on channel {}: {}", self.id, err);
                ctx.stop();
            }
        }
    }
}

impl Handler<DeliverNotification> for NotificationChannel {
    type Result = ();

    fn handle(&mut self, msg: DeliverNotification, ctx: &mut Self::Context) {
        // Deliveries racing a close or an unfinished handshake are skipped.
        if self.auth_state != AuthState::Authenticated {
            debug!("Channel {} not authenticated, skipping delivery", self.id);
            return;
        }
        ctx.text(msg.0);
    }
}

impl Handler<CloseChannel> for NotificationChannel {
    type Result = ();

    fn handle(&mut self, msg: CloseChannel, ctx: &mut Self::Context) {
        self.close_with(ws::CloseCode::from(msg.code), &msg.description, ctx);
    }
}

/// Notification upgrade handler. Non-upgrade requests fall through to the
/// expectation matcher; upgrades are accepted only for a known event name
/// and the notification subprotocol.
pub async fn notify_ws_route(
    req: HttpRequest,
    payload: web::Payload,
    path: web::Path<String>,
    store: web::Data<ContextStore>,
    config: web::Data<Config>,
    authenticator: web::Data<Arc<dyn RequestAuthenticator>>,
    dispatcher: web::Data<Addr<NotificationDispatcher>>,
) -> Result<HttpResponse, Error> {
    if !is_websocket_upgrade(&req) {
        let body = collect_body(payload).await?;
        return Ok(api::process_request(
            &req,
            body,
            &store,
            &config,
            authenticator.get_ref().clone(),
        )
        .await);
    }

    let event = match path.into_inner().parse::<NotificationEvent>() {
        Ok(event) => event,
        Err(_) => {
            warn!("Rejecting WebSocket upgrade for unknown event name");
            return Ok(HttpResponse::BadRequest().finish());
        }
    };

    if !offers_notification_subprotocol(&req) {
        warn!("Rejecting WebSocket upgrade without notification subprotocol");
        return Ok(HttpResponse::BadRequest().finish());
    }

    let channel = NotificationChannel::new(
        event,
        AuthRequestParts::from_request(&req),
        authenticator.get_ref().clone(),
        dispatcher.get_ref().clone(),
    );

    let resp = ws::WsResponseBuilder::new(channel, &req, payload)
        .protocols(&[NOTIFICATION_SUBPROTOCOL])
        .start();
    match &resp {
        Ok(_) => debug!("WebSocket upgrade accepted for {} events", event),
        Err(e) => error!("WebSocket upgrade failed: {}", e),
    }
    resp
}

fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn offers_notification_subprotocol(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .any(|offered| offered.trim() == NOTIFICATION_SUBPROTOCOL)
        })
        .unwrap_or(false)
}

async fn collect_body(mut payload: web::Payload) -> Result<web::Bytes, Error> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}
