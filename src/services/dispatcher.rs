use actix::{Actor, AsyncContext, Context, Handler, Message, Recipient, SpawnHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::models::notification::NotificationEvent;
use crate::services::context::ContextStore;

/// Close code sent when the operator closes every client.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Reason attached to operator-initiated closes.
pub const CLOSED_BY_USER_REASON: &str = "Connection closed by end user";

/// Notification payload delivered to a subscribed channel.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DeliverNotification(pub String);

/// Instruct a channel to close with the given code and reason.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseChannel {
    pub code: u16,
    pub description: String,
}

/// A channel was accepted and should be tracked for close-all.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub session_id: String,
    pub channel: Recipient<CloseChannel>,
}

/// A channel finished its auth handshake and subscribes to its event.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub session_id: String,
    pub device_id: String,
    pub event: NotificationEvent,
    pub channel: Recipient<DeliverNotification>,
}

/// A channel went away; drop it from the client set and routing index.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub session_id: String,
    pub device_id: Option<String>,
    pub event: NotificationEvent,
}

/// Close every known channel and cancel pending deliveries. Resolves to
/// the number of channels that were told to close.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct CloseAllChannels;

/// Routes installed notification messages to authenticated channels.
///
/// Owns the channel index (device ID and event to subscribed channels)
/// and the pending-dispatch table that keeps at most one outstanding
/// delayed delivery per (device, event) pair. All mutations go through
/// the actor mailbox, which serializes them against dispatch iteration.
pub struct NotificationDispatcher {
    store: Arc<ContextStore>,
    clients: HashMap<String, Recipient<CloseChannel>>,
    index: HashMap<String, HashMap<NotificationEvent, HashMap<String, Recipient<DeliverNotification>>>>,
    pending: HashMap<String, SpawnHandle>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self {
            store,
            clients: HashMap::new(),
            index: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn pending_key(device_id: &str, event: NotificationEvent) -> String {
        format!("{}:{}", device_id, event)
    }

    /// Send the message to every channel currently indexed under the
    /// (device, event) pair. Channels that are gone drop the message.
    fn deliver(&self, device_id: &str, event: NotificationEvent, data: &str) {
        let channels = self
            .index
            .get(device_id)
            .and_then(|by_event| by_event.get(&event));

        let Some(channels) = channels else {
            return;
        };

        debug!(
            "Delivering {} notification to {} channel(s) of device {}",
            event,
            channels.len(),
            device_id
        );
        for channel in channels.values() {
            channel.do_send(DeliverNotification(data.to_string()));
        }
    }

    /// Deliver the installed notification message for a (device, event)
    /// pair, immediately or after its programmed delay. At most one
    /// delayed delivery is kept pending per pair.
    fn auto_dispatch(
        &mut self,
        device_id: String,
        event: NotificationEvent,
        ctx: &mut Context<Self>,
    ) {
        let message = match self.store.notify_message(&device_id, event) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to read notification context: {}", e);
                return;
            }
        };

        match message.timeout {
            Some(timeout) if timeout > 0 => {
                let key = Self::pending_key(&device_id, event);
                if self.pending.contains_key(&key) {
                    return;
                }

                debug!(
                    "Scheduling {} notification for device {} in {} ms",
                    event, device_id, timeout
                );
                let timer_key = key.clone();
                let handle = ctx.run_later(Duration::from_millis(timeout), move |act, _ctx| {
                    act.pending.remove(&timer_key);
                    act.deliver(&device_id, event, &message.data);
                });
                self.pending.insert(key, handle);
            }
            _ => self.deliver(&device_id, event, &message.data),
        }
    }
}

impl Actor for NotificationDispatcher {
    type Context = Context<Self>;

    fn started(&mut self, _: &mut Self::Context) {
        info!("Notification dispatcher started");
    }
}

impl Handler<Connect> for NotificationDispatcher {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Self::Context) {
        debug!("Tracking notification channel {}", msg.session_id);
        self.clients.insert(msg.session_id, msg.channel);
    }
}

impl Handler<Subscribe> for NotificationDispatcher {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, ctx: &mut Self::Context) {
        info!(
            "Channel {} subscribed to {} events of device {}",
            msg.session_id, msg.event, msg.device_id
        );
        self.index
            .entry(msg.device_id.clone())
            .or_default()
            .entry(msg.event)
            .or_default()
            .insert(msg.session_id, msg.channel);

        self.auto_dispatch(msg.device_id, msg.event, ctx);
    }
}

impl Handler<Disconnect> for NotificationDispatcher {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Self::Context) {
        debug!("Dropping notification channel {}", msg.session_id);
        self.clients.remove(&msg.session_id);

        let Some(device_id) = msg.device_id else {
            return;
        };

        // Prune empty inner maps so the index does not accumulate stale
        // device entries across a test run.
        if let Some(by_event) = self.index.get_mut(&device_id) {
            if let Some(channels) = by_event.get_mut(&msg.event) {
                channels.remove(&msg.session_id);
                if channels.is_empty() {
                    by_event.remove(&msg.event);
                }
            }
            if by_event.is_empty() {
                self.index.remove(&device_id);
            }
        }
    }
}

impl Handler<CloseAllChannels> for NotificationDispatcher {
    type Result = usize;

    fn handle(&mut self, _: CloseAllChannels, ctx: &mut Self::Context) -> usize {
        info!("Closing {} notification channel(s)", self.clients.len());

        for (_, handle) in self.pending.drain() {
            ctx.cancel_future(handle);
        }

        for channel in self.clients.values() {
            channel.do_send(CloseChannel {
                code: CLOSE_GOING_AWAY,
                description: CLOSED_BY_USER_REASON.to_string(),
            });
        }

        self.clients.len()
    }
}
