use actix::{Actor, Context, Handler};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use catenis_api_emulator::models::credentials::DeviceCredentials;
use catenis_api_emulator::models::notification::NotificationEvent;
use catenis_api_emulator::services::context::ContextStore;
use catenis_api_emulator::services::dispatcher::{
    CloseAllChannels, CloseChannel, Connect, DeliverNotification, Disconnect,
    NotificationDispatcher, Subscribe, CLOSED_BY_USER_REASON, CLOSE_GOING_AWAY,
};

const DEVICE_ID: &str = "drc3XdxNtzoucpw9xiRp";
const EVENT: NotificationEvent = NotificationEvent::NewMsgReceived;
const DATA: &str = r#"{"messageId":"mdx8vuCGWdb2TFeWFZd6"}"#;

/// Stand-in for a notification channel that records what it is told.
struct RecordingChannel {
    delivered: Arc<Mutex<Vec<String>>>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl Actor for RecordingChannel {
    type Context = Context<Self>;
}

impl Handler<DeliverNotification> for RecordingChannel {
    type Result = ();

    fn handle(&mut self, msg: DeliverNotification, _: &mut Self::Context) {
        self.delivered.lock().unwrap().push(msg.0);
    }
}

impl Handler<CloseChannel> for RecordingChannel {
    type Result = ();

    fn handle(&mut self, msg: CloseChannel, _: &mut Self::Context) {
        self.closes
            .lock()
            .unwrap()
            .push((msg.code, msg.description));
    }
}

struct ChannelProbe {
    addr: actix::Addr<RecordingChannel>,
    delivered: Arc<Mutex<Vec<String>>>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
}

fn recording_channel() -> ChannelProbe {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(Mutex::new(Vec::new()));
    let addr = RecordingChannel {
        delivered: delivered.clone(),
        closes: closes.clone(),
    }
    .start();

    ChannelProbe {
        addr,
        delivered,
        closes,
    }
}

fn store_with_notify_context(timeout: Option<u64>) -> Arc<ContextStore> {
    let store = Arc::new(ContextStore::new());
    store
        .set_credentials(vec![DeviceCredentials {
            device_id: DEVICE_ID.to_string(),
            api_access_secret: "secret".to_string(),
        }])
        .unwrap();

    let timeout_field = match timeout {
        Some(ms) => format!(r#", "timeout": {}"#, ms),
        None => String::new(),
    };
    store
        .set_notify_context(
            serde_json::from_str(&format!(
                r#"{{"{}": {{"new-msg-received": {{"data": {}{}}}}}}}"#,
                DEVICE_ID,
                serde_json::to_string(DATA).unwrap(),
                timeout_field
            ))
            .unwrap(),
        )
        .unwrap();

    store
}

async fn subscribe(
    dispatcher: &actix::Addr<NotificationDispatcher>,
    probe: &ChannelProbe,
    session_id: &str,
) {
    dispatcher
        .send(Connect {
            session_id: session_id.to_string(),
            channel: probe.addr.clone().recipient(),
        })
        .await
        .unwrap();
    dispatcher
        .send(Subscribe {
            session_id: session_id.to_string(),
            device_id: DEVICE_ID.to_string(),
            event: EVENT,
            channel: probe.addr.clone().recipient(),
        })
        .await
        .unwrap();
}

#[actix_rt::test]
async fn immediate_dispatch_delivers_on_subscribe() {
    let store = store_with_notify_context(None);
    let dispatcher = NotificationDispatcher::new(store).start();
    let probe = recording_channel();

    subscribe(&dispatcher, &probe, "s1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*probe.delivered.lock().unwrap(), vec![DATA.to_string()]);
}

#[actix_rt::test]
async fn zero_timeout_delivers_immediately() {
    let store = store_with_notify_context(Some(0));
    let dispatcher = NotificationDispatcher::new(store).start();
    let probe = recording_channel();

    subscribe(&dispatcher, &probe, "s1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(probe.delivered.lock().unwrap().len(), 1);
}

#[actix_rt::test]
async fn delayed_dispatch_fires_once_for_concurrent_channels() {
    let store = store_with_notify_context(Some(100));
    let dispatcher = NotificationDispatcher::new(store).start();
    let first = recording_channel();
    let second = recording_channel();

    // Both channels subscribe before the timer fires; only one pending
    // dispatch may exist, and its firing reaches every channel once.
    subscribe(&dispatcher, &first, "s1").await;
    subscribe(&dispatcher, &second, "s2").await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(first.delivered.lock().unwrap().is_empty());
    assert!(second.delivered.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*first.delivered.lock().unwrap(), vec![DATA.to_string()]);
    assert_eq!(*second.delivered.lock().unwrap(), vec![DATA.to_string()]);
}

#[actix_rt::test]
async fn unrelated_channels_receive_nothing() {
    let store = store_with_notify_context(None);
    let dispatcher = NotificationDispatcher::new(store).start();
    let other_event = recording_channel();
    let other_device = recording_channel();

    dispatcher
        .send(Connect {
            session_id: "s1".to_string(),
            channel: other_event.addr.clone().recipient(),
        })
        .await
        .unwrap();
    dispatcher
        .send(Subscribe {
            session_id: "s1".to_string(),
            device_id: DEVICE_ID.to_string(),
            event: NotificationEvent::SentMsgRead,
            channel: other_event.addr.clone().recipient(),
        })
        .await
        .unwrap();
    dispatcher
        .send(Subscribe {
            session_id: "s2".to_string(),
            device_id: "dANotherDevice000001".to_string(),
            event: EVENT,
            channel: other_device.addr.clone().recipient(),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(other_event.delivered.lock().unwrap().is_empty());
    assert!(other_device.delivered.lock().unwrap().is_empty());
}

#[actix_rt::test]
async fn disconnected_channels_are_dropped_from_the_index() {
    let store = Arc::new(ContextStore::new());
    let dispatcher = NotificationDispatcher::new(store.clone()).start();
    let first = recording_channel();
    let second = recording_channel();

    subscribe(&dispatcher, &first, "s1").await;
    dispatcher
        .send(Disconnect {
            session_id: "s1".to_string(),
            device_id: Some(DEVICE_ID.to_string()),
            event: EVENT,
        })
        .await
        .unwrap();

    // Install the notification after the disconnect; only the channel
    // still indexed receives it.
    store
        .set_notify_context(
            serde_json::from_str(&format!(
                r#"{{"{}": {{"new-msg-received": {{"data": "{{}}"}}}}}}"#,
                DEVICE_ID
            ))
            .unwrap(),
        )
        .unwrap();
    subscribe(&dispatcher, &second, "s2").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(first.delivered.lock().unwrap().is_empty());
    assert_eq!(second.delivered.lock().unwrap().len(), 1);
}

#[actix_rt::test]
async fn close_all_reaches_every_known_channel() {
    let store = Arc::new(ContextStore::new());
    let dispatcher = NotificationDispatcher::new(store).start();
    let authenticated = recording_channel();
    let unauthenticated = recording_channel();

    subscribe(&dispatcher, &authenticated, "s1").await;
    // A channel that never finished its handshake is still tracked.
    dispatcher
        .send(Connect {
            session_id: "s2".to_string(),
            channel: unauthenticated.addr.clone().recipient(),
        })
        .await
        .unwrap();

    let closed = dispatcher.send(CloseAllChannels).await.unwrap();
    assert_eq!(closed, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    for probe in [&authenticated, &unauthenticated] {
        let closes = probe.closes.lock().unwrap();
        assert_eq!(
            *closes,
            vec![(CLOSE_GOING_AWAY, CLOSED_BY_USER_REASON.to_string())]
        );
    }
}

#[actix_rt::test]
async fn close_all_cancels_pending_dispatches() {
    let store = store_with_notify_context(Some(30));
    let dispatcher = NotificationDispatcher::new(store).start();
    let probe = recording_channel();

    subscribe(&dispatcher, &probe, "s1").await;
    dispatcher.send(CloseAllChannels).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(probe.delivered.lock().unwrap().is_empty());
}
