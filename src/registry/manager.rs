//! The connection registry.
//!
//! [`ConnectionManager`] owns both channels and the state consumers read:
//! the latest snapshot, the connectivity flag of each channel, and the
//! listener lists. It is the only entry point consumers need.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;

use super::subscribers::{Callback, SubscriberList, Subscription};
use crate::channel::{
    ChannelState, CommandChannel, Connector, LinkListener, SnapshotChannel, SocketOptions,
    WsConnector,
};
use crate::config::LinkConfig;
use crate::domain::{ChannelKind, Command, Snapshot, SnapshotEvent, StatusEvent};
use crate::error::LinkError;

/// Point-in-time counters for both channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Snapshots decoded and delivered.
    pub snapshots_received: u64,
    /// Inbound frames dropped because they did not decode.
    pub decode_failures: u64,
    /// Commands handed to an open command channel.
    pub commands_sent: u64,
    /// Commands dropped because the command channel was not open.
    pub commands_dropped: u64,
    /// Reconnect attempts on the snapshot channel.
    pub live_reconnects: u64,
    /// Reconnect attempts on the command channel.
    pub command_reconnects: u64,
}

/// Shared state written by the channels and read by consumers.
struct Hub {
    latest: RwLock<Option<Arc<Snapshot>>>,
    sequence: AtomicU64,
    live_connected: Mutex<bool>,
    command_connected: Mutex<bool>,
    snapshots: Arc<SubscriberList<SnapshotEvent>>,
    live_status: Arc<SubscriberList<StatusEvent>>,
    command_status: Arc<SubscriberList<StatusEvent>>,
}

impl Hub {
    fn new() -> Self {
        Self {
            latest: RwLock::new(None),
            sequence: AtomicU64::new(0),
            live_connected: Mutex::new(false),
            command_connected: Mutex::new(false),
            snapshots: Arc::new(SubscriberList::new()),
            live_status: Arc::new(SubscriberList::new()),
            command_status: Arc::new(SubscriberList::new()),
        }
    }

    fn flag(&self, channel: ChannelKind) -> &Mutex<bool> {
        match channel {
            ChannelKind::Live => &self.live_connected,
            ChannelKind::Command => &self.command_connected,
        }
    }

    fn listeners(&self, channel: ChannelKind) -> &Arc<SubscriberList<StatusEvent>> {
        match channel {
            ChannelKind::Live => &self.live_status,
            ChannelKind::Command => &self.command_status,
        }
    }

    fn is_connected(&self, channel: ChannelKind) -> bool {
        *self.flag(channel).lock()
    }

    /// Records `connected` and notifies listeners if it differs from the
    /// stored flag. Each socket calls this for its channel one transition
    /// at a time.
    fn set_status(&self, channel: ChannelKind, connected: bool) {
        {
            let mut flag = self.flag(channel).lock();
            if *flag == connected {
                return;
            }
            *flag = connected;
        }

        tracing::info!(channel = %channel, connected, "connectivity changed");
        let _ = self
            .listeners(channel)
            .emit(&StatusEvent::now(channel, connected));
    }

    /// Registers a status listener and calls it once with the current flag.
    fn watch_status(&self, channel: ChannelKind, callback: Callback<StatusEvent>) -> Subscription {
        let list = self.listeners(channel);
        let (id, connected) = {
            let flag = self.flag(channel).lock();
            (list.insert(Arc::clone(&callback)), *flag)
        };
        callback(&StatusEvent::now(channel, connected));
        Subscription::new(list, id)
    }
}

impl LinkListener for Hub {
    fn snapshot_received(&self, snapshot: Snapshot) {
        if !self.is_connected(ChannelKind::Live) {
            tracing::debug!(tick = snapshot.tick, "discarding snapshot received after disconnect");
            return;
        }

        let snapshot = Arc::new(snapshot);
        *self.latest.write() = Some(Arc::clone(&snapshot));
        let event = SnapshotEvent {
            snapshot,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            received_at: Utc::now(),
        };
        let delivered = self.snapshots.emit(&event);
        tracing::debug!(
            tick = event.snapshot.tick,
            sequence = event.sequence,
            delivered,
            "snapshot delivered"
        );
    }

    fn status_changed(&self, channel: ChannelKind, connected: bool) {
        self.set_status(channel, connected);
    }
}

/// Owns the snapshot and command channels and fans their output out to
/// registered listeners.
///
/// All operations return immediately; network work runs on tasks spawned
/// on the runtime captured at construction. Dropping the manager tears
/// both channels down.
pub struct ConnectionManager {
    hub: Arc<Hub>,
    live: SnapshotChannel<Hub>,
    command: CommandChannel<Hub>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("live", &self.live)
            .field("command", &self.command)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager that connects over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidConfig`] if `config` fails validation,
    /// or [`LinkError::Runtime`] if called outside a Tokio runtime.
    pub fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Creates a manager that opens connections through `connector`.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionManager::new`].
    pub fn with_connector(
        config: &LinkConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| LinkError::Runtime(e.to_string()))?;
        let hub = Arc::new(Hub::new());

        let live = SnapshotChannel::new(
            SocketOptions {
                kind: ChannelKind::Live,
                url: config.live_url.clone(),
                backoff: config.live_backoff,
                connect_timeout: config.connect_timeout,
            },
            Arc::clone(&connector),
            Arc::clone(&hub),
            runtime.clone(),
        );
        let command = CommandChannel::new(
            SocketOptions {
                kind: ChannelKind::Command,
                url: config.command_endpoint(),
                backoff: config.command_backoff,
                connect_timeout: config.connect_timeout,
            },
            connector,
            Arc::clone(&hub),
            runtime,
        );

        if config.command_token.is_none() {
            tracing::warn!("no command token configured, the backend may reject commands");
        }

        Ok(Self { hub, live, command })
    }

    /// Brings up both channels. Channels already connecting or open are
    /// left alone.
    pub fn connect(&self) {
        tracing::info!("connecting");
        self.live.open();
        self.command.open();
    }

    /// Tears both channels down, cancels pending reconnects, marks both
    /// disconnected, and discards the latest snapshot. Safe to call at any
    /// time.
    pub fn disconnect(&self) {
        self.live.teardown();
        self.command.teardown();
        self.hub.latest.write().take();
        tracing::info!("disconnected");
    }

    /// Registers a snapshot listener. It is called once per decoded
    /// snapshot, in receipt order, on the snapshot channel's task.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SnapshotEvent) + Send + Sync + 'static,
    {
        let id = self.hub.snapshots.insert(Arc::new(callback));
        Subscription::new(&self.hub.snapshots, id)
    }

    /// Registers a listener for the snapshot channel's connectivity.
    ///
    /// The callback runs once before this returns, with the status at
    /// registration time, and again on every later transition.
    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.hub.watch_status(ChannelKind::Live, Arc::new(callback))
    }

    /// Same as [`Self::on_status_change`] for the command channel.
    pub fn on_command_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.hub.watch_status(ChannelKind::Command, Arc::new(callback))
    }

    /// Sends `command` if the command channel is open. Otherwise the
    /// command is dropped and a warning logged; [`Self::stats`] counts
    /// both outcomes.
    pub fn send_command(&self, command: &Command) {
        let _ = self.command.send(command);
    }

    /// The most recent snapshot, if any. Kept across link drops.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.hub.latest.read().clone()
    }

    /// Whether the snapshot channel is open.
    #[must_use]
    pub fn is_live_connected(&self) -> bool {
        self.hub.is_connected(ChannelKind::Live)
    }

    /// Whether the command channel is open.
    #[must_use]
    pub fn is_command_connected(&self) -> bool {
        self.hub.is_connected(ChannelKind::Command)
    }

    /// State of the snapshot channel's socket.
    #[must_use]
    pub fn live_state(&self) -> ChannelState {
        self.live.state()
    }

    /// State of the command channel's socket.
    #[must_use]
    pub fn command_state(&self) -> ChannelState {
        self.command.state()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            snapshots_received: self.hub.sequence.load(Ordering::Relaxed),
            decode_failures: self.live.decode_failures(),
            commands_sent: self.command.sent(),
            commands_dropped: self.command.dropped(),
            live_reconnects: self.live.reconnects(),
            command_reconnects: self.command.reconnects(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.live.teardown();
        self.command.teardown();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Weak;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use tokio::sync::mpsc;
    use url::Url;

    use super::*;
    use crate::channel::{Frame, Link};
    use crate::config::BackoffConfig;

    struct Peer {
        to_client: mpsc::UnboundedSender<Result<Frame, LinkError>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    /// Accepts every connection and hands the peer end to the test, routed
    /// by endpoint.
    struct Loopback {
        live: mpsc::UnboundedSender<Peer>,
        command: mpsc::UnboundedSender<Peer>,
        urls: Mutex<Vec<Url>>,
    }

    struct Peers {
        live: mpsc::UnboundedReceiver<Peer>,
        command: mpsc::UnboundedReceiver<Peer>,
    }

    #[async_trait]
    impl Connector for Loopback {
        async fn connect(&self, url: &Url) -> Result<Link, LinkError> {
            self.urls.lock().push(url.clone());
            let (to_client, client_rx) = mpsc::unbounded_channel();
            let (client_tx, from_client) = mpsc::unbounded_channel::<String>();

            let stream = futures_util::stream::unfold(client_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            let sink = futures_util::sink::unfold(client_tx, |tx, text: String| async move {
                tx.send(text)
                    .map_err(|e| LinkError::Transport(e.to_string()))?;
                Ok::<_, LinkError>(tx)
            });

            let peer = Peer {
                to_client,
                from_client,
            };
            let route = if url.path().ends_with("live") {
                &self.live
            } else {
                &self.command
            };
            let _ = route.send(peer);
            Ok(Link::new(Box::pin(sink), stream.boxed()))
        }
    }

    fn manager() -> (ConnectionManager, Arc<Loopback>, Peers) {
        let Ok(config) = LinkConfig::new("ws://sim.test/ws/live", "ws://sim.test/ws/command")
        else {
            panic!("valid config");
        };
        let config = config
            .with_command_token("s3cret")
            .with_backoff(BackoffConfig::new(
                Duration::from_millis(1_000),
                Duration::from_millis(8_000),
            ));
        let (live_tx, live) = mpsc::unbounded_channel();
        let (command_tx, command) = mpsc::unbounded_channel();
        let connector = Arc::new(Loopback {
            live: live_tx,
            command: command_tx,
            urls: Mutex::new(Vec::new()),
        });
        let cloned: Arc<Loopback> = Arc::clone(&connector);
        let shared: Arc<dyn Connector> = cloned;
        let Ok(manager) = ConnectionManager::with_connector(&config, shared) else {
            panic!("manager builds inside a runtime");
        };
        (manager, connector, Peers { live, command })
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn snapshot_frame(tick: u64) -> Result<Frame, LinkError> {
        Ok(Frame::Text(format!(r#"{{"tick":{tick},"macro":{{"gdp":{tick}00.0}}}}"#)))
    }

    fn status_log(manager: &ConnectionManager) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = manager.on_status_change(move |event| sink.lock().push(event.connected));
        (log, sub)
    }

    #[test]
    fn requires_a_runtime() {
        let Ok(config) = LinkConfig::new("ws://sim.test/ws/live", "ws://sim.test/ws/command")
        else {
            panic!("valid config");
        };
        let result = ConnectionManager::new(&config);
        assert!(matches!(result, Err(LinkError::Runtime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn status_listener_sees_current_state_then_transitions() {
        let (manager, _connector, mut peers) = manager();
        let (log, _sub) = status_log(&manager);
        assert_eq!(*log.lock(), vec![false]);

        manager.connect();
        settle().await;
        assert!(manager.is_live_connected());
        assert_eq!(*log.lock(), vec![false, true]);

        let (late, _late_sub) = status_log(&manager);
        assert_eq!(*late.lock(), vec![true]);

        let Some(peer) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        drop(peer);
        settle().await;
        assert_eq!(*log.lock(), vec![false, true, false]);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(*log.lock(), vec![false, true, false, true]);
        assert_eq!(manager.stats().live_reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_fan_out_in_order_with_sequence() {
        let (manager, _connector, mut peers) = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = manager.subscribe(move |event| {
            sink.lock().push((event.sequence, event.snapshot.tick));
        });

        manager.connect();
        settle().await;
        let Some(peer) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        let _ = peer.to_client.send(snapshot_frame(1));
        let _ = peer.to_client.send(Ok(Frame::Text("not json".to_string())));
        let _ = peer.to_client.send(snapshot_frame(2));
        settle().await;

        assert_eq!(*seen.lock(), vec![(1, 1), (2, 2)]);
        let stats = manager.stats();
        assert_eq!(stats.snapshots_received, 2);
        assert_eq!(stats.decode_failures, 1);
        assert!(manager.is_live_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn latest_snapshot_survives_link_drop_but_not_disconnect() {
        let (manager, _connector, mut peers) = manager();
        manager.connect();
        settle().await;
        let Some(peer) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        let _ = peer.to_client.send(snapshot_frame(7));
        settle().await;
        drop(peer);
        settle().await;

        assert!(!manager.is_live_connected());
        let Some(latest) = manager.latest_snapshot() else {
            panic!("snapshot kept after link drop");
        };
        assert_eq!(latest.tick, 7);

        manager.disconnect();
        assert!(manager.latest_snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_listener_is_not_called() {
        let (manager, _connector, mut peers) = manager();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let sub = manager.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect();
        settle().await;
        let Some(peer) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        let _ = peer.to_client.send(snapshot_frame(1));
        settle().await;
        sub.unsubscribe();
        sub.unsubscribe();
        let _ = peer.to_client.send(snapshot_frame(2));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_sent_while_closed_are_dropped_not_replayed() {
        let (manager, connector, mut peers) = manager();
        manager.send_command(&Command::pause());

        manager.connect();
        settle().await;
        assert!(manager.is_command_connected());
        let Some(mut peer) = peers.command.recv().await else {
            panic!("expected command peer");
        };
        manager.send_command(&Command::set_base_rate(0.07));
        settle().await;

        assert_eq!(
            peer.from_client.recv().await.as_deref(),
            Some(r#"{"type":"SET_BASE_RATE","payload":{"rate":0.07}}"#)
        );
        assert!(peer.from_client.try_recv().is_err());

        let stats = manager.stats();
        assert_eq!(stats.commands_sent, 1);
        assert_eq!(stats.commands_dropped, 1);

        let urls = connector.urls.lock().clone();
        assert!(
            urls.iter()
                .any(|u| u.path() == "/ws/command" && u.query() == Some("token=s3cret"))
        );
        assert!(
            urls.iter()
                .any(|u| u.path() == "/ws/live" && u.query().is_none())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_opens_one_link_per_channel() {
        let (manager, connector, mut peers) = manager();
        manager.connect();
        manager.connect();
        settle().await;
        manager.connect();
        settle().await;

        assert_eq!(connector.urls.lock().len(), 2);
        assert!(peers.live.try_recv().is_ok());
        assert!(peers.live.try_recv().is_err());
        assert!(peers.command.try_recv().is_ok());
        assert!(peers.command.try_recv().is_err());
        assert_eq!(manager.live_state(), ChannelState::Open);
        assert_eq!(manager.command_state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_safe_before_connect_and_stops_reconnects() {
        let (manager, connector, mut peers) = manager();
        manager.disconnect();

        let (log, _sub) = status_log(&manager);
        manager.connect();
        settle().await;
        let Some(peer) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        drop(peer);
        settle().await;

        manager.disconnect();
        manager.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.urls.lock().len(), 2);
        assert_eq!(manager.live_state(), ChannelState::Closed);
        assert_eq!(manager.command_state(), ChannelState::Closed);
        assert!(!manager.is_command_connected());
        assert_eq!(*log.lock(), vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_may_disconnect_from_inside_a_callback() {
        let (manager, _connector, mut peers) = manager();
        let manager = Arc::new(manager);
        let weak: Weak<ConnectionManager> = Arc::downgrade(&manager);
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let _sub = manager.subscribe(move |event| {
            sink.lock().push(event.snapshot.tick);
            if let Some(manager) = weak.upgrade() {
                manager.disconnect();
            }
        });

        manager.connect();
        settle().await;
        let Some(mut peer) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        let _ = peer.to_client.send(snapshot_frame(1));
        let _ = peer.to_client.send(snapshot_frame(2));
        settle().await;

        assert_eq!(*ticks.lock(), vec![1]);
        assert_eq!(manager.live_state(), ChannelState::Closed);
        assert!(peer.from_client.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_during_slow_open_callback_ends_disconnected() {
        let (manager, _connector, _peers) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _sub = manager.on_status_change(move |event| {
            if event.connected {
                std::thread::sleep(Duration::from_millis(200));
            }
            sink.lock().push(event.connected);
        });

        manager.connect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.disconnect();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let log = log.lock().clone();
        assert_eq!(log.last().copied(), Some(manager.is_live_connected()));
        assert_eq!(log, vec![false, true, false]);
        assert_eq!(manager.live_state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_manager_closes_links() {
        let (manager, _connector, mut peers) = manager();
        manager.connect();
        settle().await;
        let Some(mut live) = peers.live.recv().await else {
            panic!("expected live peer");
        };
        let Some(mut command) = peers.command.recv().await else {
            panic!("expected command peer");
        };

        drop(manager);
        settle().await;

        assert!(live.from_client.recv().await.is_none());
        assert!(command.from_client.recv().await.is_none());
    }
}
