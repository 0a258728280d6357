use crate::broker::backoff::Backoff;
use crate::broker::config::{BrokerConnectionConfig, BrokerUrlError};
use crate::broker::status::{ConnectionStatus, StatusSignal, StatusSubscription};
use crate::router::MessageRouter;
use crate::state::TopicStateStore;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS,
    SubscribeFilter, SubscribeReasonCode,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound for flushing the DISCONNECT packet on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("broker client rejected request: {0}")]
    Client(#[from] ClientError),
}

/// Outbound side of the broker connection
pub trait BrokerLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Hand a QoS 1, non-retained publish to the client
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError>;
}

struct LiveConnection {
    client: AsyncClient,
    telemetry_topic: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the single broker connection of a session.
///
/// The rumqttc event loop runs on one task per connection and hands every
/// inbound publish to the router inline, so frames are applied in arrival
/// order. Subscriptions are restored on every CONNACK.
pub struct ConnectionManager {
    router: Arc<MessageRouter>,
    state: Arc<TopicStateStore>,
    status: Arc<StatusSignal>,

    /// Topics requested by widgets and consumers (telemetry topic excluded)
    topics: Arc<Mutex<BTreeSet<String>>>,

    live: Mutex<Option<LiveConnection>>,
}

impl ConnectionManager {
    pub fn new(router: Arc<MessageRouter>, state: Arc<TopicStateStore>) -> Self {
        Self {
            router,
            state,
            status: StatusSignal::new(),
            topics: Arc::new(Mutex::new(BTreeSet::new())),
            live: Mutex::new(None),
        }
    }

    fn live(&self) -> MutexGuard<'_, Option<LiveConnection>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect with `config`, tearing down any existing connection first.
    ///
    /// Returns once the client is built; the handshake and every retry happen
    /// on the event loop task. Only an unusable URL is reported here.
    pub async fn connect(&self, config: BrokerConnectionConfig) -> Result<(), BrokerUrlError> {
        let endpoint = config.endpoint()?;

        let existing = self.live().is_some();
        if existing {
            info!("Replacing existing broker connection");
            self.disconnect().await;
        }

        let options = config.mqtt_options(&endpoint);
        info!(
            url = %endpoint.url,
            client_id = %options.client_id(),
            "Connecting to broker"
        );

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.status.set(ConnectionStatus::Connecting);

        let task = EventLoopTask {
            eventloop,
            client: client.clone(),
            router: Arc::clone(&self.router),
            status: Arc::clone(&self.status),
            topics: Arc::clone(&self.topics),
            telemetry_topic: config.topics.telemetry.clone(),
            backoff: Backoff::doubling(config.reconnect_initial(), config.reconnect_max()),
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(task.run());

        *self.live() = Some(LiveConnection {
            client,
            telemetry_topic: config.topics.telemetry,
            shutdown: shutdown_tx,
            task: handle,
        });

        Ok(())
    }

    /// Close the connection and reset the topic state. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let live = self.live().take();

        if let Some(live) = live {
            if let Err(e) = live.client.try_disconnect() {
                debug!(error = %e, "DISCONNECT not queued");
            }
            let _ = live.shutdown.send(true);
            if let Err(e) = live.task.await {
                error!(error = %e, "Broker event loop task failed");
            }
            info!("Disconnected from broker");
        }

        self.state.clear();
        self.status.set(ConnectionStatus::Disconnected);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.current()
    }

    /// Observe status changes; `callback` is invoked at once with the current status
    pub fn on_status_change<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(Arc::new(callback))
    }

    fn requested(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure `topic` is part of the subscription set.
    ///
    /// Subscribes right away when connected; otherwise the next CONNACK does.
    /// Returns false when the topic was already tracked.
    pub fn ensure_subscribed(&self, topic: &str) -> bool {
        if topic.is_empty() {
            return false;
        }

        let mut requested = self.requested();
        if !requested.insert(topic.to_string()) {
            return false;
        }

        debug!(topic = %topic, "Topic added to subscription set");
        self.request_subscribe(topic);
        true
    }

    /// Replace the subscription set with the topics the router currently
    /// wants (monitored widget topics plus topics with a live consumer).
    ///
    /// Topics nobody needs any more are unsubscribed, new ones subscribed.
    /// The telemetry binding is never touched. Returns the dropped topics.
    pub fn sync_topics(&self) -> Vec<String> {
        let mut requested = self.requested();
        let wanted = self.router.wanted_topics();

        let added: Vec<String> = wanted.difference(&requested).cloned().collect();
        let removed: Vec<String> = requested.difference(&wanted).cloned().collect();
        *requested = wanted;

        for topic in &added {
            debug!(topic = %topic, "Topic added to subscription set");
            self.request_subscribe(topic);
        }
        for topic in &removed {
            debug!(topic = %topic, "Topic dropped from subscription set");
            self.request_unsubscribe(topic);
        }

        removed
    }

    fn request_subscribe(&self, topic: &str) {
        if !self.is_connected() {
            return;
        }
        if let Some(live) = self.live().as_ref() {
            if let Err(e) = live.client.try_subscribe(topic, QoS::AtLeastOnce) {
                warn!(topic = %topic, error = %e, "Subscribe request not queued");
            }
        }
    }

    fn request_unsubscribe(&self, topic: &str) {
        if !self.is_connected() {
            return;
        }
        if let Some(live) = self.live().as_ref() {
            if live.telemetry_topic == topic {
                return;
            }
            if let Err(e) = live.client.try_unsubscribe(topic) {
                warn!(topic = %topic, error = %e, "Unsubscribe request not queued");
            }
        }
    }

    /// Topics restored after every reconnect
    pub fn active_topics(&self) -> BTreeSet<String> {
        let requested = self.requested().clone();
        let telemetry = self
            .live()
            .as_ref()
            .map(|live| live.telemetry_topic.clone())
            .unwrap_or_default();
        subscription_filters(&requested, &telemetry)
            .into_iter()
            .map(|filter| filter.path)
            .collect()
    }
}

/// Filters sent on every CONNACK: the requested topics plus the telemetry
/// binding, all at QoS 1, in topic order
fn subscription_filters(
    requested: &BTreeSet<String>,
    telemetry_topic: &str,
) -> Vec<SubscribeFilter> {
    let mut topics = requested.clone();
    if !telemetry_topic.is_empty() {
        topics.insert(telemetry_topic.to_string());
    }
    topics
        .into_iter()
        .map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce))
        .collect()
}

impl BrokerLink for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.status.current() == ConnectionStatus::Connected
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let live = self.live();
        let live = live.as_ref().ok_or(LinkError::NotConnected)?;
        live.client.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

/// Drives one rumqttc event loop until shutdown
struct EventLoopTask {
    eventloop: EventLoop,
    client: AsyncClient,
    router: Arc<MessageRouter>,
    status: Arc<StatusSignal>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    telemetry_topic: String,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl EventLoopTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    self.drain().await;
                    break;
                }

                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.router.handle_frame(&publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let rejected = ack
                            .return_codes
                            .iter()
                            .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                            .count();
                        if rejected > 0 {
                            warn!(pkid = ack.pkid, rejected = rejected, "Broker rejected subscriptions");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if !self.on_error(e).await {
                            break;
                        }
                    }
                },
            }
        }

        debug!("Broker event loop stopped");
    }

    fn on_connected(&mut self) {
        self.backoff.reset();
        self.status.set(ConnectionStatus::Connected);

        let filters = {
            let requested = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            subscription_filters(&requested, &self.telemetry_topic)
        };

        info!(topics = filters.len(), "Connected to broker");
        if filters.is_empty() {
            return;
        }

        if let Err(e) = self.client.try_subscribe_many(filters) {
            error!(error = %e, "Failed to queue subscriptions");
        }
    }

    /// Returns false when shutdown was requested during the retry delay
    async fn on_error(&mut self, e: ConnectionError) -> bool {
        let refused = matches!(
            e,
            ConnectionError::ConnectionRefused(_) | ConnectionError::NotConnAck(_)
        );
        let delay = self.backoff.next_delay();

        if refused {
            self.status.set(ConnectionStatus::Error);
            error!(
                error = %e,
                attempt = self.backoff.attempt(),
                retry_in_ms = delay.as_millis() as u64,
                "Broker refused connection"
            );
        } else {
            self.status.set(ConnectionStatus::Connecting);
            warn!(
                error = %e,
                attempt = self.backoff.attempt(),
                retry_in_ms = delay.as_millis() as u64,
                "Broker connection lost"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }

    /// Poll until the queued DISCONNECT has gone out (bounded)
    async fn drain(&mut self) {
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, flush).await.is_err() {
            debug!("DISCONNECT flush timed out");
        }
    }
}
