//! Owned telemetry session.
//!
//! One session holds one broker connection plus the state, routing, alarm and
//! command components built around it. There is no global instance: create a
//! session, share it by `Arc`, and `dispose` it when done.

use crate::alarm::{AlarmEvaluator, AlarmEvent, AlarmStore, MonitoredWidget, StoreError};
use crate::broker::{
    BrokerConnectionConfig, BrokerLink, BrokerUrlError, ConnectionManager, ConnectionStatus,
    StatusSubscription,
};
use crate::command::{CommandPublisher, PublishOutcome};
use crate::config::FrostlineConfig;
use crate::router::{MessageRouter, RouterStats, TopicSubscription};
use crate::state::{TopicEntry, TopicStateStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

pub struct TelemetrySession {
    broker: BrokerConnectionConfig,
    state: Arc<TopicStateStore>,
    evaluator: Arc<AlarmEvaluator>,
    router: Arc<MessageRouter>,
    connection: Arc<ConnectionManager>,
    commands: CommandPublisher,
}

impl TelemetrySession {
    /// Build the session and start connecting to the configured broker
    pub async fn create(
        config: &FrostlineConfig,
        store: Arc<dyn AlarmStore>,
    ) -> Result<Arc<Self>, BrokerUrlError> {
        let session = Self::detached(config, store);
        session.connection.connect(session.broker.clone()).await?;
        Ok(session)
    }

    /// Build the session without opening a broker connection.
    ///
    /// Publishes report `NotConnected` until `connect` is called.
    pub fn detached(config: &FrostlineConfig, store: Arc<dyn AlarmStore>) -> Arc<Self> {
        let state = Arc::new(TopicStateStore::new());
        let evaluator = Arc::new(AlarmEvaluator::new(store, config.alarms.default_severity));
        let router = Arc::new(MessageRouter::new(state.clone(), evaluator.clone()));
        let connection = Arc::new(ConnectionManager::new(router.clone(), state.clone()));
        let weak = Arc::downgrade(&connection);
        router.on_topic_released(move |_| {
            if let Some(connection) = weak.upgrade() {
                connection.sync_topics();
            }
        });
        let link: Arc<dyn BrokerLink> = connection.clone();
        let commands = CommandPublisher::new(state.clone(), link, config.commands.stale_after());

        let session = Arc::new(Self {
            broker: config.broker.clone(),
            state,
            evaluator,
            router,
            connection,
            commands,
        });

        if !config.widgets.is_empty() {
            session.set_monitored_widgets(config.widgets.clone());
        }

        session
    }

    /// (Re)connect using the session's broker configuration
    pub async fn connect(&self) -> Result<(), BrokerUrlError> {
        self.connection.connect(self.broker.clone()).await
    }

    /// Close the broker connection and drop cached topic state
    pub async fn dispose(&self) {
        info!("Disposing telemetry session");
        self.connection.disconnect().await;
    }

    /// Stream of decoded payloads for `topic`.
    ///
    /// The topic joins the broker subscription set. It leaves again once the
    /// last stream for it is dropped, unless a monitored widget still uses it.
    pub fn subscribe(&self, topic: &str) -> TopicSubscription {
        let subscription = self.router.subscribe(topic);
        self.connection.ensure_subscribed(topic);
        subscription
    }

    /// Replace the monitored widget snapshot and bring the broker
    /// subscriptions in line with it
    pub fn set_monitored_widgets(&self, widgets: Vec<MonitoredWidget>) {
        self.evaluator.set_widgets(widgets);
        let dropped = self.connection.sync_topics();
        if !dropped.is_empty() {
            info!(topics = ?dropped, "Unsubscribed topics no longer in use");
        }
    }

    pub fn monitored_widgets(&self) -> Vec<MonitoredWidget> {
        self.evaluator.widgets().as_ref().clone()
    }

    pub fn publish_variable_update(
        &self,
        topic: &str,
        variable: &str,
        value: Value,
    ) -> PublishOutcome {
        self.commands.publish_variable_update(topic, variable, value)
    }

    pub fn publish_path_update(&self, topic: &str, path: &str, value: Value) -> PublishOutcome {
        self.commands.publish_path_update(topic, path, value)
    }

    pub fn publish_merged(&self, topic: &str, fields: Map<String, Value>) -> PublishOutcome {
        self.commands.publish_merged(topic, fields)
    }

    pub fn publish_raw(&self, topic: &str, payload: &Value) -> PublishOutcome {
        self.commands.publish_raw(topic, payload)
    }

    /// Topic that command payloads go to when the caller names none
    pub fn command_topic(&self) -> &str {
        &self.broker.topics.command
    }

    pub fn on_status_change<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.connection.on_status_change(callback)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn active_topics(&self) -> Vec<String> {
        self.connection.active_topics().into_iter().collect()
    }

    pub fn topic_state(&self, topic: &str) -> Option<TopicEntry> {
        self.state.entry(topic)
    }

    pub fn cached_topics(&self) -> Vec<String> {
        self.state.topics()
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Inbound router the broker event loop feeds
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn open_alarms(&self) -> Vec<String> {
        self.evaluator.open_alarms()
    }

    pub fn alarm_events(&self) -> broadcast::Receiver<AlarmEvent> {
        self.evaluator.subscribe()
    }

    pub fn alarm_store(&self) -> &Arc<dyn AlarmStore> {
        self.evaluator.store()
    }

    pub fn acknowledge_alarm(&self, alarm_id: &str, by: &str) -> Result<usize, StoreError> {
        self.evaluator.acknowledge(alarm_id, by)
    }

    pub fn acknowledge_all_alarms(&self, owner_id: &str, by: &str) -> Result<usize, StoreError> {
        self.evaluator.acknowledge_all(owner_id, by)
    }
}
