use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::gateway::{
    CommandDefinition, Connection, Gateway, GatewayClient, GatewayError, GatewayEvent,
    RemoteCommand, Reply, Responder,
};
use crate::parser::{InboundMessage, InteractionPayload};

/// Outgoing chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
    pub timestamp: i64,
}

/// Outgoing interaction acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionReply {
    pub content: String,
    pub ephemeral: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub activity: Option<String>,
}

/// Topic layout under a common prefix
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

/// What an inbound publish is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Message,
    Interaction,
    Command(String),
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn messages(&self) -> String {
        format!("{}/in/messages", self.prefix)
    }

    pub fn interactions(&self) -> String {
        format!("{}/in/interactions", self.prefix)
    }

    pub fn commands_filter(&self) -> String {
        format!("{}/commands/+", self.prefix)
    }

    /// Filters the bot listens on; re-issued after every broker reconnect.
    pub fn subscriptions(&self) -> [String; 3] {
        [self.messages(), self.interactions(), self.commands_filter()]
    }

    pub fn command(&self, id: &str) -> String {
        format!("{}/commands/{}", self.prefix, id)
    }

    pub fn channel(&self, name: &str) -> String {
        format!("{}/out/channels/{}", self.prefix, name)
    }

    pub fn interaction_reply(&self, id: &str) -> String {
        format!("{}/out/interactions/{}", self.prefix, id)
    }

    pub fn presence(&self) -> String {
        format!("{}/out/presence", self.prefix)
    }

    pub fn route(&self, topic: &str) -> Option<Route> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        match rest {
            "in/messages" => Some(Route::Message),
            "in/interactions" => Some(Route::Interaction),
            _ => rest
                .strip_prefix("commands/")
                .filter(|id| !id.is_empty() && !id.contains('/'))
                .map(|id| Route::Command(id.to_string())),
        }
    }
}

/// Parse an incoming chat message
pub fn parse_message(payload: &[u8]) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Parse an incoming interaction
pub fn parse_interaction(payload: &[u8]) -> Result<InteractionPayload, serde_json::Error> {
    serde_json::from_slice(payload)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Gateway reached through an MQTT broker
pub struct MqttGateway {
    config: GatewayConfig,
}

impl MqttGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    fn options(&self, token: &str) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.broker, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        if !token.is_empty() {
            options.set_credentials(&self.config.client_id, token);
        }
        options
    }
}

#[async_trait]
impl Gateway for MqttGateway {
    async fn connect(&self, token: &str) -> Result<Connection, GatewayError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(token), 100);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(GatewayError::Connect(e.to_string())),
                }
            }
        };
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::Connect(format!(
                    "no answer from {}:{} within {:?}",
                    self.config.broker, self.config.port, timeout
                )))
            }
        }
        info!(broker = %self.config.broker, port = self.config.port, "connected to MQTT broker");

        let topics = Topics::new(&self.config.topic_prefix);
        for filter in topics.subscriptions() {
            client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| GatewayError::Connect(e.to_string()))?;
        }

        let (ready_tx, ready_rx) = watch::channel(true);
        let (events_tx, events_rx) = mpsc::channel(100);
        let mirror = Arc::new(Mutex::new(BTreeMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let pump = EventPump {
            client: client.clone(),
            topics: topics.clone(),
            events: events_tx,
            mirror: mirror.clone(),
            ready: ready_tx,
            closing: closing.clone(),
        };
        let task = tokio::spawn(pump.run(eventloop));

        let client = MqttGatewayClient {
            client,
            topics,
            ready: ready_rx,
            mirror,
            closing,
            task: Mutex::new(Some(task)),
        };

        Ok(Connection {
            client: Arc::new(client),
            events: events_rx,
        })
    }
}

/// Drains the rumqttc event loop and turns publishes into gateway events.
struct EventPump {
    client: AsyncClient,
    topics: Topics,
    events: mpsc::Sender<GatewayEvent>,
    mirror: Arc<Mutex<BTreeMap<String, RemoteCommand>>>,
    ready: watch::Sender<bool>,
    closing: Arc<AtomicBool>,
}

impl EventPump {
    async fn run(self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.on_publish(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("reconnected to MQTT broker");
                    self.resubscribe();
                    let _ = self.ready.send(true);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("disconnect sent, stopping event loop");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    let _ = self.ready.send(false);
                    error!(error = %e, "MQTT error, reconnecting...");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
        let _ = self.ready.send(false);
    }

    /// A clean session loses its subscriptions on reconnect. Queued without
    /// waiting so the loop keeps polling; returns how many were queued.
    fn resubscribe(&self) -> usize {
        let mut queued = 0;
        for filter in self.topics.subscriptions() {
            match self.client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                Ok(()) => queued += 1,
                Err(e) => error!(filter = %filter, error = %e, "failed to resubscribe"),
            }
        }
        queued
    }

    /// Never waits on the consumer: the event loop must keep polling so
    /// that replies queued by the dispatcher can drain.
    fn on_publish(&self, topic: &str, payload: &[u8]) {
        let event = match self.topics.route(topic) {
            Some(Route::Message) => match parse_message(payload) {
                Ok(message) => GatewayEvent::Message(message),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "failed to parse message");
                    return;
                }
            },
            Some(Route::Interaction) => match parse_interaction(payload) {
                Ok(interaction) => {
                    let responder = MqttResponder {
                        client: self.client.clone(),
                        topic: self.topics.interaction_reply(&interaction.id),
                    };
                    GatewayEvent::Interaction {
                        payload: interaction,
                        responder: Box::new(responder),
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "failed to parse interaction");
                    return;
                }
            },
            Some(Route::Command(id)) => {
                self.on_command(id, payload);
                return;
            }
            None => {
                debug!(topic = %topic, "ignoring publish on unknown topic");
                return;
            }
        };

        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(topic = %topic, "gateway event queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => debug!("no listener for gateway events"),
        }
    }

    fn on_command(&self, id: String, payload: &[u8]) {
        let mut mirror = self.mirror.lock();
        if payload.is_empty() {
            mirror.remove(&id);
            return;
        }
        match serde_json::from_slice::<RemoteCommand>(payload) {
            Ok(command) => {
                mirror.insert(id, command);
            }
            Err(e) => warn!(id = %id, error = %e, "failed to parse remote command"),
        }
    }
}

struct MqttResponder {
    client: AsyncClient,
    topic: String,
}

#[async_trait]
impl Responder for MqttResponder {
    async fn respond(self: Box<Self>, reply: Reply) -> Result<(), GatewayError> {
        let body = InteractionReply {
            content: reply.text().to_string(),
            ephemeral: true,
            timestamp: now(),
        };
        let payload = serde_json::to_vec(&body)?;
        let MqttResponder { client, topic } = *self;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| GatewayError::Publish(e.to_string()))
    }
}

pub struct MqttGatewayClient {
    client: AsyncClient,
    topics: Topics,
    ready: watch::Receiver<bool>,
    mirror: Arc<Mutex<BTreeMap<String, RemoteCommand>>>,
    closing: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttGatewayClient {
    async fn publish_json<T: Serialize>(
        &self,
        topic: String,
        retain: bool,
        body: &T,
    ) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(body)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| GatewayError::Publish(e.to_string()))
    }
}

#[async_trait]
impl GatewayClient for MqttGatewayClient {
    async fn await_ready(&self) -> Result<(), GatewayError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }
        let mut ready = self.ready.clone();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| GatewayError::Closed)
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<(), GatewayError> {
        if channel.trim().is_empty() {
            return Err(GatewayError::ChannelNotFound(channel.to_string()));
        }
        let body = OutboundMessage {
            content: text.to_string(),
            timestamp: now(),
        };
        self.publish_json(self.topics.channel(channel), false, &body)
            .await
    }

    async fn set_presence(&self, activity: Option<&str>) -> Result<(), GatewayError> {
        let body = Presence {
            activity: activity.map(str::to_string),
        };
        self.publish_json(self.topics.presence(), true, &body).await
    }

    async fn list_commands(&self) -> Result<Vec<RemoteCommand>, GatewayError> {
        Ok(self.mirror.lock().values().cloned().collect())
    }

    async fn delete_command(&self, id: &str) -> Result<(), GatewayError> {
        self.client
            .publish(self.topics.command(id), QoS::AtLeastOnce, true, Vec::<u8>::new())
            .await
            .map_err(|e| GatewayError::Publish(e.to_string()))?;
        self.mirror.lock().remove(id);
        Ok(())
    }

    async fn create_command(
        &self,
        definition: &CommandDefinition,
    ) -> Result<RemoteCommand, GatewayError> {
        // keyed by name so a re-create overwrites the retained entry
        let command = RemoteCommand {
            id: definition.name.clone(),
            definition: definition.clone(),
        };
        self.publish_json(self.topics.command(&command.id), true, &command)
            .await?;
        self.mirror.lock().insert(command.id.clone(), command.clone());
        Ok(command)
    }

    async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "failed to queue MQTT disconnect");
        }
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                warn!("event loop did not stop in time, aborting");
                task.abort();
            }
        }
    }
}
