//! Transport seam between the bot core and a remote chat gateway.
//!
//! The core never sees the wire protocol. A [`Gateway`] opens a connection and
//! hands back a [`GatewayClient`] plus a stream of [`GatewayEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::parser::{InboundMessage, InteractionPayload};
use crate::registry::ParamSpec;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("client not ready: {0}")]
    NotReady(String),
    #[error("timed out waiting for the client to become ready")]
    ReadyTimeout,
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

/// Command as advertised to the remote gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub options: Vec<ParamSpec>,
}

/// A command as the remote gateway knows it, with its remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub id: String,
    #[serde(flatten)]
    pub definition: CommandDefinition,
}

/// Acknowledgment sent back for interaction invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure,
    Denied,
    Unknown,
}

impl Reply {
    pub fn text(self) -> &'static str {
        match self {
            Reply::Success => "mkay.",
            Reply::Failure => "error.",
            Reply::Denied => "nope.",
            Reply::Unknown => "unknown command.",
        }
    }
}

/// Answers one interaction. Replies are always ephemeral.
#[async_trait]
pub trait Responder: Send {
    async fn respond(self: Box<Self>, reply: Reply) -> Result<(), GatewayError>;
}

pub enum GatewayEvent {
    Message(InboundMessage),
    Interaction {
        payload: InteractionPayload,
        responder: Box<dyn Responder>,
    },
}

impl std::fmt::Debug for GatewayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayEvent::Message(m) => f.debug_tuple("Message").field(m).finish(),
            GatewayEvent::Interaction { payload, .. } => {
                f.debug_struct("Interaction").field("payload", payload).finish()
            }
        }
    }
}

/// An established connection.
pub struct Connection {
    pub client: Arc<dyn GatewayClient>,
    pub events: mpsc::Receiver<GatewayEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Factory for connections to the remote gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn connect(&self, token: &str) -> Result<Connection, GatewayError>;
}

/// Operations available on a live connection.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Resolve once the connection can deliver messages.
    async fn await_ready(&self) -> Result<(), GatewayError>;

    async fn send_message(&self, channel: &str, text: &str) -> Result<(), GatewayError>;

    /// Set or clear the bot's activity line.
    async fn set_presence(&self, activity: Option<&str>) -> Result<(), GatewayError>;

    async fn list_commands(&self) -> Result<Vec<RemoteCommand>, GatewayError>;

    async fn delete_command(&self, id: &str) -> Result<(), GatewayError>;

    async fn create_command(
        &self,
        definition: &CommandDefinition,
    ) -> Result<RemoteCommand, GatewayError>;

    async fn shutdown(&self);
}
