//! Connection lifecycle for the remote gateway.
//!
//! `Disconnected --login--> Connecting --ok--> Connected --logout--> Disconnected`
//!
//! The client handle lives only inside [`SessionManager`]. Inbound events are
//! parsed here and queued on the dispatcher; nothing else touches the transport.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SharedConfig;
use crate::dispatcher::DispatcherHandle;
use crate::gateway::{
    CommandDefinition, Gateway, GatewayClient, GatewayError, GatewayEvent,
};
use crate::parser::InvocationParser;
use crate::registry::CommandRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

enum Slot {
    Disconnected,
    Connecting,
    Connected {
        client: Arc<dyn GatewayClient>,
        bridge: JoinHandle<()>,
    },
}

pub struct SessionManager {
    gateway: Box<dyn Gateway>,
    config: SharedConfig,
    registry: Arc<CommandRegistry>,
    dispatcher: DispatcherHandle,
    // serializes login/logout; `slot` is only held briefly so readers never
    // wait on a connect in flight
    lifecycle: Mutex<()>,
    slot: Mutex<Slot>,
}

impl SessionManager {
    pub fn new(
        gateway: Box<dyn Gateway>,
        config: SharedConfig,
        registry: Arc<CommandRegistry>,
        dispatcher: DispatcherHandle,
    ) -> Self {
        Self {
            gateway,
            config,
            registry,
            dispatcher,
            lifecycle: Mutex::new(()),
            slot: Mutex::new(Slot::Disconnected),
        }
    }

    pub async fn state(&self) -> SessionState {
        match &*self.slot.lock().await {
            Slot::Disconnected => SessionState::Disconnected,
            Slot::Connecting => SessionState::Connecting,
            Slot::Connected { .. } => SessionState::Connected,
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state().await == SessionState::Connected
    }

    /// Connect to the gateway. Resolves `true` when connected, including when a
    /// session already existed; `false` on any failure, leaving the session
    /// disconnected.
    pub async fn login(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut slot = self.slot.lock().await;
            if matches!(*slot, Slot::Connected { .. }) {
                warn!("bot already connected");
                return true;
            }
            *slot = Slot::Connecting;
        }

        let token = self.config.read().bot.token.clone();
        let result = self.gateway.connect(&token).await;

        let mut slot = self.slot.lock().await;
        match result {
            Ok(connection) => {
                let bridge = self.spawn_bridge(connection.events);
                *slot = Slot::Connected {
                    client: connection.client,
                    bridge,
                };
                info!("bot connected");
                true
            }
            Err(e) => {
                *slot = Slot::Disconnected;
                error!(error = %e, "error during login");
                false
            }
        }
    }

    /// Feed gateway events through the parser into the dispatcher queue.
    fn spawn_bridge(&self, mut events: mpsc::Receiver<GatewayEvent>) -> JoinHandle<()> {
        let parser = InvocationParser::new(self.config.read().bot.command_prefix);
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    GatewayEvent::Message(message) => match parser.parse_text(&message) {
                        Some(invocation) => dispatcher.submit(invocation, None).await,
                        None => warn!(
                            content = %message.content,
                            author = %message.author,
                            "ignoring message"
                        ),
                    },
                    GatewayEvent::Interaction { payload, responder } => {
                        let invocation = parser.parse_interaction(&payload);
                        dispatcher.submit(invocation, Some(responder)).await;
                    }
                }
            }
        })
    }

    /// Tear down the connection. Work already queued on the dispatcher is not
    /// interrupted.
    pub async fn logout(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, Slot::Disconnected) {
            Slot::Connected { client, bridge } => {
                client.shutdown().await;
                bridge.abort();
                info!("bot disconnected");
            }
            other => {
                *slot = other;
                warn!("bot not connected");
            }
        }
    }

    async fn client(&self) -> Option<Arc<dyn GatewayClient>> {
        match &*self.slot.lock().await {
            Slot::Connected { client, .. } => Some(client.clone()),
            _ => None,
        }
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.config.read().bot.ready_timeout_secs)
    }

    async fn await_ready(&self, client: &dyn GatewayClient) -> Result<(), GatewayError> {
        match tokio::time::timeout(self.ready_timeout(), client.await_ready()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::ReadyTimeout),
        }
    }

    /// Deliver a message to a channel by name. Failures are logged, never
    /// retried and never propagated.
    pub async fn send_message(&self, channel: &str, text: &str) {
        let Some(client) = self.client().await else {
            error!(channel = %channel, "unable to send message: client not initialized");
            return;
        };
        if let Err(e) = self.await_ready(client.as_ref()).await {
            error!(error = %e, "error while waiting for client");
            return;
        }
        if let Err(e) = client.send_message(channel, text).await {
            error!(channel = %channel, error = %e, "unable to send message");
        }
    }

    /// Show `in <text>` as the bot's activity. No-op when disconnected.
    pub async fn update_presence(&self, text: &str) {
        let activity = format!("in {}", text);
        self.set_presence(Some(&activity)).await;
    }

    pub async fn disable_presence(&self) {
        if self.client().await.is_none() {
            error!("unable to disable presence: client not initialized");
            return;
        }
        self.set_presence(None).await;
    }

    async fn set_presence(&self, activity: Option<&str>) {
        let Some(client) = self.client().await else {
            return;
        };
        if let Err(e) = self.await_ready(client.as_ref()).await {
            error!(error = %e, "error while waiting for client");
            return;
        }
        if let Err(e) = client.set_presence(activity).await {
            warn!(error = %e, "unable to update presence");
        }
    }

    /// Replace the remote command list with every described command.
    ///
    /// Deletes all remote commands first, then creates one per described
    /// registry entry. Remote propagation is eventually consistent and may
    /// take up to an hour on the gateway side.
    pub async fn update_commands(&self) -> Result<usize, GatewayError> {
        let client = self
            .client()
            .await
            .ok_or_else(|| GatewayError::NotReady("client not initialized".to_string()))?;
        self.await_ready(client.as_ref()).await?;

        info!("deleting all commands");
        for old in client.list_commands().await? {
            client.delete_command(&old.id).await?;
        }

        let mut created = 0;
        for (name, spec) in self.registry.all_described() {
            let definition = CommandDefinition {
                name: name.to_string(),
                description: spec.description.clone().unwrap_or_default(),
                options: spec.parameters.clone(),
            };
            info!(command = %name, description = %definition.description, "upserting command");
            client.create_command(&definition).await?;
            created += 1;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthorizationGate;
    use crate::config::Config;
    use crate::dispatcher::Dispatcher;
    use crate::events::EventBus;
    use crate::gateway::{Connection, MockGateway, RemoteCommand};
    use crate::registry::ActionContext;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingClient {
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl GatewayClient for CountingClient {
        async fn await_ready(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_message(&self, _: &str, _: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn set_presence(&self, _: Option<&str>) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn list_commands(&self) -> Result<Vec<RemoteCommand>, GatewayError> {
            Ok(Vec::new())
        }

        async fn delete_command(&self, _: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn create_command(
            &self,
            definition: &CommandDefinition,
        ) -> Result<RemoteCommand, GatewayError> {
            Ok(RemoteCommand {
                id: definition.name.clone(),
                definition: definition.clone(),
            })
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NeverReadyClient;

    #[async_trait]
    impl GatewayClient for NeverReadyClient {
        async fn await_ready(&self) -> Result<(), GatewayError> {
            std::future::pending().await
        }

        async fn send_message(&self, _: &str, _: &str) -> Result<(), GatewayError> {
            panic!("must not send before ready");
        }

        async fn set_presence(&self, _: Option<&str>) -> Result<(), GatewayError> {
            panic!("must not set presence before ready");
        }

        async fn list_commands(&self) -> Result<Vec<RemoteCommand>, GatewayError> {
            Ok(Vec::new())
        }

        async fn delete_command(&self, _: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn create_command(
            &self,
            _: &CommandDefinition,
        ) -> Result<RemoteCommand, GatewayError> {
            Err(GatewayError::Closed)
        }

        async fn shutdown(&self) {}
    }

    /// Connects only once `release` is notified.
    struct GatedGateway {
        connects: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Gateway for GatedGateway {
        async fn connect(&self, _token: &str) -> Result<Connection, GatewayError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(connection(Arc::new(CountingClient::default())))
        }
    }

    fn gated() -> (GatedGateway, Arc<AtomicUsize>, Arc<Notify>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let gateway = GatedGateway {
            connects: connects.clone(),
            release: release.clone(),
        };
        (gateway, connects, release)
    }

    fn manager<G: Gateway + 'static>(gateway: G, config: Config) -> SessionManager {
        let config = config.shared();
        let registry = Arc::new(CommandRegistry::new());
        let gate = AuthorizationGate::new(registry.clone(), config.clone());
        let context = ActionContext {
            bus: EventBus::default(),
            config: config.clone(),
        };
        let (handle, _worker) = Dispatcher::new(registry.clone(), gate, context).spawn(8);
        SessionManager::new(Box::new(gateway), config, registry, handle)
    }

    fn connection(client: Arc<dyn GatewayClient>) -> Connection {
        let (_tx, events) = mpsc::channel(1);
        Connection { client, events }
    }

    #[tokio::test]
    async fn test_login_failure_leaves_disconnected() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .times(1)
            .returning(|_| Err(GatewayError::Connect("bad token".to_string())));

        let session = manager(gateway, Config::default());
        assert!(!session.login().await);
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_login_passes_configured_token() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .withf(|token| token.to_string() == "s3cret")
            .times(1)
            .returning(|_| Ok(connection(Arc::new(CountingClient::default()))));

        let mut config = Config::default();
        config.bot.token = "s3cret".to_string();
        let session = manager(gateway, config);
        assert!(session.login().await);
        assert!(session.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_login_twice_connects_once() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .times(1)
            .returning(|_| Ok(connection(Arc::new(CountingClient::default()))));

        let session = manager(gateway, Config::default());
        assert!(session.login().await);
        assert!(session.login().await);
        assert_eq!(session.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_concurrent_logins_connect_once() {
        let (gateway, connects, release) = gated();
        let session = manager(gateway, Config::default());

        let (first, second, _) = tokio::join!(session.login(), session.login(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            release.notify_one();
        });

        assert!(first);
        assert!(second);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_state_reports_connecting_without_waiting() {
        let (gateway, connects, release) = gated();
        let session = Arc::new(manager(gateway, Config::default()));

        let login = tokio::spawn({
            let session = session.clone();
            async move { session.login().await }
        });
        while connects.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let state = tokio::time::timeout(Duration::from_secs(1), session.state())
            .await
            .unwrap();
        assert_eq!(state, SessionState::Connecting);
        tokio::time::timeout(Duration::from_secs(1), session.send_message("general", "hi"))
            .await
            .unwrap();

        release.notify_one();
        assert!(login.await.unwrap());
        assert_eq!(session.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_logout_shuts_client_down_once() {
        let client = Arc::new(CountingClient::default());
        let handed_out = client.clone();
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .times(1)
            .returning(move |_| Ok(connection(handed_out.clone())));

        let session = manager(gateway, Config::default());
        assert!(session.login().await);
        session.logout().await;
        session.logout().await;

        assert_eq!(client.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_noop() {
        let mut gateway = MockGateway::new();
        gateway.expect_connect().never();

        let session = manager(gateway, Config::default());
        session.send_message("general", "hello").await;
        session.update_presence("red").await;
        session.disable_presence().await;
        assert!(session.update_commands().await.is_err());
    }

    #[tokio::test]
    async fn test_ready_timeout_resolves() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .returning(|_| Ok(connection(Arc::new(NeverReadyClient))));

        let mut config = Config::default();
        config.bot.ready_timeout_secs = 0;
        let session = manager(gateway, config);
        assert!(session.login().await);

        session.send_message("general", "hello").await;
        session.update_presence("blue").await;
        assert!(matches!(
            session.update_commands().await,
            Err(GatewayError::ReadyTimeout)
        ));
    }
}
