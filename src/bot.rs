use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::auth::AuthorizationGate;
use crate::commands::register_builtin;
use crate::config::{SharedConfig, MODE_ALERT, MODE_LOGILED};
use crate::dispatcher::Dispatcher;
use crate::events::{AppEvent, EventBus, LIGHTING_CHANGED};
use crate::gateway::Gateway;
use crate::registry::{ActionContext, CommandInfo, CommandRegistry};
use crate::session::SessionManager;

const GREETING: &str = "Hello there";
const FAREWELL: &str = "It's over";

/// Host-side owner of the session, the dispatcher and the command registry.
pub struct Bot {
    config: SharedConfig,
    config_path: Option<PathBuf>,
    bus: EventBus,
    registry: Arc<CommandRegistry>,
    session: Arc<SessionManager>,
}

impl Bot {
    /// Build the bot and start its dispatcher worker. Must be called inside a
    /// tokio runtime.
    pub fn new(config: SharedConfig, gateway: Box<dyn Gateway>, bus: EventBus) -> Self {
        let mut registry = CommandRegistry::new();
        register_builtin(&mut registry);
        let registry = Arc::new(registry);

        let gate = AuthorizationGate::new(registry.clone(), config.clone());
        let context = ActionContext {
            bus: bus.clone(),
            config: config.clone(),
        };
        let (dispatcher, _worker) = Dispatcher::new(registry.clone(), gate, context).spawn(100);

        let session = Arc::new(SessionManager::new(
            gateway,
            config.clone(),
            registry.clone(),
            dispatcher,
        ));

        Self {
            config,
            config_path: None,
            bus,
            registry,
            session,
        }
    }

    /// Persist `token` / `channel` changes to this file.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn catalogue(&self) -> Vec<CommandInfo> {
        self.registry.catalogue()
    }

    fn notification_channel(&self) -> String {
        self.config.read().bot.notification_channel.clone()
    }

    /// Log in and greet the notification channel.
    pub async fn connect(&self) -> bool {
        if self.session.is_logged_in().await {
            info!("bot already started");
            return true;
        }
        if !self.session.login().await {
            error!("unable to start bot");
            return false;
        }
        self.on_connected().await;
        true
    }

    async fn on_connected(&self) {
        info!("bot started");
        self.session
            .send_message(&self.notification_channel(), GREETING)
            .await;

        let colour = {
            let config = self.config.read();
            let host = &config.host;
            (host.has_mode(MODE_LOGILED) && !host.has_mode(MODE_ALERT))
                .then(|| host.lighting_color.clone())
        };
        if let Some(colour) = colour {
            self.session.update_presence(&colour).await;
        }
    }

    /// Say goodbye, then log out.
    pub async fn disconnect(&self) {
        self.session
            .send_message(&self.notification_channel(), FAREWELL)
            .await;
        self.session.logout().await;
    }

    /// Console commands for the bot's host mode. Returns the line to echo.
    pub async fn handle_mode_command(&self, command: &str, args: &[&str]) -> String {
        let joined = args.join(" ");
        match command {
            "connect" => {
                if self.connect().await {
                    "Bot started".to_string()
                } else {
                    "Unable to start bot".to_string()
                }
            }
            "disconnect" => {
                self.disconnect().await;
                "Bot disconnected".to_string()
            }
            "update" => {
                let session = self.session.clone();
                tokio::spawn(async move {
                    match session.update_commands().await {
                        Ok(count) => info!(count, "remote command list replaced"),
                        Err(e) => error!(error = %e, "unable to update remote commands"),
                    }
                });
                "Updating slash commands".to_string()
            }
            "token" => {
                self.config.write().bot.token = joined;
                self.persist();
                "Token updated".to_string()
            }
            "channel" => {
                self.config.write().bot.notification_channel = joined;
                self.persist();
                "Bot notification channel updated".to_string()
            }
            _ => {
                warn!(command = %command, "unknown mode command");
                format!("Unknown command: {}", command)
            }
        }
    }

    fn persist(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        let snapshot = self.config.read().clone();
        if let Err(e) = snapshot.save(path) {
            error!(path = %path.display(), error = %e, "failed to persist configuration");
        }
    }

    /// React to host events. Lighting changes become the bot's presence.
    pub async fn on_event(&self, event: &AppEvent) {
        if event.name != LIGHTING_CHANGED {
            return;
        }
        match event.payload.as_deref() {
            Some(colour) => {
                self.config.write().host.lighting_color = colour.to_string();
                self.session.update_presence(colour).await;
            }
            None => self.session.disable_presence().await,
        }
    }

    /// Main event loop. Runs until `shutdown` resolves, then disconnects.
    pub async fn run<F: Future<Output = ()>>(&self, shutdown: F) {
        let mut events = self.bus.subscribe();
        tokio::pin!(shutdown);
        info!("bot ready, entering main loop");

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => self.on_event(&event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event bus lagged, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        if self.session.is_logged_in().await {
            self.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::{GatewayError, MockGateway};

    fn offline_bot(config: Config) -> Bot {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .returning(|_| Err(GatewayError::Connect("offline".to_string())));
        Bot::new(config.shared(), Box::new(gateway), EventBus::default())
    }

    #[tokio::test]
    async fn test_catalogue_exposes_builtins() {
        let bot = offline_bot(Config::default());
        let names: Vec<String> = bot.catalogue().into_iter().map(|c| c.name).collect();
        assert!(names.contains(&"logiled".to_string()));
        assert!(names.contains(&"shutdown".to_string()));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_false() {
        let bot = offline_bot(Config::default());
        assert!(!bot.connect().await);
        assert_eq!(
            bot.handle_mode_command("connect", &[]).await,
            "Unable to start bot"
        );
    }

    #[tokio::test]
    async fn test_token_and_channel_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatebot.toml");
        let bot = offline_bot(Config::default()).with_config_path(path.clone());

        bot.handle_mode_command("token", &["abc", "def"]).await;
        bot.handle_mode_command("channel", &["bots"]).await;

        let saved = Config::from_file(&path).unwrap();
        assert_eq!(saved.bot.token, "abc def");
        assert_eq!(saved.bot.notification_channel, "bots");
        assert_eq!(bot.notification_channel(), "bots");
    }

    #[tokio::test]
    async fn test_unknown_mode_command() {
        let bot = offline_bot(Config::default());
        assert_eq!(
            bot.handle_mode_command("dance", &[]).await,
            "Unknown command: dance"
        );
    }

    #[tokio::test]
    async fn test_lighting_event_remembers_colour() {
        let bot = offline_bot(Config::default());
        bot.on_event(&AppEvent::with_payload(LIGHTING_CHANGED, Some("green")))
            .await;
        assert_eq!(bot.config.read().host.lighting_color, "green");

        bot.on_event(&AppEvent::with_payload("other", Some("blue"))).await;
        assert_eq!(bot.config.read().host.lighting_color, "green");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let bot = offline_bot(Config::default());
        bot.run(async {}).await;
    }
}
