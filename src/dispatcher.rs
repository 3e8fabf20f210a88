use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::AuthorizationGate;
use crate::gateway::{Reply, Responder};
use crate::parser::{Invocation, SourceKind};
use crate::registry::{ActionContext, CommandRegistry};

/// Unit of work for the dispatcher worker.
pub struct Job {
    pub invocation: Invocation,
    pub responder: Option<Box<dyn Responder>>,
}

/// Resolves, authorizes and runs invocations.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    gate: AuthorizationGate,
    context: ActionContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>, gate: AuthorizationGate, context: ActionContext) -> Self {
        Self {
            registry,
            gate,
            context,
        }
    }

    /// Run one invocation to completion and return the acknowledgment to send,
    /// if any. Text invocations never get one.
    pub fn handle(&self, invocation: &Invocation) -> Option<Reply> {
        let interaction = invocation.source_kind == SourceKind::Interaction;
        let name = invocation.command_name.as_str();
        let author = invocation.author_name.as_str();

        let Some(command) = self.registry.lookup(name) else {
            warn!(command = %name, author = %author, "ignoring unknown command");
            return interaction.then_some(Reply::Unknown);
        };

        if !self.gate.is_allowed(name, author) {
            warn!(command = %name, author = %author, "denying command");
            return interaction.then_some(Reply::Denied);
        }

        let success = (command.action)(
            &self.context,
            &invocation.reply_channel,
            invocation.arg_string.as_deref(),
        );

        if success {
            info!(command = %name, author = %author, "command executed successfully");
        } else {
            error!(command = %name, author = %author, "unable to execute command");
        }

        interaction.then_some(if success { Reply::Success } else { Reply::Failure })
    }

    /// Start the single worker that drains the queue. Every action runs on it,
    /// so at most one action executes at any time.
    pub fn spawn(self, capacity: usize) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let reply = self.handle(&job.invocation);
                if let (Some(reply), Some(responder)) = (reply, job.responder) {
                    if let Err(e) = responder.respond(reply).await {
                        error!(
                            command = %job.invocation.command_name,
                            error = %e,
                            "failed to send interaction reply"
                        );
                    }
                }
            }
            info!("dispatcher queue closed, worker exiting");
        });

        (DispatcherHandle { tx }, worker)
    }
}

/// Cloneable producer side of the dispatcher queue.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Job>,
}

impl DispatcherHandle {
    pub async fn submit(&self, invocation: Invocation, responder: Option<Box<dyn Responder>>) {
        let command = invocation.command_name.clone();
        let job = Job {
            invocation,
            responder,
        };
        if self.tx.send(job).await.is_err() {
            error!(command = %command, "dispatcher worker is gone, dropping invocation");
        }
    }
}
