//! Authorization for command invocations.
//!
//! Rules, in order:
//! 1. unknown commands are denied
//! 2. privileged users are always allowed, admin-only commands included
//! 3. quiet hours (`dnd` mode) deny everyone else
//! 4. admin-only commands deny everyone else
//!
//! Rule 2 is an operator trust decision: the operator's own account can run
//! anything at any time. It is security relevant and must stay ahead of rule 4.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{SharedConfig, MODE_DND};
use crate::registry::{CommandRegistry, CommandSpec};

/// Snapshot of the state an authorization decision depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationContext {
    pub privileged_users: BTreeSet<String>,
    pub suppressed: bool,
}

impl AuthorizationContext {
    pub fn permits(&self, spec: Option<&CommandSpec>, author: &str) -> bool {
        let Some(spec) = spec else {
            return false;
        };
        if self.privileged_users.contains(author) {
            return true;
        }
        if self.suppressed {
            return false;
        }
        !spec.admin_only
    }
}

pub struct AuthorizationGate {
    registry: Arc<CommandRegistry>,
    config: SharedConfig,
}

impl AuthorizationGate {
    pub fn new(registry: Arc<CommandRegistry>, config: SharedConfig) -> Self {
        Self { registry, config }
    }

    /// Current context, read fresh so mode toggles apply to the next invocation.
    pub fn context(&self) -> AuthorizationContext {
        let config = self.config.read();
        AuthorizationContext {
            privileged_users: config.bot.privileged_users.clone(),
            suppressed: config.host.has_mode(MODE_DND),
        }
    }

    pub fn is_allowed(&self, command_name: &str, author_name: &str) -> bool {
        self.context()
            .permits(self.registry.lookup(command_name), author_name)
    }
}
