use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::SharedConfig;
use crate::events::EventBus;

/// Everything a command action may touch while it runs.
#[derive(Clone)]
pub struct ActionContext {
    pub bus: EventBus,
    pub config: SharedConfig,
}

/// Command action: `(reply_channel, args) -> success`.
///
/// Actions run on the dispatcher's worker only, one at a time.
pub type CommandAction = fn(&ActionContext, &str, Option<&str>) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

/// One parameter of a remotely visible command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn string(name: &str, description: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            param_type: ParamType::String,
            description: description.to_string(),
            required,
        }
    }
}

#[derive(Clone)]
pub struct CommandSpec {
    pub action: CommandAction,
    /// Commands without a description stay local and are never advertised.
    pub description: Option<String>,
    pub parameters: Vec<ParamSpec>,
    pub admin_only: bool,
}

impl CommandSpec {
    pub fn new(action: CommandAction) -> Self {
        Self {
            action,
            description: None,
            parameters: Vec::new(),
            admin_only: false,
        }
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("admin_only", &self.admin_only)
            .finish()
    }
}

/// Catalogue entry exposed to host help/command-tree UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<ParamSpec>,
    pub admin_only: bool,
}

/// Append-only command table. The first registration of a name wins.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. Returns false, leaving the existing entry in place,
    /// when the name is already taken.
    pub fn register(&mut self, name: &str, spec: CommandSpec) -> bool {
        if self.commands.contains_key(name) {
            warn!(command = %name, "command already registered, keeping the first one");
            return false;
        }
        info!(command = %name, admin_only = spec.admin_only, "registering command");
        self.commands.insert(name.to_string(), spec);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Commands eligible for remote synchronization, in name order.
    pub fn all_described(&self) -> impl Iterator<Item = (&str, &CommandSpec)> {
        self.commands
            .iter()
            .filter(|(_, spec)| spec.description.is_some())
            .map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn catalogue(&self) -> Vec<CommandInfo> {
        self.commands
            .iter()
            .map(|(name, spec)| CommandInfo {
                name: name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
                admin_only: spec.admin_only,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
