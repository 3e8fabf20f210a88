use serde::{Deserialize, Serialize};

/// Where an invocation came from. Decides whether the dispatcher answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    TextPrefixed,
    Interaction,
}

/// A normalized request to run one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub command_name: String,
    pub arg_string: Option<String>,
    pub author_name: String,
    pub reply_channel: String,
    pub source_kind: SourceKind,
}

/// Plain chat message as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub content: String,
    pub author: String,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionOption {
    pub name: String,
    pub value: String,
}

/// Structured slash-style interaction as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionPayload {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub options: Vec<InteractionOption>,
    pub user: String,
    pub channel: String,
}

/// Turns both wire shapes into [`Invocation`]s.
#[derive(Debug, Clone, Copy)]
pub struct InvocationParser {
    prefix: char,
}

impl InvocationParser {
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    /// Parse a prefixed text message. Returns `None` for anything that is not
    /// a command: no prefix, or nothing after it.
    pub fn parse_text(&self, message: &InboundMessage) -> Option<Invocation> {
        let stripped = message.content.strip_prefix(self.prefix)?.trim();
        let command_name = stripped.split_whitespace().next()?;

        // the command token leads the text, so removing its first occurrence
        // leaves exactly the arguments
        let rest = stripped.replacen(command_name, "", 1);
        let rest = rest.trim();
        let arg_string = (!rest.is_empty()).then(|| rest.to_string());

        Some(Invocation {
            command_name: command_name.to_string(),
            arg_string,
            author_name: message.author.clone(),
            reply_channel: message.channel.clone(),
            source_kind: SourceKind::TextPrefixed,
        })
    }

    /// Normalize an interaction; option values are joined with single spaces
    /// in the order the gateway sent them.
    pub fn parse_interaction(&self, payload: &InteractionPayload) -> Invocation {
        let joined = payload
            .options
            .iter()
            .map(|opt| opt.value.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Invocation {
            command_name: payload.command.clone(),
            arg_string: (!joined.is_empty()).then_some(joined),
            author_name: payload.user.clone(),
            reply_channel: payload.channel.clone(),
            source_kind: SourceKind::Interaction,
        }
    }
}

impl Default for InvocationParser {
    fn default() -> Self {
        Self::new('!')
    }
}
