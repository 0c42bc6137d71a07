use crate::parameter::Parameter;

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Text,
    StoredProcedure,
}

/// Reader behavior requested for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBehavior {
    /// Close the physical connection when the reader is closed or dropped.
    pub close_connection: bool,
    /// Forward-only, minimally buffered column access.
    pub sequential_access: bool,
}

impl CommandBehavior {
    /// Close-on-dispose unless a transaction is attached, plus the caller's
    /// sequential access choice.
    #[must_use]
    pub fn for_reader(transaction_attached: bool, sequential_access: bool) -> Self {
        Self {
            close_connection: !transaction_attached,
            sequential_access,
        }
    }
}

/// One statement and everything needed to run it.
///
/// A command lives for exactly one call; nothing about it is kept on the
/// context afterwards.
#[derive(Debug, Clone)]
pub struct Command {
    text: String,
    kind: CommandKind,
    parameters: Vec<Parameter>,
    timeout_secs: u32,
    behavior: CommandBehavior,
}

impl Command {
    pub(crate) fn new(text: &str, kind: CommandKind, timeout_secs: u32) -> Self {
        Self {
            text: text.to_string(),
            kind,
            parameters: Vec::new(),
            timeout_secs,
            behavior: CommandBehavior::default(),
        }
    }

    #[must_use]
    pub(crate) fn with_parameters(mut self, parameters: &[Parameter]) -> Self {
        self.parameters = parameters.to_vec();
        self
    }

    #[must_use]
    pub(crate) fn with_behavior(mut self, behavior: CommandBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// SQL text, or the procedure name for [`CommandKind::StoredProcedure`].
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    #[must_use]
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    #[must_use]
    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }
}
