use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, OPTIONAL_PATH_COMMANDS, RAW_ARG_COMMANDS, REMOVE_COMMAND,
    SOURCE_COMMANDS,
};

/// One parsed line of the interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCommand {
    pub action: String,
    pub raw: String,
    pub args: BTreeMap<String, Value>,
}

impl SessionCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args
            .insert(key.to_string(), Value::String(value.into()));
        self
    }

    /// String argument, `None` when missing or blank.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Quoted paths keep their spaces; unquoted words are re-joined with one space.
fn parse_single_arg(arg: &str) -> String {
    split_args(arg).join(" ")
}

pub fn parse_command(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return SessionCommand::new("text", text).with_arg("text", raw_trimmed);
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return SessionCommand::new("text", text).with_arg("text", raw_trimmed);
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        return SessionCommand::new(action, text).with_arg("value", arg);
    }

    if let Some(action) = find_action(&command, SOURCE_COMMANDS) {
        return SessionCommand::new(action, text)
            .with_arg("slot", command.as_str())
            .with_arg("source", parse_single_arg(arg));
    }

    if let Some(action) = find_action(&command, OPTIONAL_PATH_COMMANDS) {
        return SessionCommand::new(action, text).with_arg("path", parse_single_arg(arg));
    }

    if command == REMOVE_COMMAND.command {
        return SessionCommand::new(REMOVE_COMMAND.action, text)
            .with_arg("slot", arg.to_ascii_lowercase());
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return SessionCommand::new(action, text);
    }

    SessionCommand::new("unknown", text)
        .with_arg("command", command)
        .with_arg("arg", arg)
}
