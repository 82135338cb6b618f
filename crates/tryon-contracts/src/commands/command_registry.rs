#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one raw value (not shell-split).
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "key",
        action: "save_key",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
    },
];

/// Commands that load an image source into an input slot.
pub(crate) const SOURCE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "person",
        action: "set_person",
    },
    CommandSpec {
        command: "top",
        action: "set_top",
    },
    CommandSpec {
        command: "trousers",
        action: "set_trousers",
    },
];

pub(crate) const OPTIONAL_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "save",
    action: "save_output",
}];

pub(crate) const REMOVE_COMMAND: CommandSpec = CommandSpec {
    command: "remove",
    action: "remove_input",
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "tryon",
        action: "generate",
    },
    CommandSpec {
        command: "forget_key",
        action: "clear_key",
    },
    CommandSpec {
        command: "data_uri",
        action: "print_data_uri",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/key <api-key>",
    "/forget_key",
    "/person <path|url>",
    "/top <path|url>",
    "/trousers <path|url>",
    "/remove <person|top|trousers>",
    "/generate",
    "/save [path]",
    "/data_uri",
    "/status",
    "/model <name>",
    "/help",
    "/quit",
];
