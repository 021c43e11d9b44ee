//! Script commands.
//!
//! A `command /name <arguments>:` section declares a command players and the
//! console can run. The argument part of its header becomes a [`Pattern`]
//! with one placeholder per `<type>`, and whatever the sender types after the
//! name is matched against it in [`ParseContext::Command`], where quotes and
//! brackets mean nothing.
//!
//! ```text
//! command /give <player> [<amount: number = 1>]:
//!     usage: /give <player> [amount]
//!     executable by: console
//!     trigger:
//!         send "here you go" to arg-1
//! ```

use std::fmt;
use std::sync::{Arc, LazyLock};

use bitflags::bitflags;
use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::{Node, SectionNode};
use crate::event::Event;
use crate::expr::{ExprRef, Literal, is_valid_variable_name};
use crate::kleenean::Kleenean;
use crate::parser::{CurrentEvent, ParseContext, ParseFlags, ParserState, ScriptEnv, SkriptParser};
use crate::pattern::Pattern;
use crate::trigger::{Trigger, WalkOutcome, build_trigger};
use crate::value::Value;

/// Event kind command triggers are built for and fired with.
pub const COMMAND_EVENT: &str = "command";

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^command\s+/?(\S+)(?:\s+(.+?))?\s*$").expect("command header regex is valid")
});

static ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\s*(?:([^<>:]+?)\s*:\s*)?([^<>=]+?)\s*(?:=\s*([^<>]+?))?\s*>")
        .expect("command argument regex is valid")
});

/// Characters with a meaning in patterns but not in command headers.
const ESCAPED: &[char] = &['(', '|', ')', '<', '>', '%', '\\'];

bitflags! {
    /// Who may run a command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExecutableBy: u8 {
        const CONSOLE = 1;
        const PLAYERS = 1 << 1;
    }
}

/// One `<type>` of a command header.
#[derive(Debug)]
pub struct CommandArgument {
    /// `<name: type>` also stores the value in the local variable `{_name}`.
    pub name: Option<String>,
    pub type_name: String,
    /// Inside `[...]` or given a default.
    pub optional: bool,
    /// `<type = value>`, or `<type = %expression%>` evaluated per run.
    pub default: Option<ExprRef>,
}

impl CommandArgument {
    /// Event value key of the `index`-th argument, counted from 1.
    pub fn key(index: usize) -> String {
        format!("arg-{index}")
    }
}

/// What running a command did.
#[derive(Debug)]
pub enum CommandOutcome {
    Executed(WalkOutcome),
    /// The arguments don't fit. `error` is the parser's complaint, if it had
    /// one.
    InvalidArguments { error: Option<String>, usage: String },
    /// The sender may not run the command.
    Refused(&'static str),
}

impl CommandOutcome {
    /// Lines to send back to whoever ran the command.
    pub fn reply(&self) -> Vec<String> {
        match self {
            Self::Executed(WalkOutcome::Failed(_)) => {
                vec!["An internal error occurred while attempting to perform this command".to_string()]
            }
            Self::Executed(_) => Vec::new(),
            Self::InvalidArguments { error, usage } => error
                .iter()
                .cloned()
                .chain([format!("Correct usage: {usage}")])
                .collect(),
            Self::Refused(message) => vec![(*message).to_string()],
        }
    }
}

/// A command declared by a script.
pub struct ScriptCommand {
    /// Lowercase, without the `/`.
    pub name: String,
    pub aliases: Vec<String>,
    pub arguments: Vec<CommandArgument>,
    pub usage: String,
    pub description: String,
    pub executable_by: ExecutableBy,
    /// Script that declared the command.
    pub script: String,
    pattern: Pattern,
    trigger: Arc<Trigger>,
}

/// An argument as written in the header, before its default is parsed.
struct Declared {
    name: Option<String>,
    type_name: String,
    optional: bool,
    default: Option<String>,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `[` minus `]`.
fn bracket_balance(text: &str) -> i32 {
    text.chars()
        .map(|c| match c {
            '[' => 1,
            ']' => -1,
            _ => 0,
        })
        .sum()
}

fn valid_argument_name(name: &str, state: &ParserState) -> bool {
    let _log = state.logger().start_blocking();
    !name.contains('%') && is_valid_variable_name(name, false, state)
}

/// Turn the argument part of a header into pattern source.
fn argument_pattern(state: &ParserState, text: &str) -> Option<(String, Vec<Declared>)> {
    let logger = state.logger();
    let types = state.types();
    let mut source = String::new();
    let mut declared = Vec::new();
    let mut brackets = 0;
    let mut opened = 0;
    let mut last_end = 0;

    for caps in ARGUMENT.captures_iter(text) {
        let whole = caps.get(0)?;
        let between = text.get(last_end..whole.start()).unwrap_or_default();
        last_end = whole.end();
        source.push_str(&escape(between));
        brackets += bracket_balance(between);
        if brackets < 0 {
            logger.error("Invalid placement of [optional brackets]");
            return None;
        }

        let type_text = caps.get(2).map_or("", |m| m.as_str());
        let Some((info, plural)) = types.lookup(type_text) else {
            logger.error(format!("Unknown type '{type_text}'"));
            return None;
        };
        if plural {
            logger.error(format!(
                "A command argument takes a single value, use <{}> instead of <{type_text}>",
                info.singular()
            ));
            return None;
        }
        if !info.has_parser() {
            logger.error(format!("Can't use {} as argument of a command", info.plural()));
            return None;
        }
        let name = caps.get(1).map(|m| m.as_str().to_string());
        if name.as_deref().is_some_and(|name| !valid_argument_name(name, state)) {
            logger.error("An argument's name must be a valid variable name, and cannot be a list variable.");
            return None;
        }
        let default = caps.get(3).map(|m| m.as_str().to_string());

        let optional = brackets > 0 || opened > 0 || default.is_some();
        if optional && brackets == 0 && opened == 0 {
            source.push('[');
            opened += 1;
        }
        source.push('%');
        if optional {
            source.push('-');
        }
        source.push_str(&info.singular());
        source.push('%');
        declared.push(Declared {
            name,
            type_name: info.code_name().to_string(),
            optional,
            default,
        });
    }

    let rest = text.get(last_end..).unwrap_or_default();
    source.push_str(&escape(rest));
    brackets += bracket_balance(rest);
    if brackets != 0 {
        logger.error("Invalid amount of [optional brackets]");
        return None;
    }
    source.push_str(&"]".repeat(opened));
    Some((source, declared))
}

/// Parse `<type = text>`. A `%expression%` default is evaluated when the
/// command runs; unquoted text is taken as is for text arguments.
fn parse_default(state: &ParserState, text: &str, type_name: &str) -> Option<ExprRef> {
    let logger = state.logger();
    let log = logger.start();
    let parsed = match text.strip_prefix('%').and_then(|t| t.strip_suffix('%')) {
        Some(expr) => SkriptParser::new(state, expr, ParseFlags::PARSE_EXPRESSIONS, ParseContext::Default)
            .parse_expression(&[type_name]),
        None if type_name == "string" && !text.starts_with('"') => {
            Some(Arc::new(Literal::new(Value::text(text))) as ExprRef)
        }
        None => SkriptParser::new(state, text, ParseFlags::PARSE_LITERALS, ParseContext::Default)
            .parse_expression(&[type_name]),
    };
    if parsed.is_some() {
        log.print_log();
    } else {
        log.print_error(Some(&format!("Can't understand this expression: '{text}'")));
    }
    parsed
}

fn parse_executable_by(text: &str, state: &ParserState) -> ExecutableBy {
    let mut allowed = ExecutableBy::empty();
    for part in text.split(',').flat_map(|p| p.split(" and ")) {
        match part.trim().to_lowercase().as_str() {
            "console" | "the console" => allowed |= ExecutableBy::CONSOLE,
            "players" | "player" => allowed |= ExecutableBy::PLAYERS,
            "" => {}
            _ => state.logger().warning(
                "'executable by' should be either be 'players', 'console', or 'players and console'",
            ),
        }
    }
    if allowed.is_empty() {
        ExecutableBy::all()
    } else {
        allowed
    }
}

impl ScriptCommand {
    /// Build a command from its section. Problems are logged on `state`.
    pub fn load(state: &ParserState, header: &str, section: &SectionNode) -> Option<Self> {
        let logger = state.logger();
        let Some(caps) = HEADER.captures(header) else {
            logger.error(format!("Invalid command structure pattern: '{header}'"));
            return None;
        };
        let name = caps.get(1)?.as_str().to_lowercase();
        let raw_arguments = caps.get(2).map_or("", |m| m.as_str());
        let (source, declared) = argument_pattern(state, raw_arguments)?;
        let pattern = match Pattern::compile(&source, state.types()) {
            Ok(pattern) => pattern,
            Err(e) => {
                logger.error(format!("Invalid command arguments: {e}"));
                return None;
            }
        };

        let mut usage = None;
        let mut description = String::new();
        let mut aliases = Vec::new();
        let mut executable_by = ExecutableBy::all();
        let mut trigger_section = None;
        for node in section.children() {
            state.set_line(node.line());
            match node {
                Node::Entry(entry) => {
                    let Some((key, value)) = entry.key_value() else {
                        logger.error(format!("invalid line in command /{name}"));
                        continue;
                    };
                    match key.to_lowercase().as_str() {
                        "usage" => usage = Some(value.to_string()),
                        "description" => description = value.to_string(),
                        "aliases" => {
                            aliases = value
                                .split(',')
                                .map(|alias| alias.trim().trim_start_matches('/').to_lowercase())
                                .filter(|alias| !alias.is_empty() && *alias != name)
                                .collect();
                        }
                        "executable by" => executable_by = parse_executable_by(value, state),
                        other => logger.error(format!(
                            "Unexpected entry '{other}'. Check whether it's spelled correctly or remove it."
                        )),
                    }
                }
                Node::Section(inner) if inner.key.eq_ignore_ascii_case("trigger") => {
                    trigger_section = Some(inner);
                }
                Node::Section(inner) => logger.error(format!(
                    "Unexpected section '{}'. Check whether it's spelled correctly or remove it.",
                    inner.key
                )),
                Node::Void { .. } => {}
            }
        }
        state.set_line(section.line);
        let Some(trigger_section) = trigger_section else {
            logger.error(format!("Required entry 'trigger' is missing in 'command /{name}'"));
            return None;
        };

        let mut values = state.registry().common_values(&[COMMAND_EVENT.to_string()]);
        values.extend(
            declared
                .iter()
                .enumerate()
                .map(|(i, d)| (CommandArgument::key(i + 1), d.type_name.clone())),
        );
        state.set_current_event(Some(CurrentEvent {
            name: COMMAND_EVENT.to_string(),
            kinds: vec![COMMAND_EVENT.to_string()],
            values,
        }));
        state.set_has_delay_before(Kleenean::False);
        let arguments: Option<Vec<CommandArgument>> = declared
            .into_iter()
            .map(|d| {
                let default = match &d.default {
                    Some(text) => Some(parse_default(state, text, &d.type_name)?),
                    None => None,
                };
                Some(CommandArgument {
                    name: d.name,
                    type_name: d.type_name,
                    optional: d.optional,
                    default,
                })
            })
            .collect();
        let trigger = arguments
            .is_some()
            .then(|| build_trigger(state, &format!("command /{name}"), trigger_section));
        state.set_current_event(None);

        let usage = usage.unwrap_or_else(|| format!("/{name} {raw_arguments}").trim_end().to_string());
        Some(Self {
            name,
            aliases,
            arguments: arguments?,
            usage,
            description,
            executable_by,
            script: state.script_name().to_string(),
            pattern,
            trigger: trigger?,
        })
    }

    /// The pattern arguments are matched against.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }

    /// Match `args` and walk the trigger against `event`, which carries the
    /// sender as its `player` value, or no `player` for the console.
    pub fn execute(&self, env: &ScriptEnv, event: Event, args: &str) -> CommandOutcome {
        let by_player = event.value("player").is_some();
        if by_player && !self.executable_by.contains(ExecutableBy::PLAYERS) {
            return CommandOutcome::Refused("This command can only be used by the console.");
        }
        if !by_player && !self.executable_by.contains(ExecutableBy::CONSOLE) {
            return CommandOutcome::Refused("This command can only be used by players.");
        }
        let values = match self.parse_arguments(env, args, &event) {
            Ok(values) => values,
            Err(error) => {
                return CommandOutcome::InvalidArguments {
                    error,
                    usage: self.usage.clone(),
                };
            }
        };

        let mut event = event;
        for (i, value) in values.iter().enumerate() {
            if let Some(value) = value {
                event = event.with_value(&CommandArgument::key(i + 1), value.clone());
            }
        }
        for (argument, value) in self.arguments.iter().zip(&values) {
            if let (Some(name), Some(value)) = (&argument.name, value) {
                event.locals().set(name, Some(value.clone()));
            }
        }
        debug!(command = self.name.as_str(), args, "running command");
        CommandOutcome::Executed(self.trigger.execute(&Arc::new(event)))
    }

    /// One value per argument, with defaults filled in for absent ones.
    fn parse_arguments(
        &self,
        env: &ScriptEnv,
        args: &str,
        event: &Event,
    ) -> Result<Vec<Option<Value>>, Option<String>> {
        let state = ParserState::new(env, &self.script);
        let logger = state.logger();
        let log = logger.start();
        let parsed = SkriptParser::new(&state, args, ParseFlags::PARSE_LITERALS, ParseContext::Command)
            .match_pattern(&self.pattern);
        let Some(parsed) = parsed else {
            return Err(log.error().map(|e| e.message));
        };
        drop(log);
        self.arguments
            .iter()
            .zip(parsed.exprs)
            .map(|(argument, expr)| match expr.or_else(|| argument.default.clone()) {
                Some(expr) => expr.get_single(event).map_err(|e| Some(e.to_string())),
                None => Ok(None),
            })
            .collect()
    }
}

impl fmt::Debug for ScriptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptCommand")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("arguments", &self.arguments)
            .field("pattern", &self.pattern.source())
            .field("usage", &self.usage)
            .field("executable_by", &self.executable_by)
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}

/// Commands of every loaded script, by name and alias.
#[derive(Debug, Default)]
pub struct Commands {
    entries: RwLock<FxHashMap<String, Arc<ScriptCommand>>>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` runnable under its name and aliases. If the name is
    /// taken, returns the script that took it.
    pub fn register(&self, command: Arc<ScriptCommand>) -> Result<(), String> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&command.name) {
            return Err(existing.script.clone());
        }
        for label in std::iter::once(&command.name).chain(&command.aliases) {
            entries
                .entry(label.clone())
                .or_insert_with(|| Arc::clone(&command));
        }
        Ok(())
    }

    /// Look up a command by name or alias, with or without the `/`.
    pub fn get(&self, label: &str) -> Option<Arc<ScriptCommand>> {
        let label = label.strip_prefix('/').unwrap_or(label).to_lowercase();
        self.entries.read().get(&label).cloned()
    }

    /// Forget every command declared by `script`.
    pub fn remove_script(&self, script: &str) {
        self.entries.write().retain(|_, c| c.script != script);
    }

    /// Command names without aliases, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(label, command)| **label == command.name)
            .map(|(label, _)| label.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{env, recorded};

    fn load(env: &ScriptEnv, text: &str) -> (Option<ScriptCommand>, String) {
        let root = SectionNode::parse("commands.sk", text).unwrap();
        let Some(Node::Section(section)) = root.children().next() else {
            panic!("no section in {text}");
        };
        let state = ParserState::new(env, "commands.sk");
        state.set_line(section.line);
        let command = ScriptCommand::load(&state, &section.key, section);
        (command, state.logger().take_diagnostics().render())
    }

    fn run(env: &ScriptEnv, command: &ScriptCommand, args: &str) -> CommandOutcome {
        command.execute(env, Event::new(COMMAND_EVENT), args)
    }

    #[test]
    fn test_header_becomes_pattern() {
        let env = env();
        let (command, errors) = load(
            &env,
            "command /Add <a: number> [<b: number = 2>] (plus):\n    trigger:\n        record {_a}\n",
        );
        assert_eq!(errors, "");
        let command = command.unwrap();
        assert_eq!(command.name, "add");
        assert_eq!(command.pattern().source(), "%number% [%-number%] \\(plus\\)");
        assert_eq!(command.usage, "/add <a: number> [<b: number = 2>] (plus)");
        assert!(!command.arguments[0].optional);
        assert!(command.arguments[1].optional);
        assert_eq!(command.executable_by, ExecutableBy::all());
    }

    #[test]
    fn test_default_outside_brackets_is_wrapped() {
        let env = env();
        let (command, _) = load(&env, "command /x <number = 1> <number>:\n    trigger:\n        stop\n");
        assert_eq!(command.unwrap().pattern().source(), "[%-number% %-number%]");
    }

    #[test]
    fn test_arguments_fill_locals_and_defaults() {
        let env = env();
        let (command, errors) = load(
            &env,
            "\
command /add <a: number> [<b: number = 2>]:
    trigger:
        record {_a}
        record {_b}
",
        );
        assert_eq!(errors, "");
        let command = command.unwrap();
        assert!(matches!(run(&env, &command, "5 7"), CommandOutcome::Executed(WalkOutcome::Completed)));
        assert!(matches!(run(&env, &command, "1"), CommandOutcome::Executed(WalkOutcome::Completed)));
        assert_eq!(recorded(&env), ["5", "7", "1", "2"]);

        assert!(matches!(run(&env, &command, ""), CommandOutcome::InvalidArguments { .. }));
        assert!(matches!(run(&env, &command, "five"), CommandOutcome::InvalidArguments { .. }));
        assert!(matches!(run(&env, &command, "1 2 3"), CommandOutcome::InvalidArguments { .. }));
        assert_eq!(
            run(&env, &command, "").reply().last().map(String::as_str),
            Some("Correct usage: /add <a: number> [<b: number = 2>]")
        );
    }

    #[test]
    fn test_executable_by() {
        let env = env();
        let (command, errors) = load(
            &env,
            "command /op:\n    executable by: console\n    trigger:\n        record \"ok\"\n",
        );
        assert_eq!(errors, "");
        let command = command.unwrap();
        assert_eq!(command.executable_by, ExecutableBy::CONSOLE);
        let player = Event::new(COMMAND_EVENT).with_value("player", Value::object("player", "Notch"));
        assert!(matches!(
            command.execute(&env, player, ""),
            CommandOutcome::Refused("This command can only be used by the console.")
        ));
        assert!(matches!(run(&env, &command, ""), CommandOutcome::Executed(_)));
    }

    #[test]
    fn test_header_errors() {
        let env = env();
        let cases = [
            "command /a <thing>:",
            "command /a <numbers>:",
            "command /a <text>:",
            "command /a <a*b: number>:",
            "command /a ] <number>:",
            "command /a [<number>:",
            "command /a <number = nope>:",
            "command:",
        ];
        let mut out = String::new();
        for header in cases {
            let (command, errors) = load(&env, &format!("{header}\n    trigger:\n        stop\n"));
            assert!(command.is_none(), "{header}");
            out.push_str(&errors);
        }
        insta::assert_snapshot!(out, @r"
        error: Unknown type 'thing' (commands.sk, line 1)
        error: A command argument takes a single value, use <number> instead of <numbers> (commands.sk, line 1)
        error: Can't use texts as argument of a command (commands.sk, line 1)
        error: An argument's name must be a valid variable name, and cannot be a list variable. (commands.sk, line 1)
        error: Invalid placement of [optional brackets] (commands.sk, line 1)
        error: Invalid amount of [optional brackets] (commands.sk, line 1)
        error: Can't understand this expression: 'nope' (commands.sk, line 1)
        error: Invalid command structure pattern: 'command' (commands.sk, line 1)
        ");
    }

    #[test]
    fn test_section_entries() {
        let env = env();
        let (command, errors) = load(
            &env,
            "\
command /warp <number>:
    aliases: /w, goto
    description: Teleports you
    usage: /warp <id>
    colour: red
",
        );
        assert!(command.is_none());
        insta::assert_snapshot!(errors, @r"
        error: Unexpected entry 'colour'. Check whether it's spelled correctly or remove it. (commands.sk, line 5)
        error: Required entry 'trigger' is missing in 'command /warp' (commands.sk, line 1)
        ");

        let (command, _) = load(
            &env,
            "command /warp <number>:\n    aliases: /w, goto\n    usage: /warp <id>\n    trigger:\n        stop\n",
        );
        let command = Arc::new(command.unwrap());
        assert_eq!(command.aliases, ["w", "goto"]);
        assert_eq!(command.usage, "/warp <id>");

        let commands = Commands::new();
        commands.register(Arc::clone(&command)).unwrap();
        assert!(commands.get("/W").is_some());
        assert!(commands.get("goto").is_some());
        assert_eq!(commands.names(), ["warp"]);
        assert_eq!(commands.register(command), Err("commands.sk".to_string()));
        commands.remove_script("commands.sk");
        assert!(commands.get("warp").is_none());
    }
}
