//! Loading whole script files.
//!
//! A script is read in two passes over its top-level sections. The first
//! collects `options:` and declares every `function` signature, so calls may
//! appear above the function they call. The second builds the function
//! bodies, the `on <event>:` triggers and the `command /name:` sections.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::ScriptCommand;
use crate::config::{Node, SectionNode};
use crate::dispatch::parse_event;
use crate::error::{LoadError, LoadResult};
use crate::function::{ScriptFunction, Signature};
use crate::kleenean::Kleenean;
use crate::log::Diagnostics;
use crate::parser::{CurrentEvent, ParserState, ScriptEnv};
use crate::syntax::SkriptEvent;
use crate::trigger::{Trigger, build_trigger};

/// An event trigger of a loaded script.
pub struct ScriptTrigger {
    /// Event kinds the trigger listens to.
    pub kinds: Vec<String>,
    /// The parsed header, asked whether a fired event applies.
    pub event: Box<dyn SkriptEvent>,
    pub trigger: Arc<Trigger>,
}

impl std::fmt::Debug for ScriptTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptTrigger")
            .field("kinds", &self.kinds)
            .field("event", &self.event)
            .field("trigger", &self.trigger.name())
            .finish()
    }
}

#[derive(Debug)]
pub struct LoadedScript {
    pub name: String,
    pub triggers: Vec<ScriptTrigger>,
    /// Names of the functions the script declared.
    pub functions: Vec<String>,
    /// Names of the commands the script declared.
    pub commands: Vec<String>,
    pub diagnostics: Diagnostics,
}

impl LoadedScript {
    /// Triggers by the event kind they listen to.
    pub fn by_kind(&self) -> BTreeMap<&str, Vec<&ScriptTrigger>> {
        let mut grouped: BTreeMap<&str, Vec<&ScriptTrigger>> = BTreeMap::new();
        for trigger in &self.triggers {
            for kind in &trigger.kinds {
                grouped.entry(kind.as_str()).or_default().push(trigger);
            }
        }
        grouped
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| text.get(prefix.len()..))
}

pub struct ScriptLoader {
    env: ScriptEnv,
}

impl ScriptLoader {
    pub const fn new(env: ScriptEnv) -> Self {
        Self { env }
    }

    pub const fn env(&self) -> &ScriptEnv {
        &self.env
    }

    /// Read and load a script file. The script is named after the file.
    pub fn load_file(&self, path: &Path) -> LoadResult<LoadedScript> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.load_str(&name, &text)
    }

    /// Load a script from text.
    ///
    /// Only an unreadable section tree is an `Err`. Lines that fail to parse
    /// are left out and reported in [`LoadedScript::diagnostics`].
    pub fn load_str(&self, name: &str, text: &str) -> LoadResult<LoadedScript> {
        let root = SectionNode::parse(name, text)?;
        let state = ParserState::new(&self.env, name);
        let logger = state.logger();

        // First pass: options and function signatures.
        let mut signatures: Vec<Option<Arc<Signature>>> = Vec::new();
        for node in root.children() {
            state.set_line(node.line());
            let Node::Section(section) = node else {
                signatures.push(None);
                continue;
            };
            if section.key.eq_ignore_ascii_case("options") {
                load_options(&state, section, "");
                signatures.push(None);
                continue;
            }
            let header = state.replace_options(&section.key);
            if strip_prefix_ignore_case(&header, "function ").is_none() {
                signatures.push(None);
                continue;
            }
            let declared = Signature::parse(&header, &state).map(Arc::new).filter(|signature| {
                let fresh = self.env.functions.declare(Arc::clone(signature));
                if !fresh {
                    logger.error(format!("A function named '{}' already exists.", signature.name));
                }
                fresh
            });
            signatures.push(declared);
        }

        // Second pass: bodies.
        let mut triggers = Vec::new();
        let mut functions = Vec::new();
        let mut commands = Vec::new();
        for (node, signature) in root.children().zip(signatures) {
            state.set_line(node.line());
            let section = match node {
                Node::Entry(_) => {
                    logger.error("invalid line - all code has to be put into triggers");
                    continue;
                }
                Node::Section(section) => section,
                Node::Void { .. } => continue,
            };
            if section.key.eq_ignore_ascii_case("options") {
                continue;
            }
            let header = state.replace_options(&section.key);
            if strip_prefix_ignore_case(&header, "function ").is_some() {
                let Some(signature) = signature else {
                    continue;
                };
                self.load_function(&state, section, signature, &mut functions);
                continue;
            }
            if strip_prefix_ignore_case(&header, "command ").is_some() {
                self.load_command(&state, &header, section, &mut commands);
                continue;
            }

            let Some((index, event)) = parse_event(&state, &header) else {
                continue;
            };
            let Some(info) = self.env.registry.events().get(index) else {
                continue;
            };
            let kinds: Vec<String> = info.kinds.iter().cloned().collect();
            state.set_current_event(Some(CurrentEvent {
                name: info.syntax.name.clone(),
                values: self.env.registry.common_values(&kinds),
                kinds: kinds.clone(),
            }));
            state.set_has_delay_before(Kleenean::False);
            let trigger = build_trigger(&state, &header, section);
            state.set_current_event(None);
            debug!(script = name, trigger = header.as_str(), "loaded trigger");
            triggers.push(ScriptTrigger {
                kinds,
                event,
                trigger,
            });
        }

        let diagnostics = logger.take_diagnostics();
        info!(
            script = name,
            triggers = triggers.len(),
            functions = functions.len(),
            commands = commands.len(),
            errors = diagnostics.errors().count(),
            "loaded script"
        );
        Ok(LoadedScript {
            name: name.to_string(),
            triggers,
            functions,
            commands,
            diagnostics,
        })
    }

    fn load_function(
        &self,
        state: &ParserState,
        section: &SectionNode,
        signature: Arc<Signature>,
        functions: &mut Vec<String>,
    ) {
        state.set_current_function(Some(Arc::clone(&signature)));
        state.set_current_event(Some(CurrentEvent {
            name: "function".to_string(),
            kinds: Vec::new(),
            values: Vec::new(),
        }));
        state.set_has_delay_before(Kleenean::False);
        let trigger = build_trigger(state, &format!("function {}", signature.name), section);
        state.set_current_function(None);
        state.set_current_event(None);
        let name = signature.name.clone();
        self.env
            .functions
            .define(&name, Arc::new(ScriptFunction::new(signature, trigger)));
        functions.push(name);
    }

    fn load_command(
        &self,
        state: &ParserState,
        header: &str,
        section: &SectionNode,
        commands: &mut Vec<String>,
    ) {
        let Some(command) = ScriptCommand::load(state, header, section) else {
            return;
        };
        let name = command.name.clone();
        state.set_line(section.line);
        match self.env.commands.register(Arc::new(command)) {
            Ok(()) => {
                debug!(script = state.script_name(), command = name.as_str(), "loaded command");
                commands.push(name);
            }
            Err(script) => state
                .logger()
                .error(format!("A command with the name /{name} is already defined in {script}")),
        }
    }
}

/// `key: value` entries; nested sections prefix their keys with `section.`.
fn load_options(state: &ParserState, section: &SectionNode, prefix: &str) {
    for node in section.children() {
        state.set_line(node.line());
        match node {
            Node::Entry(entry) => match entry.key_value() {
                Some((key, value)) => state.set_option(&format!("{prefix}{key}"), value),
                None => state.logger().error("invalid line in options"),
            },
            Node::Section(inner) => {
                load_options(state, inner, &format!("{prefix}{}.", inner.key));
            }
            Node::Void { .. } => {}
        }
    }
}
