//! Events a host can fire, and the trigger headers that listen to them.

use skript_lang::value::Value;
use skript_lang::{
    Event, ExprRef, Kleenean, ParseResult, ParserState, RegistryBuilder, SkriptEvent,
    SyntaxElement,
};

pub const LOAD: &str = "load";
pub const TICK: &str = "tick";
pub const JOIN: &str = "join";
pub const CHAT: &str = "chat";
pub const CUSTOM: &str = "custom";
/// Fired by [`crate::ScriptHost::run_command`]; only command triggers see it.
pub const COMMAND: &str = skript_lang::command::COMMAND_EVENT;

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .event_kind(LOAD, None)
        .event_kind(TICK, None)
        .event_kind(JOIN, None)
        .event_kind(CHAT, None)
        .event_kind(CUSTOM, None)
        .event_kind(COMMAND, None)
        .event_value(JOIN, "player", "player")
        .event_value(CHAT, "player", "player")
        .event_value(CHAT, "message", "string")
        .event_value(CUSTOM, "name", "string")
        .event_value(COMMAND, "player", "player")
        .event::<SimpleEvent>("script load", &[LOAD], &["[script] load[ing]"])
        .event::<SimpleEvent>("tick", &[TICK], &["[every] tick"])
        .event::<SimpleEvent>("join", &[JOIN], &["[player] join[ing]"])
        .event::<SimpleEvent>("chat", &[CHAT], &["[player] chat"])
        .event::<CustomEvent>("custom", &[CUSTOM], &["custom event %strings%"]);
}

/// A header without arguments. Every fired event of its kind applies.
#[derive(Default)]
struct SimpleEvent {
    text: String,
}

impl SyntaxElement for SimpleEvent {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.text.clone_from(&result.expr);
        true
    }
}

impl SkriptEvent for SimpleEvent {
    fn check(&self, _event: &Event) -> bool {
        true
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        self.text.clone()
    }
}

/// `on custom event "name"`, for events scripts and hosts make up.
#[derive(Default)]
struct CustomEvent {
    names: Vec<Value>,
}

impl SyntaxElement for CustomEvent {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        let Some(names) = exprs[0].as_ref().and_then(|e| e.literal_values()) else {
            return false;
        };
        self.names = names;
        true
    }
}

impl SkriptEvent for CustomEvent {
    fn check(&self, event: &Event) -> bool {
        event
            .value("name")
            .is_some_and(|name| self.names.iter().any(|n| n.equals(name)))
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        let names: Vec<String> = self.names.iter().map(|n| format!("\"{n}\"")).collect();
        format!("custom event {}", names.join(", "))
    }
}
