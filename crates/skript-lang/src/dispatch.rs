//! Trying registered syntax against a line.
//!
//! Elements are tried in registration order, and each element's patterns in
//! declaration order. The first pattern that matches structurally, gets its
//! missing defaults and is accepted by the element's `init` wins.

use std::sync::Arc;

use crate::expr::ExprRef;
use crate::function::FunctionCallEffect;
use crate::log::ErrorQuality;
use crate::matcher::next;
use crate::parser::{ParseContext, ParseFlags, SkriptParser};
use crate::registry::SyntaxInfo;
use crate::syntax::{Condition, Effect, SkriptEvent, SyntaxElement};

/// A parsed statement line.
pub enum Statement {
    Effect(Box<dyn Effect>),
    /// Skips the rest of its section when it fails.
    Condition(Box<dyn Condition>),
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Effect(e) => f.debug_tuple("Effect").field(e).finish(),
            Self::Condition(c) => f.debug_tuple("Condition").field(c).finish(),
        }
    }
}

impl SkriptParser<'_> {
    /// Try `infos` in order. Returns the index of the element that accepted
    /// the text, and the initialised element.
    ///
    /// Prints the best error, or `default_error` if nothing was logged.
    pub fn parse_syntax<'r, T>(
        &self,
        infos: impl IntoIterator<Item = &'r SyntaxInfo<T>>,
        default_error: Option<&str>,
    ) -> Option<(usize, Box<T>)>
    where
        T: ?Sized + SyntaxElement + 'r,
    {
        let logger = self.state.logger();
        let log = logger.start();
        for (index, info) in infos.into_iter().enumerate() {
            for (pattern_index, pattern) in info.patterns.iter().enumerate() {
                log.clear();
                let Some(mut result) = self.match_pattern(pattern) else {
                    continue;
                };
                if !self.fill_defaults(pattern, &mut result.exprs) {
                    continue;
                }
                let mut element = info.instantiate();
                let frame = logger.start();
                let accepted = element.init(
                    &result.exprs,
                    pattern_index,
                    self.state.has_delay_before(),
                    &result,
                    self.state,
                );
                if accepted {
                    frame.print_log();
                    log.print_log();
                    return Some((index, element));
                }
                if frame.has_error() {
                    frame.print_error(None);
                    log.print_error(None);
                    return None;
                }
            }
        }
        log.print_error(default_error);
        None
    }

    /// Substitute the type's default for every empty, non-optional
    /// placeholder. `false` if one of them has no usable default here.
    fn fill_defaults(&self, pattern: &crate::pattern::Pattern, exprs: &mut [Option<ExprRef>]) -> bool {
        for placeholder in pattern.placeholders() {
            if exprs[placeholder.slot].is_some() || placeholder.info.optional {
                continue;
            }
            let Some(first) = placeholder.info.types.first() else {
                return false;
            };
            let default = self
                .state
                .types()
                .get(&first.code_name)
                .and_then(|c| c.get_default_expression())
                .and_then(|d| d.create(self.state));
            let Some(mut default) = default else {
                return false;
            };
            if placeholder.info.time != 0 {
                let supported =
                    Arc::get_mut(&mut default).is_some_and(|d| d.set_time(placeholder.info.time));
                if !supported {
                    return false;
                }
            }
            exprs[placeholder.slot] = Some(default);
        }
        true
    }

    /// A statement line: a function call, a condition or an effect.
    pub fn parse_statement(&self) -> Option<Statement> {
        let logger = self.state.logger();
        let log = logger.start();
        if let Some(call) = self.parse_function(None) {
            log.print_log();
            return Some(Statement::Effect(Box::new(FunctionCallEffect::new(call))));
        }
        if log.has_error() {
            log.print_error(None);
            return None;
        }
        log.clear();

        let registry = self.state.registry();
        if let Some((_, condition)) = self.parse_syntax(registry.conditions(), None) {
            log.print_log();
            return Some(Statement::Condition(condition));
        }
        log.clear();
        if let Some((_, effect)) = self.parse_syntax(registry.effects(), None) {
            log.print_log();
            return Some(Statement::Effect(effect));
        }
        log.print_error(Some(&format!(
            "Can't understand this condition/effect: {}",
            self.expr
        )));
        None
    }

    /// A condition, e.g. the header of an `if` section. Brackets around the
    /// whole condition are ignored.
    pub fn parse_condition(&self) -> Option<Box<dyn Condition>> {
        let mut text = self.expr.clone();
        loop {
            let chars: Vec<char> = text.chars().collect();
            if chars.first() != Some(&'(') || next(&chars, 0, self.context) != Some(chars.len()) {
                break;
            }
            text = chars[1..chars.len() - 1].iter().collect::<String>().trim().to_string();
        }
        let default = format!("Can't understand this condition: '{text}'");
        self.sub(&text)
            .parse_syntax(self.state.registry().conditions(), Some(&default))
            .map(|(_, condition)| condition)
    }

    pub fn parse_effect(&self) -> Option<Box<dyn Effect>> {
        let default = format!("Can't understand this effect: '{}'", self.expr);
        self.parse_syntax(self.state.registry().effects(), Some(&default))
            .map(|(_, effect)| effect)
    }
}

/// Parse a trigger header such as `on join` against the event registry.
/// Returns the index of the matching [`crate::registry::EventInfo`].
pub fn parse_event(
    state: &crate::parser::ParserState,
    header: &str,
) -> Option<(usize, Box<dyn SkriptEvent>)> {
    let trimmed = header.trim();
    let key = trimmed
        .get(..3)
        .filter(|prefix| prefix.eq_ignore_ascii_case("on "))
        .and_then(|_| trimmed.get(3..))
        .unwrap_or(trimmed)
        .trim();
    let parser = SkriptParser::new(state, key, ParseFlags::PARSE_LITERALS, ParseContext::Event);
    let infos = state.registry().events().iter().map(|info| &info.syntax);
    let logger = state.logger();
    let log = logger.start();
    let parsed = parser.parse_syntax(infos, None);
    if parsed.is_some() {
        log.print_log();
    } else {
        log.print_error_with(
            &format!("can't understand this event: '{key}'"),
            ErrorQuality::NotAnExpression,
        );
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeResult;
    use crate::event::Event;
    use crate::kleenean::Kleenean;
    use crate::matcher::ParseResult;
    use crate::parser::{CurrentEvent, ParserState, ScriptEnv};
    use crate::registry::RegistryBuilder;
    use crate::types::ClassInfo;
    use crate::value::Value;
    use crate::expr::EventValueDefault;

    #[derive(Default)]
    struct Kick {
        target: Option<ExprRef>,
        mark: i32,
    }

    impl SyntaxElement for Kick {
        fn init(
            &mut self,
            exprs: &[Option<ExprRef>],
            _matched_pattern: usize,
            _delayed: Kleenean,
            result: &ParseResult,
            state: &ParserState,
        ) -> bool {
            self.mark = result.mark;
            if result.mark == 2 {
                state.logger().error("players cannot be kicked gently");
                return false;
            }
            self.target.clone_from(&exprs[0]);
            true
        }
    }

    impl Effect for Kick {
        fn execute(&self, _event: &Event) -> RuntimeResult<()> {
            Ok(())
        }

        fn describe(&self, event: Option<&Event>, debug: bool) -> String {
            format!(
                "kick {}",
                self.target.as_ref().map_or_else(String::new, |t| t.describe(event, debug))
            )
        }
    }

    #[derive(Default)]
    struct Join;

    impl SyntaxElement for Join {
        fn init(
            &mut self,
            _exprs: &[Option<ExprRef>],
            _matched_pattern: usize,
            _delayed: Kleenean,
            _result: &ParseResult,
            _state: &ParserState,
        ) -> bool {
            true
        }
    }

    impl SkriptEvent for Join {
        fn check(&self, _event: &Event) -> bool {
            true
        }

        fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
            "join".to_string()
        }
    }

    fn state() -> ParserState {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(
                ClassInfo::new("player")
                    .name("player", "players")
                    .default_expression(EventValueDefault::new("player")),
            )
            .event_kind("join", None)
            .event_value("join", "player", "player")
            .event::<Join>("join", &["join"], &["[player] join[ing]"])
            .effect::<Kick>(&["(1¦kick|2¦gently kick) [%player%]"]);
        let registry = Arc::new(builder.build().unwrap());
        ParserState::new(&ScriptEnv::new(registry), "dispatch.sk")
    }

    fn parse_line(state: &ParserState, line: &str) -> Option<Statement> {
        SkriptParser::new(state, line, ParseFlags::all(), ParseContext::Default).parse_statement()
    }

    #[test]
    fn test_default_filled_from_event() {
        let state = state();
        assert!(parse_line(&state, "kick").is_none());
        state.logger().take_diagnostics();

        state.set_current_event(Some(CurrentEvent {
            name: "join".to_string(),
            kinds: vec!["join".to_string()],
            values: vec![("player".to_string(), "player".to_string())],
        }));
        let Some(Statement::Effect(effect)) = parse_line(&state, "kick") else {
            panic!("expected an effect");
        };
        let event = Event::new("join").with_value("player", Value::object("player", "alex"));
        assert_eq!(effect.describe(Some(&event), false), "kick alex");
    }

    #[test]
    fn test_init_error_wins() {
        let state = state();
        assert!(parse_line(&state, "gently kick").is_none());
        assert_eq!(
            state.logger().take_diagnostics().render(),
            "error: players cannot be kicked gently\n"
        );
    }

    #[test]
    fn test_unknown_statement() {
        let state = state();
        assert!(parse_line(&state, "dance wildly").is_none());
        assert_eq!(
            state.logger().take_diagnostics().render(),
            "error: Can't understand this condition/effect: dance wildly\n"
        );
    }

    #[test]
    fn test_parse_event_header() {
        let state = state();
        let (index, event) = parse_event(&state, "on player joining").unwrap();
        assert_eq!(index, 0);
        assert_eq!(event.describe(None, false), "join");
        assert!(parse_event(&state, "on quit").is_none());
        assert_eq!(
            state.logger().take_diagnostics().render(),
            "error: can't understand this event: 'quit'\n"
        );
    }
}
