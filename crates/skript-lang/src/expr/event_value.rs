use std::sync::Arc;

use crate::error::RuntimeResult;
use crate::event::Event;
use crate::expr::{ExprRef, Expression};
use crate::kleenean::Kleenean;
use crate::matcher::ParseResult;
use crate::parser::ParserState;
use crate::syntax::SyntaxElement;
use crate::types::{DefaultExpression, OBJECT};
use crate::value::Value;

/// A value carried by the fired event, such as its player.
///
/// The key is either fixed (`EventValueExpression::new("player")`) or taken
/// from the first regex capture of the matched pattern, as in
/// `[the] event-<.+>`.
#[derive(Debug, Clone, Default)]
pub struct EventValueExpression {
    key: Option<String>,
    type_name: String,
}

impl EventValueExpression {
    pub fn new(key: &str) -> Self {
        Self {
            key: Some(key.to_lowercase()),
            type_name: String::new(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Bind to the current event. Prints an error if it has no such value.
    fn resolve(&mut self, key: String, state: &ParserState) -> bool {
        let Some(type_name) = state.event_value_type(&key) else {
            let message = match state.current_event() {
                Some(event) => {
                    let article = if event.name.starts_with(['a', 'e', 'i', 'o', 'u']) {
                        "an"
                    } else {
                        "a"
                    };
                    format!("There's no {key} in {article} {} event", event.name)
                }
                None => format!("There's no {key} here"),
            };
            state.logger().error(message);
            return false;
        };
        self.key = Some(key);
        self.type_name = type_name;
        true
    }
}

impl SyntaxElement for EventValueExpression {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let key = match (&self.key, result.regexes.first()) {
            (Some(key), _) => key.clone(),
            (None, Some(capture)) => capture.text.trim().to_lowercase(),
            (None, None) => return false,
        };
        self.resolve(key, state)
    }
}

impl Expression for EventValueExpression {
    fn return_type(&self) -> &str {
        if self.type_name.is_empty() {
            OBJECT
        } else {
            &self.type_name
        }
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(self
            .key
            .as_deref()
            .and_then(|key| event.value(key))
            .cloned()
            .into_iter()
            .collect())
    }

    fn describe(&self, event: Option<&Event>, _debug: bool) -> String {
        if let Some(value) = event.and_then(|e| self.get_all(e).ok()).and_then(|v| v.into_iter().next()) {
            return value.as_text();
        }
        format!("event-{}", self.key.as_deref().unwrap_or("value"))
    }
}

/// The default for a type that the current event usually provides, e.g.
/// `player`. Unusable in events that lack the value.
#[derive(Debug, Clone)]
pub struct EventValueDefault {
    key: String,
}

impl EventValueDefault {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_lowercase(),
        }
    }
}

impl DefaultExpression for EventValueDefault {
    fn create(&self, state: &ParserState) -> Option<ExprRef> {
        let type_name = state.event_value_type(&self.key)?;
        Some(Arc::new(EventValueExpression {
            key: Some(self.key.clone()),
            type_name,
        }))
    }

    fn is_literal(&self) -> bool {
        false
    }

    fn is_single(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{CurrentEvent, ScriptEnv};
    use crate::registry::RegistryBuilder;
    use crate::types::ClassInfo;

    fn state() -> ParserState {
        let mut builder = RegistryBuilder::new();
        builder.register_type(ClassInfo::new("player").name("player", "players"));
        let registry = Arc::new(builder.build().unwrap());
        let state = ParserState::new(&ScriptEnv::new(registry), "values.sk");
        state.set_current_event(Some(CurrentEvent {
            name: "join".to_string(),
            kinds: vec!["join".to_string()],
            values: vec![("player".to_string(), "player".to_string())],
        }));
        state
    }

    #[test]
    fn test_fixed_key_reads_event() {
        let state = state();
        let mut expr = EventValueExpression::new("Player");
        assert!(expr.init(&[], 0, Kleenean::False, &ParseResult::new(0), &state));
        assert_eq!(expr.return_type(), "player");
        let event = Event::new("join").with_value("player", Value::object("player", "alex"));
        assert_eq!(expr.get_all(&event).unwrap(), vec![Value::object("player", "alex")]);
        assert!(expr.get_all(&Event::new("join")).unwrap().is_empty());
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let state = state();
        let mut expr = EventValueExpression::new("message");
        assert!(!expr.init(&[], 0, Kleenean::False, &ParseResult::new(0), &state));
        assert_eq!(
            state.logger().take_diagnostics().render(),
            "error: There's no message in a join event\n"
        );
    }

    #[test]
    fn test_default_needs_value() {
        let state = state();
        assert!(EventValueDefault::new("player").create(&state).is_some());
        assert!(EventValueDefault::new("world").create(&state).is_none());
    }
}
