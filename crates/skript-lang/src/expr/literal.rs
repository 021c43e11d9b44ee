use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::Event;
use crate::expr::{ExprRef, Expression};
use crate::log::LogEntry;
use crate::parser::ParseContext;
use crate::types::{OBJECT, TypeRegistry, join_with};
use crate::value::Value;

/// Event-independent constant values.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    values: Vec<Value>,
    type_name: String,
    and: bool,
}

impl Literal {
    pub fn new(value: Value) -> Self {
        Self {
            type_name: value.type_name().to_string(),
            values: vec![value],
            and: true,
        }
    }

    /// Several constants of the same type.
    pub fn many(values: Vec<Value>, type_name: &str, and: bool) -> Self {
        Self {
            values,
            type_name: type_name.to_string(),
            and,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Expression for Literal {
    fn return_type(&self) -> &str {
        &self.type_name
    }

    fn is_single(&self) -> bool {
        self.values.len() == 1 || !self.and
    }

    fn get_and(&self) -> bool {
        self.and
    }

    fn get_all(&self, _event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(self.values.clone())
    }

    fn get_array(&self, _event: &Event) -> RuntimeResult<Vec<Value>> {
        if self.and {
            Ok(self.values.clone())
        } else {
            Ok(self.values.first().cloned().into_iter().collect())
        }
    }

    fn is_literal(&self) -> bool {
        true
    }

    fn literal_values(&self) -> Option<Vec<Value>> {
        Some(self.values.clone())
    }

    fn get_converted(self: Arc<Self>, to: &[&str], types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        if to.iter().any(|t| types.is_assignable(&self.type_name, t)) {
            return Some(self);
        }
        let converted = self
            .values
            .iter()
            .map(|v| types.convert_any(v, to))
            .collect::<Option<Vec<_>>>()?;
        let type_name = converted
            .first()
            .map_or_else(|| to.first().copied().unwrap_or(OBJECT), Value::type_name)
            .to_string();
        Some(Arc::new(Self {
            values: converted,
            type_name,
            and: self.and,
        }))
    }

    fn describe(&self, _event: Option<&Event>, debug: bool) -> String {
        let rendered: Vec<String> = self
            .values
            .iter()
            .map(|v| match v {
                Value::Text(s) if debug => format!("\"{s}\""),
                other => other.to_string(),
            })
            .collect();
        join_with(&rendered, if self.and { "and" } else { "or" })
    }
}

/// Text that could be a literal of any type.
///
/// Produced where an `object` is wanted and nothing else matched. It has no
/// values of its own; whoever receives it converts it to the type it
/// actually needs with [`Expression::get_converted`].
#[derive(Debug, Clone)]
pub struct UnparsedLiteral {
    text: String,
    context: ParseContext,
    error: Option<LogEntry>,
}

impl UnparsedLiteral {
    pub fn new(text: &str, context: ParseContext, error: Option<LogEntry>) -> Self {
        Self {
            text: text.to_string(),
            context,
            error,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The best error seen while this text failed to parse as something else.
    pub fn error(&self) -> Option<&LogEntry> {
        self.error.as_ref()
    }
}

impl Expression for UnparsedLiteral {
    fn return_type(&self) -> &str {
        OBJECT
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, _event: &Event) -> RuntimeResult<Vec<Value>> {
        Err(RuntimeError::fault(format!(
            "'{}' was used without being parsed",
            self.text
        )))
    }

    fn is_literal(&self) -> bool {
        true
    }

    fn get_converted(self: Arc<Self>, to: &[&str], types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        let value = to.iter().find_map(|t| {
            if *t == OBJECT {
                types.parse_any(&self.text, self.context)
            } else {
                types.parse(&self.text, t, self.context)
            }
        })?;
        Some(Arc::new(Literal::new(value)))
    }

    fn describe(&self, _event: Option<&Event>, debug: bool) -> String {
        if debug {
            format!("'{}' (unparsed)", self.text)
        } else {
            format!("'{}'", self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseFlags, ParserState, SkriptParser};
    use crate::test_support;
    use crate::types::ClassInfo;

    fn types() -> Arc<TypeRegistry> {
        let mut types = TypeRegistry::new();
        types
            .register(
                ClassInfo::new("number")
                    .name("number", "numbers")
                    .parser(|s, _| s.parse().ok().map(Value::Number)),
            )
            .unwrap();
        types
            .register(ClassInfo::new("string").name("text", "texts"))
            .unwrap();
        types
            .add_converter("number", "string", |v| Some(Value::Text(v.as_text())))
            .unwrap();
        Arc::new(types)
    }

    #[test]
    fn test_parsed_number_describes_as_written() {
        let env = test_support::env();
        let state = ParserState::new(&env, "test.sk");
        let parse = |text: &str| {
            SkriptParser::new(&state, text, ParseFlags::all(), ParseContext::Default)
                .parse_expression(&["number"])
                .unwrap()
        };
        let answer = parse("42");
        assert!(answer.is_literal());
        assert_eq!(answer.literal_values(), Some(vec![Value::Number(42.0)]));
        assert_eq!(answer.to_string(), "42");
        assert_eq!(parse("2.50").to_string(), "2.5");
    }

    #[test]
    fn test_literal_conversion() {
        let types = types();
        let literal = Arc::new(Literal::new(Value::Number(3.0)));
        let converted = literal.get_converted(&["string"], &types).unwrap();
        assert_eq!(converted.return_type(), "string");
        assert_eq!(converted.literal_values(), Some(vec![Value::text("3")]));
    }

    #[test]
    fn test_unparsed_resolves_on_conversion() {
        let types = types();
        let unparsed = Arc::new(UnparsedLiteral::new("12", ParseContext::Default, None));
        let parsed = unparsed.get_converted(&[OBJECT], &types).unwrap();
        assert_eq!(parsed.literal_values(), Some(vec![Value::Number(12.0)]));

        let nonsense = Arc::new(UnparsedLiteral::new("zzz", ParseContext::Default, None));
        assert!(nonsense.get_converted(&["number"], &types).is_none());
    }
}
