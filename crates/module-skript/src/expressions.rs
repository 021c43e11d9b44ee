//! Expressions registered as syntax.

use std::sync::Arc;

use skript_lang::command::{COMMAND_EVENT, CommandArgument};
use skript_lang::event::LoopKey;
use skript_lang::expr::EventValueExpression;
use skript_lang::value::Value;
use skript_lang::{
    Event, ExprRef, Expression, Kleenean, OBJECT, ParseResult, ParserState, RegistryBuilder,
    RuntimeResult, SyntaxElement, TypeRegistry,
};

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .expression::<Arithmetic>("number", &["%number% (+|1¦-|2¦*|3¦/) %number%"])
        .expression::<Amount>("number", &["(size|amount|number) of %objects%"])
        .expression::<LoopValue>(OBJECT, &["[the] loop-<.+>"])
        .expression_with("EventValueExpression", OBJECT, &["[the] event-<.+>"], || {
            Box::new(EventValueExpression::default())
        })
        .expression_with("EventPlayer", "player", &["[the] player"], || {
            Box::new(EventValueExpression::new("player"))
        })
        .expression_with("EventMessage", "string", &["[the] [chat] message"], || {
            Box::new(EventValueExpression::new("message"))
        })
        .expression::<Argument>(
            OBJECT,
            &[
                "[the] last arg[ument]",
                "[the] arg[ument](-| )<\\d+>",
                "[the] <\\d+>(st|nd|rd|th) arg[ument]",
                "[the] arg[ument]",
            ],
        );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Operator {
    #[default]
    Plus,
    Minus,
    Times,
    Divide,
}

impl Operator {
    const fn from_mark(mark: i32) -> Self {
        match mark {
            1 => Self::Minus,
            2 => Self::Times,
            3 => Self::Divide,
            _ => Self::Plus,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Times => "*",
            Self::Divide => "/",
        }
    }

    fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            Self::Plus => left + right,
            Self::Minus => left - right,
            Self::Times => left * right,
            Self::Divide => left / right,
        }
    }
}

/// `a + b` and friends. A missing operand counts as zero.
#[derive(Default)]
struct Arithmetic {
    left: Option<ExprRef>,
    right: Option<ExprRef>,
    operator: Operator,
}

impl SyntaxElement for Arithmetic {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.left.clone_from(&exprs[0]);
        self.right.clone_from(&exprs[1]);
        self.operator = Operator::from_mark(result.mark);
        self.left.is_some() && self.right.is_some()
    }
}

impl Expression for Arithmetic {
    fn return_type(&self) -> &str {
        "number"
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        let operand = |e: &Option<ExprRef>| -> RuntimeResult<f64> {
            Ok(match e {
                Some(e) => e.get_single(event)?.map_or(0.0, |v| v.as_number()),
                None => 0.0,
            })
        };
        let result = self.operator.apply(operand(&self.left)?, operand(&self.right)?);
        Ok(vec![Value::Number(result)])
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let side = |e: &Option<ExprRef>| e.as_ref().map(|e| e.describe(event, debug)).unwrap_or_default();
        format!("{} {} {}", side(&self.left), self.operator.symbol(), side(&self.right))
    }
}

#[derive(Default)]
struct Amount {
    values: Option<ExprRef>,
}

impl SyntaxElement for Amount {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.values.clone_from(&exprs[0]);
        self.values.is_some()
    }
}

impl Expression for Amount {
    fn return_type(&self) -> &str {
        "number"
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        let count = match &self.values {
            Some(values) => values.get_array(event)?.len(),
            None => 0,
        };
        Ok(vec![Value::Number(count as f64)])
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let values = self.values.as_ref().map(|v| v.describe(event, debug));
        format!("size of {}", values.unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum LoopPart {
    #[default]
    Value,
    Index,
    /// The value converted to a type, as in `loop-number`.
    Typed(String),
}

/// `loop-value`, `loop-index` and `loop-<type>`, with an optional `-<n>`
/// suffix choosing the n-th matching loop from the outside in. Without the
/// suffix the innermost matching loop is used.
#[derive(Default)]
struct LoopValue {
    name: String,
    key: Option<LoopKey>,
    part: LoopPart,
    type_name: String,
    types: Option<Arc<TypeRegistry>>,
}

impl LoopValue {
    fn split_number(text: &str) -> (&str, Option<usize>) {
        match text.rsplit_once('-') {
            Some((name, n)) => match n.parse::<usize>() {
                Ok(n) => (name, Some(n)),
                Err(_) => (text, None),
            },
            None => (text, None),
        }
    }
}

impl SyntaxElement for LoopValue {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let Some(capture) = result.regexes.first() else {
            return false;
        };
        let text = capture.text.trim().to_lowercase();
        if text.contains(char::is_whitespace) {
            return false;
        }
        let (name, number) = Self::split_number(&text);
        let types = state.types();
        let part = match name {
            "value" => LoopPart::Value,
            "index" => LoopPart::Index,
            other => match types.lookup(other) {
                Some((class, false)) => LoopPart::Typed(class.code_name().to_string()),
                _ => return false,
            },
        };

        let loops = state.loops();
        let matching: Vec<_> = loops
            .iter()
            .filter_map(|l| l.expr.as_ref().map(|expr| (l.key, expr)))
            .filter(|(_, expr)| match &part {
                LoopPart::Value | LoopPart::Index => true,
                LoopPart::Typed(type_name) => types.can_convert(expr.return_type(), type_name),
            })
            .collect();
        let chosen = match number {
            Some(n) => n.checked_sub(1).and_then(|i| matching.get(i)),
            None => matching.last(),
        };
        let Some((key, expr)) = chosen else {
            state
                .logger()
                .error(format!("There's no loop that matches 'loop-{text}'"));
            return false;
        };

        self.type_name = match &part {
            LoopPart::Value => expr.return_type().to_string(),
            LoopPart::Index => "string".to_string(),
            LoopPart::Typed(type_name) => type_name.clone(),
        };
        self.key = Some(*key);
        self.part = part;
        self.name = text;
        self.types = Some(Arc::clone(types));
        true
    }
}

impl Expression for LoopValue {
    fn return_type(&self) -> &str {
        &self.type_name
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        let Some((index, value)) = self.key.and_then(|key| event.loop_item(key)) else {
            return Ok(Vec::new());
        };
        let value = match &self.part {
            LoopPart::Value => Some(value),
            LoopPart::Index => index.map(Value::Text),
            LoopPart::Typed(type_name) => self
                .types
                .as_ref()
                .and_then(|types| types.convert(&value, type_name)),
        };
        Ok(value.into_iter().collect())
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        if let Some(event) = event {
            if let Ok(values) = self.get_all(event) {
                if let Some(value) = values.first() {
                    return value.as_text();
                }
            }
        }
        if debug {
            format!("loop-{} (as {})", self.name, self.type_name)
        } else {
            format!("loop-{}", self.name)
        }
    }
}

/// `1st`, `2nd`, `3rd`, `11th`.
fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// An argument of the command being run, read from the `arg-<n>` event
/// value the command fills in.
#[derive(Default)]
struct Argument {
    value: EventValueExpression,
    index: usize,
}

impl SyntaxElement for Argument {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        matched_pattern: usize,
        delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let logger = state.logger();
        let Some(current) = state.current_event().filter(|e| e.name == COMMAND_EVENT) else {
            logger.error("The expression 'argument' can only be used within a command");
            return false;
        };
        let count = current
            .values
            .iter()
            .filter(|(key, _)| key.starts_with("arg-"))
            .count();
        let index = match matched_pattern {
            0 => count,
            1 | 2 => match result.regexes.first().map(|r| r.text.parse::<usize>()) {
                Some(Ok(n)) => n,
                _ => return false,
            },
            _ if count > 1 => {
                logger.error(
                    "'argument' cannot be used if the command has multiple arguments. \
                     Use 'argument 1', 'argument 2', etc. instead",
                );
                return false;
            }
            _ => 1,
        };
        if count == 0 {
            logger.error("This command doesn't have any arguments");
            return false;
        }
        if index == 0 || index > count {
            logger.error(format!(
                "The command doesn't have a {} argument",
                ordinal(index)
            ));
            return false;
        }
        self.index = index;
        self.value = EventValueExpression::new(&CommandArgument::key(index));
        self.value.init(exprs, matched_pattern, delayed, result, state)
    }
}

impl Expression for Argument {
    fn return_type(&self) -> &str {
        self.value.return_type()
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        self.value.get_all(event)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        match event {
            Some(event) => self.value.describe(Some(event), debug),
            None => format!("argument {}", self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::Harness;

    #[test]
    fn test_arithmetic() {
        let harness = Harness::new();
        harness.run(
            "\
on load:
    broadcast 1 + 2
    broadcast 10 - 4
    broadcast 3 * 4
    broadcast 1 / 4
    set {_x} to 7
    broadcast {_x} * 2
",
            "load",
        );
        assert_eq!(harness.messages(), ["3", "6", "12", "0.25", "14"]);
    }

    #[test]
    fn test_loop_parts() {
        let harness = Harness::new();
        harness.run(
            "\
on load:
    set {_list::a} to \"x\"
    set {_list::b} to \"y\"
    loop {_list::*}:
        broadcast \"%loop-index%=%loop-value%\"
    loop 1 and 2:
        loop 10 and 20:
            broadcast loop-number-1 + loop-value
    broadcast size of {_list::*}
",
            "load",
        );
        assert_eq!(
            harness.messages(),
            ["a=x", "b=y", "11", "21", "12", "22", "2"]
        );
    }

    #[test]
    fn test_unknown_loop() {
        let harness = Harness::new();
        let diagnostics = harness.load_errors("on load:\n    broadcast loop-value\n");
        assert!(
            diagnostics.contains("There's no loop that matches 'loop-value'"),
            "{diagnostics}"
        );
    }

    #[test]
    fn test_event_values() {
        let harness = Harness::new();
        harness.load(
            "\
on chat:
    broadcast \"<%player%> %message%\"
    broadcast event-message
",
        );
        let event = harness
            .host
            .new_event("chat")
            .with_value("player", skript_lang::Value::object("player", "Notch"))
            .with_value("message", skript_lang::Value::text("hello"));
        harness.host.fire(&std::sync::Arc::new(event));
        assert_eq!(harness.messages(), ["<Notch> hello", "hello"]);

        let diagnostics = harness.load_errors("on load:\n    broadcast player\n");
        assert!(
            diagnostics.contains("There's no player in a script load event"),
            "{diagnostics}"
        );
    }
}
