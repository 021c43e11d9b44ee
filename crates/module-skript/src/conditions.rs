//! Conditions.

use std::cmp::Ordering;
use std::sync::Arc;

use skript_lang::expr::{UnparsedLiteral, check_values};
use skript_lang::value::Value;
use skript_lang::{
    Condition, Event, ExprRef, Kleenean, OBJECT, ParseResult, ParserState, RegistryBuilder,
    RuntimeResult, SyntaxElement, TypeRegistry,
};

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .condition::<IsSet>(&["%objects% (is|are) [1¦not] set"])
        .condition::<CompareNumbers>(&[
            "%numbers% (is|are) [1¦not] (greater|more|2¦less) than [4¦or equal to] %numbers%",
        ])
        .condition::<Compare>(&[
            "%objects% (is|are) [1¦not] equal to %objects%",
            "%objects% (is|are) [1¦not] %objects%",
            "%objects% (1¦isn't|1¦aren't) %objects%",
        ])
        .condition::<BooleanCondition>(&["%booleans%"]);
}

fn is_unparsed(expr: &ExprRef) -> bool {
    expr.as_any().downcast_ref::<UnparsedLiteral>().is_some()
}

/// Give an unparsed side the type of the other side. `None` if a side can't
/// be read as anything.
fn resolve_sides(left: ExprRef, right: ExprRef, types: &Arc<TypeRegistry>) -> Option<(ExprRef, ExprRef)> {
    match (is_unparsed(&left), is_unparsed(&right)) {
        (false, false) => Some((left, right)),
        (true, false) => {
            let to = right.return_type().to_string();
            Some((left.get_converted(&[to.as_str()], types)?, right))
        }
        (false, true) => {
            let to = left.return_type().to_string();
            Some((left, right.get_converted(&[to.as_str()], types)?))
        }
        (true, true) => Some((
            left.get_converted(&[OBJECT], types)?,
            right.get_converted(&[OBJECT], types)?,
        )),
    }
}

/// `left` against the values of `right`. Both sides keep their and/or: `x is
/// 1 or 2` passes when `x` is either.
fn relate(
    left: &ExprRef,
    right: &ExprRef,
    event: &Event,
    negated: bool,
    relation: impl Fn(&Value, &Value) -> bool,
) -> RuntimeResult<bool> {
    let right_values = right.get_all(event)?;
    let right_and = right.get_and();
    left.check(
        event,
        &|l| check_values(&right_values, &|r| relation(l, r), false, right_and),
        negated,
    )
}

#[derive(Default)]
struct Compare {
    left: Option<ExprRef>,
    right: Option<ExprRef>,
    negated: bool,
}

impl SyntaxElement for Compare {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let (Some(left), Some(right)) = (exprs[0].clone(), exprs[1].clone()) else {
            return false;
        };
        let Some((left, right)) = resolve_sides(left, right, state.types()) else {
            return false;
        };
        self.left = Some(left);
        self.right = Some(right);
        self.negated = result.mark & 1 == 1;
        true
    }
}

impl Condition for Compare {
    fn check(&self, event: &Event) -> RuntimeResult<bool> {
        let (Some(left), Some(right)) = (&self.left, &self.right) else {
            return Ok(false);
        };
        relate(left, right, event, self.negated, Value::equals)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let side = |e: &Option<ExprRef>| e.as_ref().map(|e| e.describe(event, debug)).unwrap_or_default();
        let verb = if self.negated { "is not" } else { "is" };
        format!("{} {verb} {}", side(&self.left), side(&self.right))
    }
}

#[derive(Default)]
struct CompareNumbers {
    left: Option<ExprRef>,
    right: Option<ExprRef>,
    negated: bool,
    less: bool,
    or_equal: bool,
}

impl SyntaxElement for CompareNumbers {
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
        self.negated = result.mark & 1 != 0;
        self.less = result.mark & 2 != 0;
        self.or_equal = result.mark & 4 != 0;
        self.left.is_some() && self.right.is_some()
    }
}

impl Condition for CompareNumbers {
    fn check(&self, event: &Event) -> RuntimeResult<bool> {
        let (Some(left), Some(right)) = (&self.left, &self.right) else {
            return Ok(false);
        };
        let wanted = if self.less {
            Ordering::Less
        } else {
            Ordering::Greater
        };
        let or_equal = self.or_equal;
        relate(left, right, event, self.negated, |l, r| {
            l.compare(r)
                .is_some_and(|o| o == wanted || (or_equal && o == Ordering::Equal))
        })
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let side = |e: &Option<ExprRef>| e.as_ref().map(|e| e.describe(event, debug)).unwrap_or_default();
        format!(
            "{} is {}{} than {}{}",
            side(&self.left),
            if self.negated { "not " } else { "" },
            if self.less { "less" } else { "greater" },
            if self.or_equal { "or equal to " } else { "" },
            side(&self.right)
        )
    }
}

#[derive(Default)]
struct IsSet {
    values: Option<ExprRef>,
    negated: bool,
}

impl SyntaxElement for IsSet {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.values.clone_from(&exprs[0]);
        self.negated = result.mark & 1 == 1;
        self.values.as_ref().is_some_and(|v| !v.is_literal())
    }
}

impl Condition for IsSet {
    fn check(&self, event: &Event) -> RuntimeResult<bool> {
        let set = match &self.values {
            Some(values) => !values.get_array(event)?.is_empty(),
            None => false,
        };
        Ok(set != self.negated)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let values = self.values.as_ref().map(|v| v.describe(event, debug));
        let verb = if self.negated { "is not" } else { "is" };
        format!("{} {verb} set", values.unwrap_or_default())
    }
}

/// A boolean expression used as a condition, e.g. `{flag}`.
#[derive(Default)]
struct BooleanCondition {
    value: Option<ExprRef>,
}

impl SyntaxElement for BooleanCondition {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.value.clone_from(&exprs[0]);
        self.value.is_some()
    }
}

impl Condition for BooleanCondition {
    fn check(&self, event: &Event) -> RuntimeResult<bool> {
        let Some(value) = &self.value else {
            return Ok(false);
        };
        value.check(event, &Value::as_boolean, false)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        self.value
            .as_ref()
            .map(|v| v.describe(event, debug))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::Harness;

    #[test]
    fn test_comparisons() {
        let harness = Harness::new();
        harness.run(
            "\
on load:
    set {_n} to 5
    if {_n} is 5:
        broadcast \"equal\"
    if {_n} is not 6:
        broadcast \"not equal\"
    if {_n} isn't 5:
        broadcast \"wrong\"
    if {_n} is greater than 3:
        broadcast \"greater\"
    if {_n} is less than or equal to 5:
        broadcast \"at most\"
    if {_n} is not less than 7:
        broadcast \"wrong\"
    if \"Hello\" is \"hello\":
        broadcast \"case\"
    if {_n} is 1 or 5:
        broadcast \"either\"
",
            "load",
        );
        assert_eq!(
            harness.messages(),
            ["equal", "not equal", "greater", "at most", "case", "either"]
        );
    }

    #[test]
    fn test_is_set_and_booleans() {
        let harness = Harness::new();
        harness.run(
            "\
on load:
    {_missing} is not set
    broadcast \"a\"
    set {_flag} to true
    if {_flag}:
        broadcast \"b\"
    if {_flag} is set:
        broadcast \"c\"
    if false:
        broadcast \"wrong\"
    {_flag} is not set
    broadcast \"unreachable\"
",
            "load",
        );
        assert_eq!(harness.messages(), ["a", "b", "c"]);
    }
}
