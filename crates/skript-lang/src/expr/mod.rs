//! Expressions: everything a placeholder can be bound to.
//!
//! An [`Expression`] produces zero or more [`Value`]s for an event. Most are
//! built by the resolver ([`crate::SkriptParser`]) from script text; syntax
//! elements receive them already parsed in their `init`.

mod converted;
mod event_value;
mod function_call;
mod list;
mod literal;
mod string;
mod variable;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub use converted::ConvertedExpression;
pub use event_value::{EventValueDefault, EventValueExpression};
pub use function_call::FunctionCall;
pub use list::ExpressionList;
pub use literal::{Literal, UnparsedLiteral};
pub use string::{StringMode, VariableString, next_variable_bracket};
pub use variable::{Variable, is_valid_variable_name};

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::{Event, IndexedIter};
use crate::types::TypeRegistry;
use crate::value::Value;

/// Shared handle to a parsed expression.
pub type ExprRef = Arc<dyn Expression>;

/// Values produced lazily by [`Expression::iter`].
pub type ValueIter = Box<dyn Iterator<Item = Value> + Send>;

/// How an expression is changed by `set`, `add`, `remove`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeMode {
    Set,
    Add,
    Remove,
    RemoveAll,
    Delete,
    Reset,
}

impl ChangeMode {
    /// Whether the mode takes values to change by.
    pub const fn takes_delta(self) -> bool {
        !matches!(self, Self::Delete | Self::Reset)
    }
}

impl fmt::Display for ChangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "set",
            Self::Add => "added to",
            Self::Remove => "removed from",
            Self::RemoveAll => "all removed from",
            Self::Delete => "deleted",
            Self::Reset => "reset",
        })
    }
}

/// Object-safe helpers implemented for every sized [`Expression`].
pub trait ExpressionExt {
    fn into_expr_ref(self: Arc<Self>) -> ExprRef;

    fn into_boxed_ref(self: Box<Self>) -> ExprRef;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Expression + 'static> ExpressionExt for T {
    fn into_expr_ref(self: Arc<Self>) -> ExprRef {
        self
    }

    fn into_boxed_ref(self: Box<Self>) -> ExprRef {
        let expr: Box<dyn Expression> = self;
        Arc::from(expr)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub trait Expression: ExpressionExt + Send + Sync {
    /// Code name of the type every produced value belongs to.
    fn return_type(&self) -> &str;

    fn is_single(&self) -> bool;

    /// `false` for "a or b" lists.
    fn get_and(&self) -> bool {
        true
    }

    /// Every value, regardless of `and`/`or`.
    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>>;

    /// The values this expression stands for. An "or" list picks one of its
    /// members here.
    fn get_array(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        self.get_all(event)
    }

    fn get_single(&self, event: &Event) -> RuntimeResult<Option<Value>> {
        Ok(self.get_array(event)?.into_iter().next())
    }

    fn iter(&self, event: &Event) -> RuntimeResult<ValueIter> {
        Ok(Box::new(self.get_array(event)?.into_iter()))
    }

    /// Values with their list index, for expressions that have one.
    fn iter_indexed(&self, _event: &Event) -> RuntimeResult<Option<IndexedIter>> {
        Ok(None)
    }

    /// Test the values against `checker`, combined with this expression's
    /// `and`. An expression without values never passes, negated or not.
    fn check(
        &self,
        event: &Event,
        checker: &dyn Fn(&Value) -> bool,
        negated: bool,
    ) -> RuntimeResult<bool> {
        Ok(check_values(&self.get_array(event)?, checker, negated, self.get_and()))
    }

    fn is_literal(&self) -> bool {
        false
    }

    /// Constant values, if this is a literal.
    fn literal_values(&self) -> Option<Vec<Value>> {
        None
    }

    /// Switch to the past (`-1`) or future (`1`) state of the value.
    fn set_time(&mut self, time: i32) -> bool {
        time == 0
    }

    fn time(&self) -> i32 {
        0
    }

    /// Types a delta may have for `mode`, or `None` if the mode is not
    /// supported.
    fn accept_change(&self, _mode: ChangeMode) -> Option<Vec<String>> {
        None
    }

    fn change(
        &self,
        _event: &Event,
        _delta: Option<&[Value]>,
        mode: ChangeMode,
    ) -> RuntimeResult<()> {
        Err(RuntimeError::UnsupportedChange(format!(
            "{} cannot be {mode}",
            self.describe(None, false)
        )))
    }

    /// This expression with values converted to one of `to`, or `None` if
    /// no conversion exists.
    fn get_converted(self: Arc<Self>, to: &[&str], types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        ConvertedExpression::wrap(self.into_expr_ref(), to, types)
    }

    /// The members, if this is a list.
    fn as_list(&self) -> Option<&ExpressionList> {
        None
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String;
}

impl fmt::Display for dyn Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(None, false))
    }
}

impl fmt::Debug for dyn Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(None, true))
    }
}

/// Combine `checker` over `values` with and/or semantics.
///
/// Short-circuits on the first value that decides the outcome. Empty input
/// is always `false`, even when negated.
pub fn check_values(
    values: &[Value],
    checker: &dyn Fn(&Value) -> bool,
    negated: bool,
    and: bool,
) -> bool {
    if values.is_empty() {
        return false;
    }
    for value in values {
        let passed = checker(value);
        if and && !passed {
            return negated;
        }
        if !and && passed {
            return !negated;
        }
    }
    negated ^ and
}

/// Evaluate each expression to its array.
pub fn eval_all(exprs: &[ExprRef], event: &Event) -> RuntimeResult<Vec<Vec<Value>>> {
    exprs.iter().map(|e| e.get_array(event)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive(v: &Value) -> bool {
        v.as_number() > 0.0
    }

    #[test]
    fn test_check_and_or() {
        let mixed = [Value::Number(1.0), Value::Number(-1.0)];
        assert!(!check_values(&mixed, &positive, false, true));
        assert!(check_values(&mixed, &positive, false, false));
        assert!(check_values(&mixed, &positive, true, true));
        assert!(!check_values(&mixed, &positive, true, false));
    }

    #[test]
    fn test_check_empty_is_false() {
        assert!(!check_values(&[], &positive, false, true));
        assert!(!check_values(&[], &positive, true, true));
    }
}
