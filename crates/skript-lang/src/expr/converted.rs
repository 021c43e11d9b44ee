use std::sync::Arc;

use crate::error::RuntimeResult;
use crate::event::Event;
use crate::expr::{ExprRef, Expression};
use crate::types::TypeRegistry;
use crate::value::Value;

/// Wraps an expression and converts each of its values on the way out.
///
/// Values that fail to convert are dropped, so a converted single
/// expression may produce nothing.
pub struct ConvertedExpression {
    source: ExprRef,
    to: String,
    types: Arc<TypeRegistry>,
}

impl ConvertedExpression {
    /// Wrap `source` so it produces the first of `to` it can be converted to.
    pub fn wrap(source: ExprRef, to: &[&str], types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        let from = source.return_type();
        if to.iter().any(|t| types.is_assignable(from, t)) {
            return Some(source);
        }
        let target = to.iter().find(|t| types.can_convert(from, t))?;
        Some(Arc::new(Self {
            source,
            to: (*target).to_string(),
            types: Arc::clone(types),
        }))
    }

    pub fn source(&self) -> &ExprRef {
        &self.source
    }

    fn convert(&self, values: Vec<Value>) -> Vec<Value> {
        values
            .iter()
            .filter_map(|v| self.types.convert(v, &self.to))
            .collect()
    }
}

impl Expression for ConvertedExpression {
    fn return_type(&self) -> &str {
        &self.to
    }

    fn is_single(&self) -> bool {
        self.source.is_single()
    }

    fn get_and(&self) -> bool {
        self.source.get_and()
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(self.convert(self.source.get_all(event)?))
    }

    fn get_array(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(self.convert(self.source.get_array(event)?))
    }

    fn is_literal(&self) -> bool {
        self.source.is_literal()
    }

    fn literal_values(&self) -> Option<Vec<Value>> {
        self.source.literal_values().map(|v| self.convert(v))
    }

    fn time(&self) -> i32 {
        self.source.time()
    }

    fn get_converted(self: Arc<Self>, to: &[&str], types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        if to.iter().any(|t| types.is_assignable(&self.to, t)) {
            return Some(self);
        }
        ConvertedExpression::wrap(Arc::clone(&self.source), to, types)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        if debug {
            format!("({} >> {})", self.source.describe(event, true), self.to)
        } else {
            self.source.describe(event, false)
        }
    }
}
