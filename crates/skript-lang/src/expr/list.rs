use std::sync::Arc;

use crate::error::RuntimeResult;
use crate::event::Event;
use crate::expr::{ChangeMode, ExprRef, Expression, ValueIter};
use crate::types::{OBJECT, TypeRegistry, join_with};
use crate::value::Value;

/// `a, b and c` or `a or b`.
///
/// An "and" list stands for all of its members' values. An "or" list stands
/// for the values of one member: the first one that has any, so results are
/// reproducible. A list is single only if it is an "or" list of single
/// members.
pub struct ExpressionList {
    exprs: Vec<ExprRef>,
    and: bool,
    single: bool,
    return_type: String,
}

impl ExpressionList {
    pub fn new(exprs: Vec<ExprRef>, and: bool, types: &TypeRegistry) -> Self {
        let single = !and && exprs.iter().all(|e| e.is_single());
        let return_type = common_supertype(&exprs, types);
        Self {
            exprs,
            and,
            single,
            return_type,
        }
    }

    pub fn expressions(&self) -> &[ExprRef] {
        &self.exprs
    }

    /// Whether every member is a literal.
    pub fn is_literal_list(&self) -> bool {
        self.exprs.iter().all(|e| e.is_literal())
    }
}

/// The most specific type every member is assignable to.
fn common_supertype(exprs: &[ExprRef], types: &TypeRegistry) -> String {
    let Some(first) = exprs.first() else {
        return OBJECT.to_string();
    };
    let mut candidate = Some(first.return_type().to_string());
    while let Some(name) = candidate {
        if exprs.iter().all(|e| types.is_assignable(e.return_type(), &name)) {
            return name;
        }
        candidate = types
            .get(&name)
            .and_then(|c| c.supertype_name())
            .map(str::to_string);
    }
    OBJECT.to_string()
}

impl Expression for ExpressionList {
    fn return_type(&self) -> &str {
        &self.return_type
    }

    fn is_single(&self) -> bool {
        self.single
    }

    fn get_and(&self) -> bool {
        self.and
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        let mut values = Vec::new();
        for expr in &self.exprs {
            values.extend(expr.get_all(event)?);
        }
        Ok(values)
    }

    fn get_array(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        if self.and {
            let mut values = Vec::new();
            for expr in &self.exprs {
                values.extend(expr.get_array(event)?);
            }
            return Ok(values);
        }
        for expr in &self.exprs {
            let values = expr.get_array(event)?;
            if !values.is_empty() {
                return Ok(values);
            }
        }
        Ok(Vec::new())
    }

    fn get_single(&self, event: &Event) -> RuntimeResult<Option<Value>> {
        for expr in &self.exprs {
            if let Some(value) = expr.get_single(event)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn iter(&self, event: &Event) -> RuntimeResult<ValueIter> {
        if !self.and {
            return Ok(Box::new(self.get_array(event)?.into_iter()));
        }
        let mut parts = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            parts.push(expr.iter(event)?);
        }
        Ok(Box::new(parts.into_iter().flatten()))
    }

    fn check(
        &self,
        event: &Event,
        checker: &dyn Fn(&Value) -> bool,
        negated: bool,
    ) -> RuntimeResult<bool> {
        let mut result = self.and;
        for expr in &self.exprs {
            let passed = expr.check(event, checker, false)?;
            if self.and && !passed {
                result = false;
                break;
            }
            if !self.and && passed {
                result = true;
                break;
            }
        }
        Ok(negated ^ result)
    }

    fn is_literal(&self) -> bool {
        self.is_literal_list()
    }

    fn literal_values(&self) -> Option<Vec<Value>> {
        let mut values = Vec::new();
        for expr in &self.exprs {
            values.extend(expr.literal_values()?);
        }
        Some(values)
    }

    fn accept_change(&self, mode: ChangeMode) -> Option<Vec<String>> {
        let mut accepted: Option<Vec<String>> = None;
        for expr in &self.exprs {
            let types = expr.accept_change(mode)?;
            accepted = Some(match accepted {
                None => types,
                Some(prev) => prev.into_iter().filter(|t| types.contains(t)).collect(),
            });
        }
        accepted
    }

    fn change(
        &self,
        event: &Event,
        delta: Option<&[Value]>,
        mode: ChangeMode,
    ) -> RuntimeResult<()> {
        for expr in &self.exprs {
            expr.change(event, delta, mode)?;
        }
        Ok(())
    }

    fn get_converted(self: Arc<Self>, to: &[&str], types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        let exprs = self
            .exprs
            .iter()
            .map(|e| Arc::clone(e).get_converted(to, types))
            .collect::<Option<Vec<_>>>()?;
        Some(Arc::new(Self::new(exprs, self.and, types)))
    }

    fn as_list(&self) -> Option<&ExpressionList> {
        Some(self)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let parts: Vec<String> = self
            .exprs
            .iter()
            .map(|e| e.describe(event, debug))
            .collect();
        let joined = join_with(&parts, if self.and { "and" } else { "or" });
        if debug { format!("({joined})") } else { joined }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Literal;

    fn list(values: &[f64], and: bool) -> ExpressionList {
        let types = TypeRegistry::new();
        let exprs = values
            .iter()
            .map(|&n| Arc::new(Literal::new(Value::Number(n))) as ExprRef)
            .collect();
        ExpressionList::new(exprs, and, &types)
    }

    #[test]
    fn test_single_only_for_or() {
        assert!(!list(&[1.0, 2.0], true).is_single());
        assert!(list(&[1.0, 2.0], false).is_single());
    }

    #[test]
    fn test_or_array_takes_first() {
        let event = Event::new("test");
        let or = list(&[1.0, 2.0], false);
        assert_eq!(or.get_array(&event).unwrap(), vec![Value::Number(1.0)]);
        assert_eq!(or.get_all(&event).unwrap().len(), 2);
    }

    #[test]
    fn test_and_or_check_de_morgan() {
        let event = Event::new("test");
        let positive = |v: &Value| v.as_number() > 0.0;
        let and = list(&[1.0, -1.0], true);
        let or = list(&[1.0, -1.0], false);
        assert!(!and.check(&event, &positive, false).unwrap());
        assert!(and.check(&event, &positive, true).unwrap());
        assert!(or.check(&event, &positive, false).unwrap());
        assert!(!or.check(&event, &positive, true).unwrap());
    }

    #[test]
    fn test_lazy_iteration_keeps_order() {
        let event = Event::new("test");
        let and = list(&[3.0, 1.0, 2.0], true);
        let values: Vec<f64> = and.iter(&event).unwrap().map(|v| v.as_number()).collect();
        assert_eq!(values, vec![3.0, 1.0, 2.0]);
        assert_eq!(and.describe(None, false), "3, 1 and 2");
    }
}
