use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::{Event, IndexedIter};
use crate::expr::{ChangeMode, ExprRef, Expression, StringMode, ValueIter, VariableString};
use crate::parser::ParserState;
use crate::types::{OBJECT, TypeRegistry};
use crate::value::Value;
use crate::variables::{LIST_SUFFIX, LOCAL_PREFIX, SEPARATOR, Variables};

/// Check a variable name (without braces), printing errors and warnings.
pub fn is_valid_variable_name(name: &str, allow_list: bool, state: &ParserState) -> bool {
    let name = name.strip_prefix(LOCAL_PREFIX).unwrap_or(name).trim();
    let logger = state.logger();
    if !allow_list && name.contains(SEPARATOR) {
        logger.error(format!(
            "List variables are not allowed here (error in variable {{{name}}})"
        ));
        return false;
    }
    if name.starts_with(SEPARATOR) || name.ends_with(SEPARATOR) {
        logger.error(format!(
            "A variable's name must neither start nor end with the separator '{SEPARATOR}' (error in variable {{{name}}})"
        ));
        return false;
    }
    if let Some(star) = name.find('*') {
        if !allow_list || star != name.len() - 1 || !name.ends_with(LIST_SUFFIX) {
            if star == 0 {
                logger.error(format!(
                    "Local variables start with an underscore, e.g. {{_local variable}}. The asterisk is reserved for list variables. (error in variable {{{name}}})"
                ));
            } else {
                logger.error(format!(
                    "A variable's name must not contain any asterisks except at the end after '{SEPARATOR}' to denote a list variable, e.g. {{variable{SEPARATOR}*}} (error in variable {{{name}}})"
                ));
            }
            return false;
        }
    }
    if name.contains(&SEPARATOR.repeat(2)) {
        logger.error(format!(
            "A variable's name must not contain the separator '{SEPARATOR}' multiple times in a row (error in variable {{{name}}})"
        ));
        return false;
    }
    if name.replace(SEPARATOR, "").contains(':') {
        logger.warning(format!(
            "If you meant to make the variable {{{name}}} a list, its name should contain '{SEPARATOR}'. Having a single ':' does nothing!"
        ));
    } else if name.contains(SEPARATOR) && !name.ends_with(LIST_SUFFIX) && !name.contains('%') {
        logger.warning(format!(
            "The variable {{{name}}} is a single value inside a list, not a list itself. Use {{{}{LIST_SUFFIX}}} to refer to the whole list.",
            name.split(SEPARATOR).next().unwrap_or(name)
        ));
    }
    true
}

/// A reference to a named slot in a variable store.
///
/// Local variables (`{_x}`) live on the event; others in the shared global
/// store. List variables (`{x::*}`) stand for all values below the name.
pub struct Variable {
    name: Arc<VariableString>,
    local: bool,
    list: bool,
    types: Vec<String>,
    globals: Arc<Variables>,
    registry: Arc<TypeRegistry>,
}

impl Variable {
    /// Build a variable from the text between its braces.
    pub fn new_instance(name: &str, types: &[&str], state: &ParserState) -> Option<Self> {
        let name = name.trim();
        if !is_valid_variable_name(name, true, state) {
            return None;
        }
        let local = name.starts_with(LOCAL_PREFIX);
        let bare = name.strip_prefix(LOCAL_PREFIX).unwrap_or(name).trim();
        let string = VariableString::new_instance(bare, StringMode::VariableName, state)?;
        Some(Self {
            name: Arc::new(string),
            local,
            list: name.ends_with(LIST_SUFFIX),
            types: types.iter().map(|t| (*t).to_string()).collect(),
            globals: Arc::clone(&state.env().globals),
            registry: Arc::clone(state.types()),
        })
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_list(&self) -> bool {
        self.list
    }

    /// The evaluated, lowercased name. `None` when an expression in the
    /// name turned a single variable into a list name or vice versa.
    pub fn evaluated_name(&self, event: &Event) -> RuntimeResult<Option<String>> {
        let name = self.name.render(event)?.to_lowercase();
        Ok((name.ends_with(LIST_SUFFIX) == self.list).then_some(name))
    }

    fn store<'a>(&'a self, event: &'a Event) -> &'a Variables {
        if self.local { event.locals() } else { &self.globals }
    }

    fn store_handle(&self, event: &Event) -> Arc<Variables> {
        if self.local {
            event.locals_handle()
        } else {
            Arc::clone(&self.globals)
        }
    }

    fn convert(&self, value: &Value) -> Option<Value> {
        let types: Vec<&str> = self.types.iter().map(String::as_str).collect();
        self.registry.convert_any(value, &types)
    }

    /// The raw stored value(s), before conversion.
    pub fn get_raw(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        let Some(name) = self.evaluated_name(event)? else {
            return Ok(Vec::new());
        };
        let store = self.store(event);
        Ok(if self.list {
            store.list(&name).into_iter().map(|(_, v)| v).collect()
        } else {
            store.get(&name).into_iter().collect()
        })
    }

    /// Remove one `value` per delta entry (or every match with `all`).
    fn remove(&self, event: &Event, name: &str, delta: &[Value], all: bool) {
        self.store(event).remove_from_list(name, delta, all);
    }

    fn add_to_single(&self, event: &Event, name: &str, delta: &[Value], mode: ChangeMode) -> RuntimeResult<()> {
        let mut result = Ok(());
        self.store(event).update(name, |current| {
            let mut value = current.cloned();
            for d in delta {
                let base = match &value {
                    Some(v) => v.clone(),
                    None => match d.zero_like() {
                        Some(zero) => zero,
                        None => {
                            result = Err(RuntimeError::UnsupportedChange(format!(
                                "{} cannot be {mode} {}",
                                d.as_text(),
                                self.describe(None, false)
                            )));
                            return current.cloned();
                        }
                    },
                };
                let next = if mode == ChangeMode::Add {
                    base.add(d)
                } else {
                    base.subtract(d)
                };
                match next {
                    Some(next) => value = Some(next),
                    None => {
                        result = Err(RuntimeError::UnsupportedChange(format!(
                            "{} cannot be {mode} {}",
                            d.as_text(),
                            self.describe(None, false)
                        )));
                        return current.cloned();
                    }
                }
            }
            value
        });
        result
    }
}

impl Expression for Variable {
    fn return_type(&self) -> &str {
        match self.types.as_slice() {
            [only] => only,
            _ => OBJECT,
        }
    }

    fn is_single(&self) -> bool {
        !self.list
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(self
            .get_raw(event)?
            .iter()
            .filter_map(|v| self.convert(v))
            .collect())
    }

    fn iter(&self, event: &Event) -> RuntimeResult<ValueIter> {
        match self.iter_indexed(event)? {
            Some(items) => Ok(Box::new(items.map(|(_, v)| v))),
            None => Ok(Box::new(self.get_all(event)?.into_iter())),
        }
    }

    /// Keys are snapshotted up front; each value is read when reached, and
    /// entries deleted in the meantime are skipped.
    fn iter_indexed(&self, event: &Event) -> RuntimeResult<Option<IndexedIter>> {
        if !self.list {
            return Ok(None);
        }
        let Some(name) = self.evaluated_name(event)? else {
            return Ok(Some(Box::new(std::iter::empty())));
        };
        let store = self.store_handle(event);
        let keys = store.keys(&name);
        let prefix = name
            .strip_suffix('*')
            .unwrap_or(&name)
            .to_string();
        let registry = Arc::clone(&self.registry);
        let types = self.types.clone();
        Ok(Some(Box::new(keys.into_iter().filter_map(move |key| {
            let value = store.get(&format!("{prefix}{key}"))?;
            let types: Vec<&str> = types.iter().map(String::as_str).collect();
            registry.convert_any(&value, &types).map(|v| (Some(key), v))
        }))))
    }

    fn accept_change(&self, mode: ChangeMode) -> Option<Vec<String>> {
        match mode {
            ChangeMode::Add | ChangeMode::Remove if !self.list => {
                Some(vec!["number".to_string(), "timespan".to_string()])
            }
            ChangeMode::RemoveAll if !self.list => None,
            _ => Some(vec![OBJECT.to_string()]),
        }
    }

    fn change(
        &self,
        event: &Event,
        delta: Option<&[Value]>,
        mode: ChangeMode,
    ) -> RuntimeResult<()> {
        let Some(name) = self.evaluated_name(event)? else {
            return Ok(());
        };
        let delta = delta.unwrap_or_default();
        let store = self.store(event);
        match mode {
            ChangeMode::Delete | ChangeMode::Reset if self.list => store.clear_list(&name),
            ChangeMode::Delete | ChangeMode::Reset => store.set(&name, None),
            ChangeMode::Set if self.list => store.set_list(&name, delta),
            ChangeMode::Set => store.set(&name, delta.first().cloned()),
            ChangeMode::Add if self.list => store.append_list(&name, delta),
            ChangeMode::Remove if self.list => self.remove(event, &name, delta, false),
            ChangeMode::RemoveAll if self.list => self.remove(event, &name, delta, true),
            ChangeMode::Add | ChangeMode::Remove => {
                self.add_to_single(event, &name, delta, mode)?;
            }
            ChangeMode::RemoveAll => {
                return Err(RuntimeError::UnsupportedChange(self.describe(None, false)));
            }
        }
        Ok(())
    }

    /// Variables convert lazily: the stored values are converted when read.
    fn get_converted(self: Arc<Self>, to: &[&str], _types: &Arc<TypeRegistry>) -> Option<ExprRef> {
        Some(Arc::new(Self {
            name: Arc::clone(&self.name),
            local: self.local,
            list: self.list,
            types: to.iter().map(|t| (*t).to_string()).collect(),
            globals: Arc::clone(&self.globals),
            registry: Arc::clone(&self.registry),
        }))
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        if let Some(event) = event {
            if let Ok(values) = self.get_all(event) {
                let parts: Vec<String> = values.iter().map(Value::as_text).collect();
                return if parts.is_empty() {
                    "<none>".to_string()
                } else {
                    parts.join(", ")
                };
            }
        }
        let quoted = self.name.describe(None, debug);
        let inner = quoted
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&quoted);
        let local = if self.local { "_" } else { "" };
        if debug {
            format!("{{{local}{inner}}}(as {})", self.return_type())
        } else {
            format!("{{{local}{inner}}}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Diagnostics;
    use crate::test_support;

    fn check(name: &str) -> (Option<Variable>, Diagnostics) {
        let env = test_support::env();
        let state = ParserState::new(&env, "test.sk");
        let variable = Variable::new_instance(name, &[OBJECT], &state);
        (variable, state.logger().take_diagnostics())
    }

    fn rejected_with(name: &str, message: &str) {
        let (variable, diagnostics) = check(name);
        assert!(variable.is_none(), "{{{name}}} was accepted");
        let errors: Vec<&str> = diagnostics.errors().map(|e| e.message.as_str()).collect();
        assert!(
            errors.iter().any(|e| e.contains(message)),
            "{{{name}}}: {errors:?}"
        );
    }

    #[test]
    fn test_invalid_names() {
        rejected_with("a::*::b", "must not contain any asterisks except at the end");
        rejected_with("*", "Local variables start with an underscore");
        rejected_with("::a", "must neither start nor end with the separator");
        rejected_with("a::", "must neither start nor end with the separator");
        rejected_with("a::::b", "multiple times in a row");
    }

    #[test]
    fn test_list_names() {
        let (variable, diagnostics) = check("list::*");
        let variable = variable.unwrap();
        assert!(variable.is_list());
        assert!(!variable.is_single());
        assert!(diagnostics.is_empty(), "{}", diagnostics.render());

        let (variable, _) = check("_scores::*");
        let variable = variable.unwrap();
        assert!(variable.is_local());
        assert!(variable.is_list());
    }

    #[test]
    fn test_suspicious_names_warn() {
        let (variable, diagnostics) = check("a::b");
        assert!(variable.is_some_and(|v| !v.is_list()));
        let warnings: Vec<&str> = diagnostics.warnings().map(|w| w.message.as_str()).collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("single value inside a list"), "{warnings:?}");

        let (variable, diagnostics) = check("a:b");
        assert!(variable.is_some());
        assert!(
            diagnostics
                .warnings()
                .any(|w| w.message.contains("Having a single ':' does nothing"))
        );
    }

    #[test]
    fn test_local_and_global_stores() {
        let env = test_support::env();
        let state = ParserState::new(&env, "test.sk");
        let local = Variable::new_instance("_x", &[OBJECT], &state).unwrap();
        let global = Variable::new_instance("x", &[OBJECT], &state).unwrap();
        let event = Event::new("test");
        local
            .change(&event, Some(&[Value::Number(1.0)][..]), ChangeMode::Set)
            .unwrap();
        assert!(global.get_all(&event).unwrap().is_empty());
        assert_eq!(local.get_all(&event).unwrap(), [Value::Number(1.0)]);
        assert_eq!(env.globals.get("x"), None);
    }
}
