//! The syntax registry.
//!
//! Hosts describe their types, effects, conditions, expressions, events and
//! native functions on a [`RegistryBuilder`]. Nothing is checked while
//! registering; [`RegistryBuilder::build`] compiles every pattern, validates
//! the placeholders against the type table and reports the first problem.
//! The resulting [`SyntaxRegistry`] is immutable and shared by every script.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::expr::Expression;
use crate::function::{Function, NativeFunction};
use crate::parser::ParseFlags;
use crate::pattern::{Pattern, PatternCache};
use crate::syntax::{Condition, Effect, ExpressionSyntax, SkriptEvent, SyntaxElement};
use crate::types::{ClassInfo, TypeRegistry};
use crate::value::Value;

/// Creates a fresh, uninitialised element for every match attempt.
pub type Factory<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// One registered syntax element and its patterns, in priority order.
pub struct SyntaxInfo<T: ?Sized> {
    pub name: String,
    pub patterns: Vec<Arc<Pattern>>,
    factory: Factory<T>,
}

impl<T: ?Sized> SyntaxInfo<T> {
    pub fn instantiate(&self) -> Box<T> {
        (self.factory)()
    }
}

impl<T: ?Sized> std::fmt::Debug for SyntaxInfo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxInfo")
            .field("name", &self.name)
            .field("patterns", &self.patterns.iter().map(|p| p.source()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ExpressionInfo {
    pub syntax: SyntaxInfo<dyn ExpressionSyntax>,
    /// Type every instance returns; used to skip expressions that cannot
    /// satisfy a placeholder.
    pub return_type: String,
}

#[derive(Debug)]
pub struct EventInfo {
    pub syntax: SyntaxInfo<dyn SkriptEvent>,
    /// Event kinds a trigger with this header listens to.
    pub kinds: SmallVec<[String; 2]>,
}

/// A kind of event the host can fire. Kinds form a tree: a trigger listening
/// to a kind also runs for its descendants.
#[derive(Debug, Clone)]
pub struct EventKind {
    pub name: String,
    pub parent: Option<String>,
    values: Vec<(String, String)>,
}

pub struct SyntaxRegistry {
    types: Arc<TypeRegistry>,
    expressions: Vec<ExpressionInfo>,
    effects: Vec<SyntaxInfo<dyn Effect>>,
    conditions: Vec<SyntaxInfo<dyn Condition>>,
    events: Vec<EventInfo>,
    kinds: FxHashMap<String, EventKind>,
    functions: Vec<Arc<NativeFunction>>,
}

impl SyntaxRegistry {
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn expressions(&self) -> &[ExpressionInfo] {
        &self.expressions
    }

    pub fn effects(&self) -> &[SyntaxInfo<dyn Effect>] {
        &self.effects
    }

    pub fn conditions(&self) -> &[SyntaxInfo<dyn Condition>] {
        &self.conditions
    }

    pub fn events(&self) -> &[EventInfo] {
        &self.events
    }

    pub fn functions(&self) -> &[Arc<NativeFunction>] {
        &self.functions
    }

    pub fn event_kind(&self, name: &str) -> Option<&EventKind> {
        self.kinds.get(name)
    }

    /// Whether firing `fired` runs triggers listening to `listened`.
    pub fn kind_matches(&self, fired: &str, listened: &str) -> bool {
        self.ancestors(fired).any(|kind| kind.name == listened)
    }

    /// `kind` and then each of its parents.
    fn ancestors<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a EventKind> + 'a {
        let mut current = self.kinds.get(kind);
        let mut steps = 0;
        std::iter::from_fn(move || {
            let kind = current?;
            steps += 1;
            current = if steps > self.kinds.len() {
                None
            } else {
                kind.parent.as_deref().and_then(|p| self.kinds.get(p))
            };
            Some(kind)
        })
    }

    /// Values provided by `kind` or any of its parents, as `(key, type)`.
    /// The closest declaration of a key wins.
    pub fn kind_values(&self, kind: &str) -> Vec<(String, String)> {
        let mut seen = FxHashSet::default();
        let mut values = Vec::new();
        for kind in self.ancestors(kind) {
            for (key, type_name) in &kind.values {
                if seen.insert(key.clone()) {
                    values.push((key.clone(), type_name.clone()));
                }
            }
        }
        values
    }

    /// Values every one of `kinds` provides with the same type.
    pub fn common_values(&self, kinds: &[String]) -> Vec<(String, String)> {
        let Some((first, rest)) = kinds.split_first() else {
            return Vec::new();
        };
        let others: Vec<Vec<(String, String)>> = rest.iter().map(|k| self.kind_values(k)).collect();
        self.kind_values(first)
            .into_iter()
            .filter(|value| others.iter().all(|o| o.contains(value)))
            .collect()
    }
}

impl std::fmt::Debug for SyntaxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxRegistry")
            .field("types", &self.types)
            .field("expressions", &self.expressions.len())
            .field("effects", &self.effects.len())
            .field("conditions", &self.conditions.len())
            .field("events", &self.events.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

struct Pending<T: ?Sized> {
    name: String,
    patterns: Vec<String>,
    factory: Factory<T>,
}

type ConverterFn = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Collects registrations; see [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    types: Vec<ClassInfo>,
    converters: Vec<(String, String, ConverterFn)>,
    expressions: Vec<(String, Pending<dyn ExpressionSyntax>)>,
    effects: Vec<Pending<dyn Effect>>,
    conditions: Vec<Pending<dyn Condition>>,
    events: Vec<(Vec<String>, Pending<dyn SkriptEvent>)>,
    kinds: Vec<EventKind>,
    values: Vec<(String, String, String)>,
    functions: Vec<NativeFunction>,
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| (*p).to_string()).collect()
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&mut self, info: ClassInfo) -> &mut Self {
        self.types.push(info);
        self
    }

    pub fn converter<F>(&mut self, from: &str, to: &str, f: F) -> &mut Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.converters
            .push((from.to_string(), to.to_string(), Box::new(f)));
        self
    }

    pub fn effect<E: Effect + Default + 'static>(&mut self, patterns: &[&str]) -> &mut Self {
        self.effects.push(Pending {
            name: short_type_name::<E>(),
            patterns: owned(patterns),
            factory: Arc::new(|| Box::new(E::default())),
        });
        self
    }

    /// Register an effect built by `factory`, for elements that carry host
    /// state such as an output sink.
    pub fn effect_with<F>(&mut self, name: &str, patterns: &[&str], factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Effect> + Send + Sync + 'static,
    {
        self.effects.push(Pending {
            name: name.to_string(),
            patterns: owned(patterns),
            factory: Arc::new(factory),
        });
        self
    }

    pub fn condition<C: Condition + Default + 'static>(&mut self, patterns: &[&str]) -> &mut Self {
        self.conditions.push(Pending {
            name: short_type_name::<C>(),
            patterns: owned(patterns),
            factory: Arc::new(|| Box::new(C::default())),
        });
        self
    }

    pub fn expression<E>(&mut self, return_type: &str, patterns: &[&str]) -> &mut Self
    where
        E: Expression + SyntaxElement + Default + 'static,
    {
        let name = short_type_name::<E>();
        self.expression_with(&name, return_type, patterns, || Box::new(E::default()))
    }

    /// Register an expression built by `factory`, for elements that need
    /// construction arguments.
    pub fn expression_with<F>(
        &mut self,
        name: &str,
        return_type: &str,
        patterns: &[&str],
        factory: F,
    ) -> &mut Self
    where
        F: Fn() -> Box<dyn ExpressionSyntax> + Send + Sync + 'static,
    {
        self.expressions.push((
            return_type.to_string(),
            Pending {
                name: name.to_string(),
                patterns: owned(patterns),
                factory: Arc::new(factory),
            },
        ));
        self
    }

    pub fn event_kind(&mut self, name: &str, parent: Option<&str>) -> &mut Self {
        self.kinds.push(EventKind {
            name: name.to_lowercase(),
            parent: parent.map(str::to_lowercase),
            values: Vec::new(),
        });
        self
    }

    /// Declare that events of `kind` carry a value `key` of type `type_name`.
    pub fn event_value(&mut self, kind: &str, key: &str, type_name: &str) -> &mut Self {
        self.values.push((
            kind.to_lowercase(),
            key.to_lowercase(),
            type_name.to_string(),
        ));
        self
    }

    /// Register an event header. `name` is used in messages such as "There's
    /// no player in a server start event".
    pub fn event<E: SkriptEvent + Default + 'static>(
        &mut self,
        name: &str,
        kinds: &[&str],
        patterns: &[&str],
    ) -> &mut Self {
        self.events.push((
            kinds.iter().map(|k| k.to_lowercase()).collect(),
            Pending {
                name: name.to_string(),
                patterns: owned(patterns),
                factory: Arc::new(|| Box::new(E::default())),
            },
        ));
        self
    }

    pub fn function(&mut self, function: NativeFunction) -> &mut Self {
        self.functions.push(function);
        self
    }

    pub fn build(self) -> RegistryResult<SyntaxRegistry> {
        let mut types = TypeRegistry::new();
        for info in self.types {
            types.register(info)?;
        }
        for (from, to, f) in self.converters {
            types.add_converter(&from, &to, f)?;
        }

        let mut kinds = FxHashMap::default();
        for kind in self.kinds {
            if kinds.contains_key(&kind.name) {
                return Err(RegistryError::DuplicateEventKind(kind.name));
            }
            kinds.insert(kind.name.clone(), kind);
        }
        for kind in kinds.values() {
            if let Some(parent) = &kind.parent {
                if !kinds.contains_key(parent) {
                    return Err(RegistryError::UnknownEventKind {
                        event: kind.name.clone(),
                        kind: parent.clone(),
                    });
                }
            }
        }
        for (kind, key, type_name) in self.values {
            let Some(entry) = kinds.get_mut(&kind) else {
                return Err(RegistryError::UnknownEventKind {
                    event: key,
                    kind,
                });
            };
            if types.get(&type_name).is_none() {
                return Err(RegistryError::UnknownType {
                    pattern: format!("event-{key}"),
                    name: type_name,
                });
            }
            entry.values.retain(|(k, _)| *k != key);
            entry.values.push((key, type_name));
        }

        let mut seen = FxHashSet::default();
        for function in &self.functions {
            let name = function.signature().name.to_lowercase();
            if !seen.insert(name.clone()) {
                return Err(RegistryError::DuplicateFunction(name));
            }
        }

        let cache = PatternCache::new();
        let effects = self
            .effects
            .into_iter()
            .map(|pending| compile(pending, &cache, &types))
            .collect::<RegistryResult<Vec<_>>>()?;
        let conditions = self
            .conditions
            .into_iter()
            .map(|pending| compile(pending, &cache, &types))
            .collect::<RegistryResult<Vec<_>>>()?;
        let mut expressions = Vec::with_capacity(self.expressions.len());
        for (return_type, pending) in self.expressions {
            if types.get(&return_type).is_none() {
                return Err(RegistryError::UnknownType {
                    pattern: pending.patterns.join(" | "),
                    name: return_type,
                });
            }
            expressions.push(ExpressionInfo {
                syntax: compile(pending, &cache, &types)?,
                return_type,
            });
        }

        let mut events = Vec::with_capacity(self.events.len());
        for (event_kinds, pending) in self.events {
            for kind in &event_kinds {
                if !kinds.contains_key(kind) {
                    return Err(RegistryError::UnknownEventKind {
                        event: pending.name.clone(),
                        kind: kind.clone(),
                    });
                }
            }
            for (i, first) in event_kinds.iter().enumerate() {
                for second in &event_kinds[i + 1..] {
                    if is_ancestor(&kinds, first, second) || is_ancestor(&kinds, second, first) {
                        return Err(RegistryError::OverlappingEvents {
                            event: pending.name.clone(),
                            first: first.clone(),
                            second: second.clone(),
                        });
                    }
                }
            }
            events.push(EventInfo {
                syntax: compile(pending, &cache, &types)?,
                kinds: event_kinds.into_iter().collect(),
            });
        }

        debug!(
            patterns = cache.len(),
            effects = effects.len(),
            conditions = conditions.len(),
            expressions = expressions.len(),
            events = events.len(),
            "syntax registry built"
        );

        Ok(SyntaxRegistry {
            types: Arc::new(types),
            expressions,
            effects,
            conditions,
            events,
            kinds,
            functions: self.functions.into_iter().map(Arc::new).collect(),
        })
    }
}

fn compile<T: ?Sized>(
    pending: Pending<T>,
    cache: &PatternCache,
    types: &TypeRegistry,
) -> RegistryResult<SyntaxInfo<T>> {
    let patterns = pending
        .patterns
        .iter()
        .map(|source| {
            let pattern = cache.get_or_compile(source, types)?;
            validate_defaults(&pattern, types)?;
            Ok(pattern)
        })
        .collect::<RegistryResult<Vec<_>>>()?;
    Ok(SyntaxInfo {
        name: pending.name,
        patterns,
        factory: pending.factory,
    })
}

/// Whether `ancestor` is `kind` itself or one of its parents.
fn is_ancestor(kinds: &FxHashMap<String, EventKind>, ancestor: &str, kind: &str) -> bool {
    let mut current = Some(kind);
    for _ in 0..=kinds.len() {
        match current {
            Some(name) if name == ancestor => return true,
            Some(name) => current = kinds.get(name).and_then(|k| k.parent.as_deref()),
            None => return false,
        }
    }
    false
}

/// A placeholder that may be left empty without being optional gets its
/// type's default expression, so that default has to exist and fit.
fn validate_defaults(pattern: &Pattern, types: &TypeRegistry) -> RegistryResult<()> {
    for placeholder in pattern.placeholders() {
        if !placeholder.may_be_absent || placeholder.info.optional {
            continue;
        }
        let Some(first) = placeholder.info.types.first() else {
            continue;
        };
        let type_name = first.code_name.clone();
        let err_pattern = pattern.source().to_string();
        let Some(default) = types
            .get(&type_name)
            .and_then(ClassInfo::get_default_expression)
        else {
            return Err(RegistryError::MissingDefault {
                type_name,
                pattern: err_pattern,
            });
        };
        let mask = placeholder.info.flag_mask;
        if !default.is_literal() && !mask.contains(ParseFlags::PARSE_EXPRESSIONS) {
            return Err(RegistryError::DefaultNotLiteral {
                type_name,
                pattern: err_pattern,
            });
        }
        if default.is_literal() && !mask.contains(ParseFlags::PARSE_LITERALS) {
            return Err(RegistryError::DefaultIsLiteral {
                type_name,
                pattern: err_pattern,
            });
        }
        if !first.plural && !default.is_single() {
            return Err(RegistryError::DefaultNotSingle {
                type_name,
                pattern: err_pattern,
            });
        }
        if placeholder.info.time != 0 && !default.supports_time() {
            return Err(RegistryError::DefaultWithoutTime {
                type_name,
                pattern: err_pattern,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeResult;
    use crate::event::Event;
    use crate::expr::ExprRef;
    use crate::kleenean::Kleenean;
    use crate::matcher::ParseResult;
    use crate::parser::ParserState;
    use crate::types::LiteralDefault;

    #[derive(Default)]
    struct Noop;

    impl SyntaxElement for Noop {
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

    impl Effect for Noop {
        fn execute(&self, _event: &Event) -> RuntimeResult<()> {
            Ok(())
        }

        fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
            "noop".to_string()
        }
    }

    impl SkriptEvent for Noop {
        fn check(&self, _event: &Event) -> bool {
            true
        }

        fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
            "noop".to_string()
        }
    }

    fn builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(ClassInfo::new("number").name("number", "numbers"))
            .register_type(
                ClassInfo::new("player")
                    .name("player", "players")
                    .default_expression(LiteralDefault(Value::object("player", "steve"))),
            )
            .event_kind("player", None)
            .event_kind("join", Some("player"))
            .event_kind("quit", Some("player"))
            .event_value("player", "player", "player");
        builder
    }

    #[test]
    fn test_missing_default() {
        let mut builder = builder();
        builder.effect::<Noop>(&["do [%number%]"]);
        assert!(matches!(
            builder.build(),
            Err(RegistryError::MissingDefault { type_name, .. }) if type_name == "number"
        ));
    }

    #[test]
    fn test_optional_placeholder_needs_no_default() {
        let mut builder = builder();
        builder.effect::<Noop>(&["do [%-number%]", "kick [%player%]"]);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_literal_default_rejected_without_literals() {
        let mut builder = builder();
        builder.effect::<Noop>(&["kick [%~player%]"]);
        assert!(matches!(
            builder.build(),
            Err(RegistryError::DefaultIsLiteral { .. })
        ));
    }

    #[test]
    fn test_overlapping_event_kinds() {
        let mut builder = builder();
        builder.event::<Noop>("join", &["join", "player"], &["join"]);
        assert!(matches!(
            builder.build(),
            Err(RegistryError::OverlappingEvents { .. })
        ));
    }

    #[test]
    fn test_unknown_event_kind() {
        let mut builder = builder();
        builder.event::<Noop>("load", &["load"], &["load"]);
        assert!(matches!(
            builder.build(),
            Err(RegistryError::UnknownEventKind { .. })
        ));
    }

    #[test]
    fn test_kind_values_inherited() {
        let mut builder = builder();
        builder
            .event_value("join", "message", "number")
            .event::<Noop>("join", &["join"], &["join"]);
        let registry = builder.build().unwrap();
        assert!(registry.kind_matches("join", "player"));
        assert!(!registry.kind_matches("player", "join"));
        let values = registry.kind_values("join");
        assert!(values.contains(&("player".to_string(), "player".to_string())));
        assert!(values.contains(&("message".to_string(), "number".to_string())));
        let common = registry.common_values(&["join".to_string(), "quit".to_string()]);
        assert_eq!(common, vec![("player".to_string(), "player".to_string())]);
    }

    #[test]
    fn test_bad_pattern_reported() {
        let mut builder = builder();
        builder.effect::<Noop>(&["do [%number"]);
        assert!(matches!(builder.build(), Err(RegistryError::Pattern(_))));
    }
}
