//! Type table: what each placeholder type name means.
//!
//! A [`ClassInfo`] describes one type a script can talk about: the names a
//! pattern may use for it, how to parse a literal of it, and what expression
//! to substitute when an optional placeholder of that type is left empty.
//! Everything is looked up by string code name and resolved once, when the
//! registry is built.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{RegistryError, RegistryResult};
use crate::expr::ExprRef;
use crate::parser::{ParseContext, ParserState};
use crate::value::Value;

/// The top type. Every value is assignable to it.
pub const OBJECT: &str = "object";

pub type LiteralParser = Arc<dyn Fn(&str, ParseContext) -> Option<Value> + Send + Sync>;
pub type Converter = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;
/// Renders a value as a noun, in the plural form if the flag is set.
pub type NounFormatter = Arc<dyn Fn(&Value, bool) -> String + Send + Sync>;

/// An article written before an interpolated value, e.g. `"you got a %item%"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Article {
    Indefinite,
    Definite,
}

impl Article {
    /// Prefix `noun` with this article, picking `a` or `an` by its first
    /// letter.
    pub fn apply(self, noun: &str) -> String {
        match self {
            Self::Definite => format!("the {noun}"),
            Self::Indefinite => {
                let vowel = noun
                    .chars()
                    .next()
                    .is_some_and(|c| "aeiouAEIOU".contains(c));
                format!("{} {noun}", if vowel { "an" } else { "a" })
            }
        }
    }
}

/// The expression used for a placeholder that was left empty.
///
/// e.g. the `player` type defaults to "the player of the current event".
pub trait DefaultExpression: Send + Sync {
    /// Build an instance for the line being parsed. `None` means the default
    /// cannot be used here (e.g. the current event has no player), in which
    /// case the pattern is treated as not matching.
    fn create(&self, state: &ParserState) -> Option<ExprRef>;

    fn is_literal(&self) -> bool;

    fn is_single(&self) -> bool;

    /// Whether the created expression honours past/future time states.
    fn supports_time(&self) -> bool {
        false
    }
}

/// A constant default value.
pub struct LiteralDefault(pub Value);

impl DefaultExpression for LiteralDefault {
    fn create(&self, _state: &ParserState) -> Option<ExprRef> {
        Some(Arc::new(crate::expr::Literal::new(self.0.clone())))
    }

    fn is_literal(&self) -> bool {
        true
    }

    fn is_single(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct ClassInfo {
    code_name: String,
    names: Vec<(String, String)>,
    supertype: Option<String>,
    parser: Option<LiteralParser>,
    default_expression: Option<Arc<dyn DefaultExpression>>,
    noun: Option<NounFormatter>,
}

impl ClassInfo {
    /// A type whose user-facing name is its code name, pluralised with `s`.
    pub fn new(code_name: &str) -> Self {
        Self {
            code_name: code_name.to_string(),
            names: Vec::new(),
            supertype: None,
            parser: None,
            default_expression: None,
            noun: None,
        }
    }

    /// Add a user-facing name. The first one added is used in messages.
    #[must_use]
    pub fn name(mut self, singular: &str, plural: &str) -> Self {
        self.names.push((singular.to_lowercase(), plural.to_lowercase()));
        self
    }

    #[must_use]
    pub fn supertype(mut self, code_name: &str) -> Self {
        self.supertype = Some(code_name.to_string());
        self
    }

    #[must_use]
    pub fn parser<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, ParseContext) -> Option<Value> + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn default_expression(mut self, default: impl DefaultExpression + 'static) -> Self {
        self.default_expression = Some(Arc::new(default));
        self
    }

    /// Mark the type as a noun. Messages then render its values with the
    /// article written before them and in the plural where asked for.
    #[must_use]
    pub fn noun<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, bool) -> String + Send + Sync + 'static,
    {
        self.noun = Some(Arc::new(f));
        self
    }

    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    pub fn singular(&self) -> String {
        self.names
            .first()
            .map_or_else(|| self.code_name.clone(), |(s, _)| s.clone())
    }

    pub fn plural(&self) -> String {
        self.names
            .first()
            .map_or_else(|| format!("{}s", self.code_name), |(_, p)| p.clone())
    }

    /// "a number", "an object".
    pub fn with_article(&self) -> String {
        let name = self.singular();
        let article = if name.starts_with(['a', 'e', 'i', 'o', 'u']) {
            "an"
        } else {
            "a"
        };
        format!("{article} {name}")
    }

    pub fn supertype_name(&self) -> Option<&str> {
        self.supertype.as_deref()
    }

    pub fn has_parser(&self) -> bool {
        self.parser.is_some()
    }

    pub fn parse(&self, text: &str, context: ParseContext) -> Option<Value> {
        self.parser.as_ref().and_then(|p| p(text, context))
    }

    pub fn get_default_expression(&self) -> Option<&Arc<dyn DefaultExpression>> {
        self.default_expression.as_ref()
    }

    pub fn is_noun(&self) -> bool {
        self.noun.is_some()
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("code_name", &self.code_name)
            .field("names", &self.names)
            .field("supertype", &self.supertype)
            .field("parser", &self.parser.is_some())
            .field("default_expression", &self.default_expression.is_some())
            .field("noun", &self.noun.is_some())
            .finish()
    }
}

/// All known types plus the converters between them.
#[derive(Clone)]
pub struct TypeRegistry {
    classes: Vec<ClassInfo>,
    by_code: FxHashMap<String, usize>,
    /// user name -> (class index, plural)
    by_name: FxHashMap<String, (usize, bool)>,
    converters: Vec<(String, String, Converter)>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            classes: Vec::new(),
            by_code: FxHashMap::default(),
            by_name: FxHashMap::default(),
            converters: Vec::new(),
        };
        registry.insert(ClassInfo::new(OBJECT).name("object", "objects"));
        registry
    }

    fn insert(&mut self, mut info: ClassInfo) {
        if info.names.is_empty() {
            let code = info.code_name.clone();
            info.names.push((code.clone(), format!("{code}s")));
        }
        let index = self.classes.len();
        self.by_code.insert(info.code_name.clone(), index);
        for (singular, plural) in &info.names {
            self.by_name.insert(singular.clone(), (index, false));
            self.by_name.insert(plural.clone(), (index, true));
        }
        self.by_name
            .entry(info.code_name.clone())
            .or_insert((index, false));
        self.classes.push(info);
    }

    pub fn register(&mut self, info: ClassInfo) -> RegistryResult<()> {
        if self.by_code.contains_key(&info.code_name) {
            return Err(RegistryError::DuplicateType(info.code_name));
        }
        self.insert(info);
        Ok(())
    }

    pub fn add_converter<F>(&mut self, from: &str, to: &str, f: F) -> RegistryResult<()>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        for name in [from, to] {
            if !self.by_code.contains_key(name) {
                return Err(RegistryError::UnknownConverterType(name.to_string()));
            }
        }
        self.converters
            .push((from.to_string(), to.to_string(), Arc::new(f)));
        Ok(())
    }

    pub fn get(&self, code_name: &str) -> Option<&ClassInfo> {
        self.by_code.get(code_name).map(|&i| &self.classes[i])
    }

    /// Resolve a user-facing name such as `numbers`, returning the type and
    /// whether the plural form was used.
    pub fn lookup(&self, user_name: &str) -> Option<(&ClassInfo, bool)> {
        let key = user_name.trim().to_lowercase();
        self.by_name
            .get(&key)
            .map(|&(i, plural)| (&self.classes[i], plural))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    /// Whether a value of type `from` can be used where `to` is expected.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if to == OBJECT {
            return true;
        }
        let mut current = Some(from);
        // Bounded by the number of types so a cyclic declaration cannot hang.
        for _ in 0..=self.classes.len() {
            match current {
                Some(name) if name == to => return true,
                Some(name) => current = self.get(name).and_then(ClassInfo::supertype_name),
                None => return false,
            }
        }
        false
    }

    /// Whether values of `from` can be converted to `to`, directly or by a
    /// converter.
    pub fn can_convert(&self, from: &str, to: &str) -> bool {
        self.is_assignable(from, to)
            || self
                .converters
                .iter()
                .any(|(f, t, _)| self.is_assignable(from, f) && self.is_assignable(t, to))
    }

    pub fn convert(&self, value: &Value, to: &str) -> Option<Value> {
        let from = value.type_name();
        if self.is_assignable(from, to) {
            return Some(value.clone());
        }
        self.converters
            .iter()
            .filter(|(f, t, _)| self.is_assignable(from, f) && self.is_assignable(t, to))
            .find_map(|(_, _, convert)| convert(value))
    }

    /// Convert to the first of `to` that accepts the value.
    pub fn convert_any(&self, value: &Value, to: &[&str]) -> Option<Value> {
        to.iter().find_map(|t| self.convert(value, t))
    }

    /// Parse a literal of one specific type.
    pub fn parse(&self, text: &str, code_name: &str, context: ParseContext) -> Option<Value> {
        self.get(code_name).and_then(|c| c.parse(text, context))
    }

    /// Parse a literal of any type, trying types in registration order.
    pub fn parse_any(&self, text: &str, context: ParseContext) -> Option<Value> {
        self.classes.iter().find_map(|c| c.parse(text, context))
    }

    /// The text of `value` inside a message. Only noun types take the plural
    /// and the article; other values are written as they are and the article
    /// is dropped.
    pub fn message_text(&self, value: &Value, plural: bool, article: Option<Article>) -> String {
        let Some(noun) = self.get(value.type_name()).and_then(|c| c.noun.as_ref()) else {
            return value.as_text();
        };
        let text = noun(value, plural);
        match article {
            // "an apples" is never right
            Some(article) if !plural || article == Article::Definite => article.apply(&text),
            _ => text,
        }
    }

    /// "a number or a text" style listing used in error messages.
    pub fn describe(&self, code_names: &[&str]) -> String {
        let names: Vec<String> = code_names
            .iter()
            .map(|c| {
                self.get(c)
                    .map_or_else(|| (*c).to_string(), ClassInfo::with_article)
            })
            .collect();
        join_with(&names, "or")
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("classes", &self.classes)
            .field("converters", &self.converters.len())
            .finish()
    }
}

/// `a, b and c`.
pub fn join_with(items: &[String], conjunction: &str) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} {conjunction} {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types
            .register(
                ClassInfo::new("number")
                    .name("number", "numbers")
                    .parser(|s, _| s.parse().ok().map(Value::Number)),
            )
            .unwrap();
        types
            .register(ClassInfo::new("entity").name("entity", "entities"))
            .unwrap();
        types
            .register(
                ClassInfo::new("player")
                    .name("player", "players")
                    .supertype("entity"),
            )
            .unwrap();
        types
            .register(ClassInfo::new("string").name("text", "texts"))
            .unwrap();
        types
            .add_converter("number", "string", |v| Some(Value::Text(v.as_text())))
            .unwrap();
        types
    }

    #[test]
    fn test_lookup_plural() {
        let types = registry();
        let (info, plural) = types.lookup("Numbers").unwrap();
        assert_eq!(info.code_name(), "number");
        assert!(plural);
        let (info, plural) = types.lookup("text").unwrap();
        assert_eq!(info.code_name(), "string");
        assert!(!plural);
        assert!(types.lookup("nothing").is_none());
    }

    #[test]
    fn test_assignability() {
        let types = registry();
        assert!(types.is_assignable("player", "entity"));
        assert!(types.is_assignable("player", OBJECT));
        assert!(!types.is_assignable("entity", "player"));
        assert!(types.can_convert("number", "string"));
        assert!(!types.can_convert("string", "number"));
    }

    #[test]
    fn test_convert() {
        let types = registry();
        assert_eq!(
            types.convert(&Value::Number(3.0), "string"),
            Some(Value::text("3"))
        );
        assert_eq!(types.convert(&Value::text("x"), "number"), None);
    }

    #[test]
    fn test_duplicate_type() {
        let mut types = registry();
        assert!(matches!(
            types.register(ClassInfo::new("number")),
            Err(RegistryError::DuplicateType(_))
        ));
    }

    #[test]
    fn test_message_text() {
        let mut types = registry();
        types
            .register(ClassInfo::new("item").name("item", "items").noun(|v, plural| {
                let id = v.as_text();
                if plural { format!("{id}s") } else { id }
            }))
            .unwrap();
        let apple = Value::object("item", "apple");
        assert_eq!(types.message_text(&apple, false, Some(Article::Indefinite)), "an apple");
        assert_eq!(types.message_text(&apple, true, Some(Article::Definite)), "the apples");
        assert_eq!(types.message_text(&apple, true, Some(Article::Indefinite)), "apples");
        assert_eq!(types.message_text(&apple, true, None), "apples");
        assert_eq!(
            types.message_text(&Value::Number(5.0), true, Some(Article::Indefinite)),
            "5"
        );
    }

    #[test]
    fn test_describe() {
        let types = registry();
        assert_eq!(types.describe(&["number", "entity"]), "a number or an entity");
    }
}
