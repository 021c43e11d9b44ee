//! Syntax patterns.
//!
//! A pattern describes one accepted phrasing of a syntax element:
//!
//! - `[the]` optional group
//! - `(add|give)` alternation, `(1¦add|2¦remove)` with marks
//! - `%number%`, `%-players%`, `%*timespan@-1%` placeholders
//! - `<\d+>` regex captures
//! - `\(` escapes
//!
//! Patterns are compiled once into a tree of [`PatternNode`]s with chumsky;
//! matching walks the tree and never looks at the pattern text again.

use std::fmt;
use std::sync::Arc;

use chumsky::prelude::*;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::error::{PatternError, RegistryError, RegistryResult};
use crate::parser::ParseFlags;
use crate::types::TypeRegistry;

/// One type a placeholder accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderType {
    pub code_name: String,
    pub plural: bool,
}

/// What a placeholder accepts, from the text between its `%` signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprInfo {
    pub types: Vec<PlaceholderType>,
    /// `-` prefix: may stay empty without a default being substituted.
    pub optional: bool,
    /// `*` clears expressions, `~` clears literals.
    pub flag_mask: ParseFlags,
    /// `@-1` past, `@1` future.
    pub time: i32,
}

impl ExprInfo {
    /// Parse a placeholder body such as `-*numbers/texts@-1`.
    pub fn parse(spec: &str, types: &TypeRegistry) -> Result<Self, String> {
        let mut s = spec;
        let mut optional = false;
        let mut flag_mask = ParseFlags::all();

        if let Some(rest) = s.strip_prefix('-') {
            optional = true;
            s = rest;
        }
        if let Some(rest) = s.strip_prefix('*') {
            flag_mask.remove(ParseFlags::PARSE_EXPRESSIONS);
            s = rest;
        } else if let Some(rest) = s.strip_prefix('~') {
            flag_mask.remove(ParseFlags::PARSE_LITERALS);
            s = rest;
        }
        if !optional {
            if let Some(rest) = s.strip_prefix('-') {
                optional = true;
                s = rest;
            }
        }

        let mut time = 0;
        if let Some((names, t)) = s.split_once('@') {
            time = t.parse().map_err(|_| format!("invalid time state '@{t}'"))?;
            s = names;
        }

        let types = s
            .split('/')
            .map(|name| {
                types
                    .lookup(name)
                    .map(|(info, plural)| PlaceholderType {
                        code_name: info.code_name().to_string(),
                        plural,
                    })
                    .ok_or_else(|| name.to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            types,
            optional,
            flag_mask,
            time,
        })
    }

    /// Accepts any number of values of any of `types`.
    pub fn any_of(types: &[&str]) -> Self {
        Self {
            types: types
                .iter()
                .map(|t| PlaceholderType {
                    code_name: (*t).to_string(),
                    plural: true,
                })
                .collect(),
            optional: false,
            flag_mask: ParseFlags::all(),
            time: 0,
        }
    }

    pub fn code_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.code_name.as_str()).collect()
    }

    /// True if the first type is singular; defaults are checked against it.
    pub fn first_is_single(&self) -> bool {
        self.types.first().is_some_and(|t| !t.plural)
    }
}

#[derive(Debug, Clone)]
pub struct Placeholder {
    /// Index into [`crate::ParseResult::exprs`], in textual order.
    pub slot: usize,
    pub info: ExprInfo,
    /// Inside an optional group or an alternation, so a successful match may
    /// leave it unbound.
    pub may_be_absent: bool,
}

#[derive(Debug, Clone)]
pub struct Alternative {
    pub mark: i32,
    pub nodes: Vec<PatternNode>,
}

#[derive(Debug, Clone)]
pub enum PatternNode {
    /// Matched case-insensitively.
    Literal(String),
    /// Elastic whitespace.
    Space,
    Optional(Vec<PatternNode>),
    Choice(Vec<Alternative>),
    Placeholder(Placeholder),
    /// Anchored so it must match the whole candidate span.
    Regex(Regex),
}

/// A compiled pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    nodes: Vec<PatternNode>,
    slots: usize,
}

impl Pattern {
    pub fn compile(source: &str, types: &TypeRegistry) -> RegistryResult<Self> {
        let raw = raw_parser()
            .then_ignore(end())
            .parse(source)
            .into_result()
            .map_err(|errors| {
                let message = errors
                    .first()
                    .map_or_else(|| "malformed pattern".to_string(), |e| {
                        format!("{} at position {}", e, e.span().start)
                    });
                PatternError::new(source, message)
            })?;

        let mut resolver = Resolver {
            types,
            source,
            slots: 0,
        };
        let nodes = match <[RawAlt; 1]>::try_from(raw) {
            Ok([RawAlt { mark: None, items }]) => resolver.sequence(items, false)?,
            Ok(alts) => vec![PatternNode::Choice(resolver.alternatives(alts.into(), true)?)],
            Err(alts) => vec![PatternNode::Choice(resolver.alternatives(alts, true)?)],
        };

        Ok(Self {
            source: source.to_string(),
            nodes,
            slots: resolver.slots,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn nodes(&self) -> &[PatternNode] {
        &self.nodes
    }

    /// Number of placeholders.
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// All placeholders in slot order.
    pub fn placeholders(&self) -> Vec<&Placeholder> {
        fn collect<'a>(nodes: &'a [PatternNode], out: &mut Vec<&'a Placeholder>) {
            for node in nodes {
                match node {
                    PatternNode::Placeholder(p) => out.push(p),
                    PatternNode::Optional(inner) => collect(inner, out),
                    PatternNode::Choice(alts) => {
                        for alt in alts {
                            collect(&alt.nodes, out);
                        }
                    }
                    PatternNode::Literal(_) | PatternNode::Space | PatternNode::Regex(_) => {}
                }
            }
        }
        let mut out = Vec::with_capacity(self.slots);
        collect(&self.nodes, &mut out);
        out
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiled patterns keyed by their source text.
#[derive(Debug, Default)]
pub struct PatternCache {
    patterns: Mutex<FxHashMap<String, Arc<Pattern>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, source: &str, types: &TypeRegistry) -> RegistryResult<Arc<Pattern>> {
        if let Some(p) = self.patterns.lock().get(source) {
            return Ok(Arc::clone(p));
        }
        let compiled = Arc::new(Pattern::compile(source, types)?);
        self.patterns
            .lock()
            .insert(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum Raw {
    Char(char),
    Space,
    Optional(Vec<RawAlt>),
    Group(Vec<RawAlt>),
    Placeholder(String),
    Regex(String),
}

#[derive(Debug, Clone)]
struct RawAlt {
    mark: Option<i32>,
    items: Vec<Raw>,
}

/// Pattern text to an untyped tree. Unbalanced brackets, an odd number of
/// `%` and an unclosed `<` all fail here.
fn raw_parser<'src>() -> impl Parser<'src, &'src str, Vec<RawAlt>, extra::Err<Rich<'src, char>>> {
    recursive(|alternatives| {
        let escaped = just('\\').ignore_then(any()).map(Raw::Char);

        let optional = alternatives
            .clone()
            .delimited_by(just('['), just(']'))
            .map(Raw::Optional);

        let group = alternatives
            .delimited_by(just('('), just(')'))
            .map(Raw::Group);

        let placeholder = none_of("%")
            .repeated()
            .at_least(1)
            .to_slice()
            .delimited_by(just('%'), just('%'))
            .map(|s: &str| Raw::Placeholder(s.to_string()));

        let regex = just('\\')
            .then(any())
            .ignored()
            .or(none_of(">").ignored())
            .repeated()
            .at_least(1)
            .to_slice()
            .delimited_by(just('<'), just('>'))
            .map(|s: &str| Raw::Regex(s.to_string()));

        let space = just(' ').to(Raw::Space);

        let literal = none_of("[]()|%<>\\ ").map(Raw::Char);

        let item = choice((escaped, optional, group, placeholder, regex, space, literal));

        let mark = just('-')
            .or_not()
            .then(any().filter(|c: &char| c.is_ascii_digit()).repeated().at_least(1))
            .to_slice()
            .then_ignore(just('¦'))
            .try_map(|s: &str, span| s.parse::<i32>().map_err(|e| Rich::custom(span, e)));

        mark.or_not()
            .then(item.repeated().collect::<Vec<_>>())
            .map(|(mark, items)| RawAlt { mark, items })
            .separated_by(just('|'))
            .at_least(1)
            .collect::<Vec<_>>()
    })
}

struct Resolver<'a> {
    types: &'a TypeRegistry,
    source: &'a str,
    slots: usize,
}

impl Resolver<'_> {
    fn alternatives(&mut self, alts: Vec<RawAlt>, absent: bool) -> RegistryResult<Vec<Alternative>> {
        let absent = absent || alts.len() > 1;
        alts.into_iter()
            .map(|alt| {
                Ok(Alternative {
                    mark: alt.mark.unwrap_or(0),
                    nodes: self.sequence(alt.items, absent)?,
                })
            })
            .collect()
    }

    fn sequence(&mut self, items: Vec<Raw>, absent: bool) -> RegistryResult<Vec<PatternNode>> {
        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            let node = match item {
                Raw::Char(c) => {
                    if let Some(PatternNode::Literal(text)) = nodes.last_mut() {
                        text.push(c);
                        continue;
                    }
                    PatternNode::Literal(c.to_string())
                }
                Raw::Space => PatternNode::Space,
                Raw::Optional(alts) => {
                    let mut alts = self.alternatives(alts, true)?;
                    match alts.pop() {
                        Some(only) if alts.is_empty() && only.mark == 0 => {
                            PatternNode::Optional(only.nodes)
                        }
                        Some(last) => {
                            alts.push(last);
                            PatternNode::Optional(vec![PatternNode::Choice(alts)])
                        }
                        None => continue,
                    }
                }
                Raw::Group(alts) => PatternNode::Choice(self.alternatives(alts, absent)?),
                Raw::Placeholder(spec) => {
                    let info = ExprInfo::parse(&spec, self.types).map_err(|name| {
                        RegistryError::UnknownType {
                            pattern: self.source.to_string(),
                            name,
                        }
                    })?;
                    let slot = self.slots;
                    self.slots += 1;
                    PatternNode::Placeholder(Placeholder {
                        slot,
                        info,
                        may_be_absent: absent,
                    })
                }
                Raw::Regex(body) => {
                    let regex = Regex::new(&format!("^(?:{body})$")).map_err(|e| {
                        PatternError::new(self.source, format!("invalid regex <{body}>: {e}"))
                    })?;
                    PatternNode::Regex(regex)
                }
            };
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassInfo;

    fn types() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types
            .register(ClassInfo::new("number").name("number", "numbers"))
            .unwrap();
        types
            .register(ClassInfo::new("player").name("player", "players"))
            .unwrap();
        types
    }

    #[test]
    fn test_compile_structure() {
        let pattern = Pattern::compile("give [the] %player% (1¦a|2¦b)", &types()).unwrap();
        assert_eq!(pattern.slot_count(), 1);
        let nodes = pattern.nodes();
        assert!(matches!(&nodes[0], PatternNode::Literal(s) if s == "give"));
        assert!(matches!(nodes[1], PatternNode::Space));
        assert!(matches!(&nodes[2], PatternNode::Optional(inner) if inner.len() == 1));
        assert!(matches!(&nodes[6], PatternNode::Choice(alts) if alts[0].mark == 1 && alts[1].mark == 2));
    }

    #[test]
    fn test_placeholder_flags() {
        let info = ExprInfo::parse("-*numbers/player@-1", &types()).unwrap();
        assert!(info.optional);
        assert!(!info.flag_mask.contains(ParseFlags::PARSE_EXPRESSIONS));
        assert!(info.flag_mask.contains(ParseFlags::PARSE_LITERALS));
        assert_eq!(info.time, -1);
        assert_eq!(info.code_names(), vec!["number", "player"]);
        assert!(info.types[0].plural);
        assert!(!info.types[1].plural);
    }

    #[test]
    fn test_absent_tracking() {
        let pattern = Pattern::compile("%number% [to %player%]", &types()).unwrap();
        let placeholders = pattern.placeholders();
        assert!(!placeholders[0].may_be_absent);
        assert!(placeholders[1].may_be_absent);
        assert_eq!(placeholders[1].slot, 1);
    }

    #[test]
    fn test_top_level_pipe_is_choice() {
        let pattern = Pattern::compile("a|b", &types()).unwrap();
        assert!(matches!(&pattern.nodes()[0], PatternNode::Choice(alts) if alts.len() == 2));
    }

    #[test]
    fn test_malformed_patterns() {
        let types = types();
        assert!(Pattern::compile("[unclosed", &types).is_err());
        assert!(Pattern::compile("odd %number", &types).is_err());
        assert!(Pattern::compile("stray )", &types).is_err());
        assert!(matches!(
            Pattern::compile("%unknown%", &types),
            Err(RegistryError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_escapes_are_literal() {
        let pattern = Pattern::compile(r"a\(b\)", &types()).unwrap();
        assert!(matches!(&pattern.nodes()[0], PatternNode::Literal(s) if s == "a(b)"));
    }

    #[test]
    fn test_cache_reuses() {
        let cache = PatternCache::new();
        let types = types();
        let a = cache.get_or_compile("x %number%", &types).unwrap();
        let b = cache.get_or_compile("x %number%", &types).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
