//! Matching compiled patterns against text.
//!
//! The matcher walks a [`Pattern`]'s node tree with backtracking. Optional
//! groups are tried present first, alternatives left to right, and a
//! placeholder is bound to the shortest span after which the rest of the
//! pattern still matches. Only then is that span resolved as an expression,
//! so the resolver is never run for splits that cannot work structurally.

use crate::expr::ExprRef;
use crate::kleenean::Kleenean;
use crate::log::ErrorQuality;
use crate::parser::{ParseContext, ParseFlags, SkriptParser};
use crate::pattern::{Pattern, PatternNode, Placeholder};

/// Text captured by a `<regex>` part of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub text: String,
    /// Capture groups; index 0 is the whole match.
    pub groups: Vec<Option<String>>,
}

impl RegexMatch {
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

/// What a successful match produced.
pub struct ParseResult {
    /// One entry per placeholder, in textual order.
    pub exprs: Vec<Option<ExprRef>>,
    /// Regex captures in textual order.
    pub regexes: Vec<RegexMatch>,
    /// XOR of the marks of every alternative taken.
    pub mark: i32,
    /// The matched text.
    pub expr: String,
    pub flags: ParseFlags,
}

impl ParseResult {
    pub fn new(slot_count: usize) -> Self {
        Self {
            exprs: vec![None; slot_count],
            regexes: Vec::new(),
            mark: 0,
            expr: String::new(),
            flags: ParseFlags::empty(),
        }
    }
}

impl std::fmt::Debug for ParseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseResult")
            .field("exprs", &self.exprs)
            .field("regexes", &self.regexes)
            .field("mark", &self.mark)
            .field("expr", &self.expr)
            .finish()
    }
}

/// What remains to be matched: the rest of the current sequence, then the
/// rest of every enclosing one.
struct Cont<'a> {
    nodes: &'a [PatternNode],
    outer: Option<&'a Cont<'a>>,
}

impl Cont<'_> {
    fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.outer.is_none_or(Cont::is_empty)
    }
}

impl SkriptParser<'_> {
    /// Match the whole text against `pattern`.
    ///
    /// Placeholders are resolved with this parser's flags (restricted by
    /// each placeholder's own flags) and context. Nothing is substituted for
    /// placeholders left empty.
    pub fn match_pattern(&self, pattern: &Pattern) -> Option<ParseResult> {
        let root = Cont {
            nodes: pattern.nodes(),
            outer: None,
        };
        let mut result = self.step(0, &root, pattern.slot_count())?;
        result.expr.clone_from(&self.expr);
        result.flags = self.flags;
        Some(result)
    }

    fn step(&self, i: usize, cont: &Cont<'_>, slots: usize) -> Option<ParseResult> {
        let len = self.chars.len();
        let Some((node, rest)) = cont.nodes.split_first() else {
            return match cont.outer {
                Some(outer) => self.step(i, outer, slots),
                None => (i == len).then(|| ParseResult::new(slots)),
            };
        };
        let after = Cont {
            nodes: rest,
            outer: cont.outer,
        };
        let logger = self.state.logger();

        match node {
            PatternNode::Literal(text) => {
                let mut at = i;
                for expected in text.chars() {
                    let actual = self.chars.get(at)?;
                    if !chars_equal(expected, *actual) {
                        return None;
                    }
                    at += 1;
                }
                self.step(at, &after, slots)
            }
            PatternNode::Space => {
                let mut at = i;
                while self.chars.get(at) == Some(&' ') {
                    at += 1;
                }
                if at > i || i == 0 || i == len || self.chars[i - 1] == ' ' {
                    self.step(at, &after, slots)
                } else {
                    None
                }
            }
            PatternNode::Optional(inner) => {
                let log = logger.start();
                let present = Cont {
                    nodes: inner,
                    outer: Some(&after),
                };
                if let Some(result) = self.step(i, &present, slots) {
                    log.print_log();
                    return Some(result);
                }
                log.clear();
                let result = self.step(i, &after, slots);
                if result.is_some() {
                    log.print_log();
                } else {
                    log.print_error(None);
                }
                result
            }
            PatternNode::Choice(alternatives) => {
                let log = logger.start();
                for alternative in alternatives {
                    log.clear();
                    let taken = Cont {
                        nodes: &alternative.nodes,
                        outer: Some(&after),
                    };
                    if let Some(mut result) = self.step(i, &taken, slots) {
                        log.print_log();
                        result.mark ^= alternative.mark;
                        return Some(result);
                    }
                }
                log.print_error(None);
                None
            }
            PatternNode::Placeholder(placeholder) => self.placeholder(i, placeholder, &after, slots),
            PatternNode::Regex(regex) => {
                let log = logger.start();
                let mut end = next(&self.chars, i, self.context);
                while let Some(to) = end {
                    log.clear();
                    let text = self.slice(i, to);
                    if let Some(caps) = regex.captures(&text) {
                        if let Some(mut result) = self.step(to, &after, slots) {
                            result.regexes.insert(
                                0,
                                RegexMatch {
                                    groups: caps
                                        .iter()
                                        .map(|g| g.map(|m| m.as_str().to_string()))
                                        .collect(),
                                    text,
                                },
                            );
                            log.print_log();
                            return Some(result);
                        }
                    }
                    end = next(&self.chars, to, self.context);
                }
                log.print_error(None);
                None
            }
        }
    }

    fn placeholder(
        &self,
        i: usize,
        placeholder: &Placeholder,
        after: &Cont<'_>,
        slots: usize,
    ) -> Option<ParseResult> {
        let len = self.chars.len();
        if i == len {
            return None;
        }
        let logger = self.state.logger();
        let mut end = if after.is_empty() {
            Some(len)
        } else {
            Some(next(&self.chars, i, self.context)?)
        };
        let info = &placeholder.info;
        let log = logger.start();

        while let Some(to) = end {
            log.clear();
            if let Some(mut result) = self.step(to, after, slots) {
                let inner = logger.start();
                let parsed = SkriptParser::new(
                    self.state,
                    &self.slice(i, to),
                    self.flags & info.flag_mask,
                    self.context,
                )
                .parse_expression_info(info);
                let Some(mut expr) = parsed else {
                    inner.print_error(None);
                    log.print_error(None);
                    return None;
                };
                if info.time != 0 {
                    if expr.is_literal() {
                        return None;
                    }
                    if self.state.has_delay_before() == Kleenean::True {
                        logger.error("Cannot use time states after the event has already passed");
                        inner.print_error(None);
                        log.print_error(None);
                        return None;
                    }
                    let described = expr.describe(None, false);
                    let supported = std::sync::Arc::get_mut(&mut expr).is_some_and(|e| e.set_time(info.time));
                    if !supported {
                        logger.error(format!(
                            "{described} does not have a {} state",
                            if info.time < 0 { "past" } else { "future" }
                        ));
                        inner.print_error(None);
                        log.print_error(None);
                        return None;
                    }
                }
                inner.print_log();
                log.print_log();
                result.exprs[placeholder.slot] = Some(expr);
                return Some(result);
            }
            end = next(&self.chars, to, self.context);
        }
        log.print_error(None);
        None
    }
}

fn chars_equal(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// The index after the token starting at `i`: a whole quoted string, a
/// whole `{variable}`, a whole parenthesised group, or a single character.
///
/// Returns `None` at the end of the text or if a quote, brace or bracket is
/// not closed. In [`ParseContext::Command`] every character is a token.
pub fn next(s: &[char], i: usize, context: ParseContext) -> Option<usize> {
    if i >= s.len() {
        return None;
    }
    if context == ParseContext::Command {
        return Some(i + 1);
    }
    match s[i] {
        '"' => next_quote(s, i + 1).map(|end| end + 1),
        '{' => crate::expr::next_variable_bracket(s, i + 1).map(|end| end + 1),
        '(' => {
            let mut j = Some(i + 1);
            while let Some(at) = j {
                if at >= s.len() {
                    return None;
                }
                if s[at] == ')' {
                    return Some(at + 1);
                }
                j = next(s, at, context);
            }
            None
        }
        _ => Some(i + 1),
    }
}

/// The closing quote of a string whose content starts at `from`. Doubled
/// quotes are escapes.
pub fn next_quote(s: &[char], from: usize) -> Option<usize> {
    let mut i = from;
    while i < s.len() {
        if s[i] == '"' {
            if i == s.len() - 1 || s[i + 1] != '"' {
                return Some(i);
            }
            i += 1;
        }
        i += 1;
    }
    None
}

/// Check quotes and brackets of a whole line before trying to parse it.
/// Prints an error and returns `false` if they are unbalanced.
pub fn validate_line(line: &str, state: &crate::parser::ParserState) -> bool {
    if line.chars().filter(|&c| c == '"').count() % 2 != 0 {
        state.logger().error(
            "Invalid use of quotes (\"). If you want to use quotes in \"quoted text\", double them: \"\".",
        );
        return false;
    }
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match next(&chars, i, ParseContext::Default) {
            Some(to) => i = to,
            None => {
                state.logger().error_with(
                    "Invalid brackets/variables/text. Brackets must be closed and variables must be written like {name}.",
                    ErrorQuality::SemanticError,
                );
                return false;
            }
        }
    }
    true
}
