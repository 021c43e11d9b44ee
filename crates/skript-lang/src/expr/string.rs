use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};

use crate::error::RuntimeResult;
use crate::event::Event;
use crate::expr::{ExprRef, Expression};
use crate::parser::{ParseContext, ParseFlags, ParserState, SkriptParser};
use crate::pattern::ExprInfo;
use crate::types::{Article, OBJECT, TypeRegistry, join_with};
use crate::value::Value;

static CHAT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-z ]+)>").expect("chat style regex is valid"));

const PERCENT_ERROR: &str = "The percent sign is used for expressions (e.g. %player%). To insert a '%' type it twice: %%.";

/// What a template is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringMode {
    /// Text shown to players. Chat styles are resolved and articles are
    /// adjusted.
    Message,
    /// The name of a variable.
    VariableName,
}

enum Segment {
    Text(String),
    Expr {
        expr: ExprRef,
        article: Option<Article>,
        /// Written as `%expr%s`.
        plural: bool,
    },
}

/// A quoted string, possibly with `%expression%` parts.
pub struct VariableString {
    orig: String,
    segments: Vec<Segment>,
    mode: StringMode,
    types: Option<Arc<TypeRegistry>>,
}

/// Whether every `"` in `s` is doubled, optionally requiring surrounding
/// quotes.
pub fn is_quoted_correctly(s: &str, with_quotes: bool) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let inner = if with_quotes {
        if chars.len() < 2 || chars[0] != '"' || chars[chars.len() - 1] != '"' {
            return false;
        }
        &chars[1..chars.len() - 1]
    } else {
        &chars[..]
    };
    let mut quote = false;
    for &c in inner {
        if c == '"' {
            quote = !quote;
        } else if quote {
            return false;
        }
    }
    !quote
}

/// Remove surrounding quotes and undouble inner ones.
pub fn unquote(s: &str) -> String {
    let mut chars = s.chars();
    chars.next();
    chars.next_back();
    chars.as_str().replace("\"\"", "\"")
}

/// Replace `<red>`-style tags with `§` codes. Unknown tags are kept.
pub fn replace_chat_styles(s: &str) -> String {
    CHAT_STYLE
        .replace_all(s, |caps: &Captures<'_>| {
            chat_code(&caps[1]).map_or_else(|| caps[0].to_string(), |code| format!("§{code}"))
        })
        .into_owned()
}

fn chat_code(name: &str) -> Option<char> {
    Some(match name {
        "black" => '0',
        "dark blue" => '1',
        "dark green" => '2',
        "dark aqua" | "dark cyan" => '3',
        "dark red" => '4',
        "purple" | "dark purple" => '5',
        "gold" | "orange" => '6',
        "grey" | "gray" | "light grey" | "light gray" => '7',
        "dark grey" | "dark gray" => '8',
        "blue" | "light blue" => '9',
        "green" | "lime" | "light green" => 'a',
        "aqua" | "cyan" | "light cyan" => 'b',
        "red" | "light red" => 'c',
        "pink" | "light purple" | "magenta" => 'd',
        "yellow" => 'e',
        "white" => 'f',
        "magic" | "obfuscated" => 'k',
        "bold" | "b" => 'l',
        "strikethrough" | "strike" | "s" => 'm',
        "underline" | "underlined" | "u" => 'n',
        "italic" | "italics" | "i" => 'o',
        "reset" | "r" => 'r',
        _ => return None,
    })
}

/// Position of `needle` at or after `from`.
fn find(s: &[char], needle: char, from: usize) -> Option<usize> {
    s.iter()
        .skip(from)
        .position(|&c| c == needle)
        .map(|p| p + from)
}

/// Index of the `}` closing a brace whose content starts at `start`.
pub fn next_variable_bracket(s: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &c) in s.iter().enumerate().skip(start) {
        match c {
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            '{' => depth += 1,
            _ => {}
        }
    }
    None
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Strip a trailing `a`/`an`/`the` from the preceding text; it is rendered
/// again next to the value.
fn take_article(segments: &mut [Segment]) -> Option<Article> {
    let Some(Segment::Text(last)) = segments.last_mut() else {
        return None;
    };
    let trimmed = last.trim_end();
    let start = trimmed.rfind(' ').map_or(0, |i| i + 1);
    let word = trimmed.get(start..)?.to_lowercase();
    let article = match word.as_str() {
        "a" | "an" => Article::Indefinite,
        "the" => Article::Definite,
        _ => return None,
    };
    last.truncate(start);
    Some(article)
}

/// The positive number ending `text`, ignoring trailing whitespace. It must
/// be preceded by whitespace or start the text.
fn number_before(text: &str) -> Option<f64> {
    let trimmed = text.trim_end();
    let start = trimmed
        .char_indices()
        .rev()
        .find(|&(_, c)| !(c.is_ascii_digit() || c == '.'))
        .map_or(0, |(i, c)| i + c.len_utf8());
    let before = trimmed.get(..start)?;
    if !before.chars().next_back().is_none_or(char::is_whitespace) {
        return None;
    }
    trimmed.get(start..)?.parse().ok()
}

/// Whether a `%` closing at `close` is followed by a lone `s`.
fn plural_suffix(s: &[char], close: usize) -> bool {
    s.get(close + 1) == Some(&'s') && !s.get(close + 2).is_some_and(|c| c.is_alphabetic())
}

impl VariableString {
    /// A string without expressions.
    pub fn simple(text: &str) -> Self {
        Self {
            orig: text.to_string(),
            segments: vec![Segment::Text(text.to_string())],
            mode: StringMode::Message,
            types: None,
        }
    }

    /// Parse the content of a quoted string (without the outer quotes).
    ///
    /// Prints errors and returns `None` if the string is malformed or one of
    /// its expressions cannot be understood.
    pub fn new_instance(orig: &str, mode: StringMode, state: &ParserState) -> Option<Self> {
        if !is_quoted_correctly(orig, false) {
            return None;
        }
        if orig.chars().filter(|&c| c == '%').count() % 2 != 0 {
            state.logger().error(PERCENT_ERROR);
            return None;
        }
        let unescaped = orig.replace("\"\"", "\"");
        let styled = match mode {
            StringMode::Message => replace_chat_styles(&unescaped),
            StringMode::VariableName => unescaped,
        };
        let s: Vec<char> = styled.chars().collect();
        let text = |from: usize, to: usize| s[from..to].iter().collect::<String>();

        let mut segments = Vec::new();
        let Some(mut c) = find(&s, '%', 0) else {
            segments.push(Segment::Text(styled.clone()));
            return Some(Self::finish(orig, segments, mode, &styled, state));
        };
        push_text(&mut segments, &text(0, c));

        while c != s.len() {
            let mut close = find(&s, '%', c + 1);
            let mut after = c;
            while let Some(end) = close {
                match find(&s, '{', after + 1) {
                    Some(brace) if brace < end => {
                        let Some(closing) = next_variable_bracket(&s, brace + 1) else {
                            state
                                .logger()
                                .error("Missing closing bracket '}' to end variable");
                            return None;
                        };
                        after = closing;
                        close = find(&s, '%', after + 1);
                    }
                    _ => break,
                }
            }
            let close = close?;

            let mut rest = close + 1;
            if c + 1 == close {
                push_text(&mut segments, "%");
            } else {
                let inner = text(c + 1, close);
                let log = state.logger().start();
                let expr = SkriptParser::new(
                    state,
                    &inner,
                    ParseFlags::PARSE_EXPRESSIONS,
                    ParseContext::Default,
                )
                .parse_expression_info(&ExprInfo::any_of(&[OBJECT]));
                let Some(expr) = expr else {
                    log.print_error(Some(&format!("Can't understand this expression: {inner}")));
                    return None;
                };
                log.print_log();
                let (article, plural) = match mode {
                    StringMode::Message => (take_article(&mut segments), plural_suffix(&s, close)),
                    StringMode::VariableName => (None, false),
                };
                if plural {
                    rest += 1;
                }
                segments.push(Segment::Expr {
                    expr,
                    article,
                    plural,
                });
            }

            c = find(&s, '%', rest).unwrap_or(s.len());
            push_text(&mut segments, &text(rest, c));
        }

        Some(Self::finish(orig, segments, mode, &styled, state))
    }

    fn finish(
        orig: &str,
        segments: Vec<Segment>,
        mode: StringMode,
        name: &str,
        state: &ParserState,
    ) -> Self {
        let this = Self {
            orig: orig.to_string(),
            segments,
            mode,
            types: Some(Arc::clone(state.types())),
        };
        if mode == StringMode::VariableName {
            this.check_variable_conflicts(name, state);
        }
        if let [Segment::Expr { expr, .. }] = this.segments.as_slice() {
            if mode == StringMode::Message && expr.return_type() == "string" && expr.is_single() {
                let text = expr.describe(None, false);
                state.logger().warning(format!(
                    "{text} is already a text, so you should not put it in percent signs (e.g. {text} instead of \"%{}%\")",
                    text.replace('"', "\"\"")
                ));
            }
        }
        this
    }

    /// Warn when two variable names may refer to the same variable, e.g.
    /// `{a::%player%}` and `{a::notch}`.
    fn check_variable_conflicts(&self, name: &str, state: &ParserState) {
        let mut names = state.variable_names().lock();
        if names.contains_key(name) {
            return;
        }
        if name.starts_with('%') {
            let script = state.script_name();
            let prefix = script.strip_suffix(".sk").unwrap_or(script);
            state.logger().warning(format!(
                "Starting a variable's name with an expression is discouraged ({{{name}}}). You could prefix it with the script's name: {{{prefix}::{name}}}"
            ));
        }

        let mut source = String::from("^(?:");
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => source.push_str(&regex::escape(text)),
                // `*` excluded so {var::%index%} does not conflict with {var::*}
                Segment::Expr { .. } => source.push_str("[^%*](.*[^%*])?"),
            }
        }
        source.push_str(")$");
        let Ok(pattern) = Regex::new(&source) else {
            return;
        };

        if !state.settings().disable_variable_conflict_warnings {
            let conflict = names.iter().find(|(other, other_pattern)| {
                (other_pattern.is_match(name) || pattern.is_match(other))
                    && !name.contains("::*")
                    && !other.contains("::*")
            });
            if let Some((other, _)) = conflict {
                state.logger().warning(format!(
                    "Possible name conflict of variables {{{name}}} and {{{other}}} (there might be more conflicts)."
                ));
            }
        }
        names.insert(name.to_string(), pattern);
    }

    /// The text, if there are no expressions in it.
    pub fn simple_text(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [] => Some(""),
            [Segment::Text(text)] => Some(text),
            _ => None,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.simple_text().is_some()
    }

    pub fn mode(&self) -> StringMode {
        self.mode
    }

    /// The string as written, without the surrounding quotes.
    pub fn original(&self) -> &str {
        &self.orig
    }

    /// Render with every expression evaluated against `event`.
    pub fn render(&self, event: &Event) -> RuntimeResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr {
                    expr,
                    article,
                    plural,
                } => {
                    let values = expr.get_array(event)?;
                    if values.is_empty() {
                        out.push_str("<none>");
                        continue;
                    }
                    // "3 %item%" reads as "3 apples"
                    let plural = *plural
                        || number_before(&out).is_some_and(|n| (n - 1.0).abs() > f64::EPSILON);
                    let parts: Vec<String> = values
                        .iter()
                        .map(|value| match &self.types {
                            Some(types) => types.message_text(value, plural, *article),
                            None => value.as_text(),
                        })
                        .collect();
                    out.push_str(&join_with(&parts, if expr.get_and() { "and" } else { "or" }));
                }
            }
        }
        Ok(out)
    }
}

impl Expression for VariableString {
    fn return_type(&self) -> &str {
        "string"
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(vec![Value::Text(self.render(event)?)])
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let mut out = String::from("\"");
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr {
                    expr,
                    article,
                    plural,
                } => {
                    match article {
                        Some(Article::Indefinite) => out.push_str("a "),
                        Some(Article::Definite) => out.push_str("the "),
                        None => {}
                    }
                    out.push('%');
                    out.push_str(&expr.describe(event, debug));
                    out.push('%');
                    if *plural {
                        out.push('s');
                    }
                }
            }
        }
        out.push('"');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ScriptEnv;
    use crate::test_support;

    #[test]
    fn test_quote_validation() {
        assert!(is_quoted_correctly("\"hello\"", true));
        assert!(is_quoted_correctly("say \"\"hi\"\"", false));
        assert!(!is_quoted_correctly("say \"hi", false));
        assert!(!is_quoted_correctly("\"a\"b\"", true));
        assert_eq!(unquote("\"a \"\"b\"\"\""), "a \"b\"");
    }

    #[test]
    fn test_chat_styles() {
        assert_eq!(replace_chat_styles("<red>hi <bold>there"), "§chi §lthere");
        assert_eq!(replace_chat_styles("<nothing>"), "<nothing>");
    }

    fn render(env: &ScriptEnv, event: &Event, template: &str) -> String {
        let state = ParserState::new(env, "test.sk");
        let string = VariableString::new_instance(template, StringMode::Message, &state).unwrap();
        string.render(event).unwrap()
    }

    #[test]
    fn test_article_inference() {
        assert_eq!(Article::Indefinite.apply("apple"), "an apple");
        assert_eq!(Article::Indefinite.apply("sword"), "a sword");
        assert_eq!(Article::Definite.apply("end"), "the end");
    }

    #[test]
    fn test_noun_articles_and_plurals() {
        let env = test_support::env();
        let event = Event::new("test");
        event.locals().set("fruit", Some(Value::object("item", "apple")));
        event.locals().set("n", Some(Value::Number(3.0)));

        assert_eq!(render(&env, &event, "you got a %{_fruit}%"), "you got an apple");
        assert_eq!(render(&env, &event, "look at the %{_fruit}%s!"), "look at the apples!");
        assert_eq!(render(&env, &event, "%{_n}% %{_fruit}%"), "3 apples");
        assert_eq!(render(&env, &event, "1 %{_fruit}%"), "1 apple");
        assert_eq!(render(&env, &event, "0 %{_fruit}%"), "0 apples");
        assert_eq!(render(&env, &event, "%{_fruit}%sauce"), "applesauce");
    }

    #[test]
    fn test_article_dropped_for_plain_values() {
        let env = test_support::env();
        let event = Event::new("test");
        event.locals().set("n", Some(Value::Number(5.0)));

        assert_eq!(render(&env, &event, "you have a %{_n}%"), "you have 5");
        assert_eq!(render(&env, &event, "%{_n}%s left"), "5 left");
        assert_eq!(render(&env, &event, "the %{_missing}%"), "<none>");
    }

    #[test]
    fn test_number_before() {
        assert_eq!(number_before("you have 3 "), Some(3.0));
        assert_eq!(number_before("1.5"), Some(1.5));
        assert_eq!(number_before("x3 "), None);
        assert_eq!(number_before("three "), None);
        assert_eq!(number_before(""), None);
    }

    #[test]
    fn test_take_article() {
        let mut segments = vec![Segment::Text("you got a ".to_string())];
        assert_eq!(take_article(&mut segments), Some(Article::Indefinite));
        assert!(matches!(&segments[0], Segment::Text(t) if t == "you got "));

        let mut segments = vec![Segment::Text("hello ".to_string())];
        assert_eq!(take_article(&mut segments), None);
    }

    #[test]
    fn test_variable_brackets() {
        let s: Vec<char> = "a{b{c}d}e}".chars().collect();
        assert_eq!(next_variable_bracket(&s, 2), Some(7));
        assert_eq!(next_variable_bracket(&s, 8), Some(9));
        assert_eq!(next_variable_bracket(&s[..5], 2), None);
    }
}
