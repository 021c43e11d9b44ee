//! The expression resolver and the state shared by one parse session.
//!
//! [`SkriptParser`] turns a span of script text into an [`ExprRef`]: a
//! variable, a function call, a quoted template, a registered expression, a
//! literal, or a list of those. It is cheap to construct and is created anew
//! for every sub-span that is tried, so nested attempts never share cursors.
//!
//! Everything that outlives a single span (the registry, the variable store,
//! the delay state of the current line, the enclosing loops) lives in
//! [`ParserState`].

use std::cell::{Cell, RefCell};
use std::sync::{Arc, LazyLock};

use bitflags::bitflags;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::command::Commands;
use crate::event::LoopKey;
use crate::expr::{
    ExprRef, Expression, ExpressionList, FunctionCall, Literal, StringMode, UnparsedLiteral,
    Variable, VariableString,
};
use crate::function::{Functions, Signature};
use crate::kleenean::Kleenean;
use crate::log::{ErrorQuality, Location, LogEntry, ParseLogger};
use crate::matcher::next;
use crate::pattern::ExprInfo;
use crate::registry::SyntaxRegistry;
use crate::types::{OBJECT, TypeRegistry};
use crate::variables::Variables;

static LIST_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s*,?\s+(?:and|n?or)\s+|\s*,\s*)").expect("list split regex is valid")
});

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:the )?var(?:iable)? )?\{(?:[^{}]|%\{|\}%)+\}$")
        .expect("variable regex is valid")
});

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\p{Alphabetic}[\p{Alphabetic}\p{Nd}_]*)\((.*)\)$")
        .expect("function call regex is valid")
});

const MULTIPLE_AND_OR: &str = "List has multiple 'and' or 'or', will default to 'and'. Use brackets if you want to define multiple lists.";
const MISSING_AND_OR: &str = "List is missing 'and' or 'or', defaulting to 'and'";

bitflags! {
    /// What a span may be parsed as.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParseFlags: u8 {
        const PARSE_EXPRESSIONS = 1;
        const PARSE_LITERALS = 1 << 1;
    }
}

/// Where the text being parsed comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseContext {
    /// Statements and expressions inside triggers.
    Default,
    /// An event header such as `on join`.
    Event,
    /// Command arguments. Brackets and quotes have no special meaning.
    Command,
    /// Values read from the config.
    Config,
}

/// Engine switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserSettings {
    /// Function calls nested deeper than this abort the walk.
    pub max_call_depth: usize,
    pub disable_variable_conflict_warnings: bool,
    /// Collect function signatures before building any trigger.
    pub allow_function_calls_before_definitions: bool,
    pub disable_missing_and_or_warnings: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            disable_variable_conflict_warnings: false,
            allow_function_calls_before_definitions: true,
            disable_missing_and_or_warnings: false,
        }
    }
}

/// Everything parsing needs that is shared between scripts.
#[derive(Debug, Clone)]
pub struct ScriptEnv {
    pub registry: Arc<SyntaxRegistry>,
    pub globals: Arc<Variables>,
    pub functions: Arc<Functions>,
    pub commands: Arc<Commands>,
    pub settings: ParserSettings,
    /// Variable names seen so far, for conflict warnings.
    pub variable_names: Arc<Mutex<FxHashMap<String, Regex>>>,
}

impl ScriptEnv {
    pub fn new(registry: Arc<SyntaxRegistry>) -> Self {
        let functions = Arc::new(Functions::with_natives(registry.functions()));
        Self {
            registry,
            globals: Arc::new(Variables::new()),
            functions,
            commands: Arc::default(),
            settings: ParserSettings::default(),
            variable_names: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// The event a trigger is being built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentEvent {
    /// e.g. `join`, used in messages.
    pub name: String,
    /// Event kinds the trigger listens to.
    pub kinds: Vec<String>,
    /// Values every one of those kinds provides, as `(key, type)`.
    pub values: Vec<(String, String)>,
}

/// A loop enclosing the line being parsed.
#[derive(Clone)]
pub struct LoopScope {
    pub key: LoopKey,
    /// `None` for `while` loops, which have no loop-value.
    pub expr: Option<ExprRef>,
}

/// Parse state of one script.
pub struct ParserState {
    env: ScriptEnv,
    logger: ParseLogger,
    script: String,
    delay: Cell<Kleenean>,
    event: RefCell<Option<CurrentEvent>>,
    loops: RefCell<Vec<LoopScope>>,
    function: RefCell<Option<Arc<Signature>>>,
    options: RefCell<Vec<(String, String)>>,
}

impl ParserState {
    pub fn new(env: &ScriptEnv, script: &str) -> Self {
        Self {
            env: env.clone(),
            logger: ParseLogger::new(),
            script: script.to_string(),
            delay: Cell::new(Kleenean::False),
            event: RefCell::new(None),
            loops: RefCell::new(Vec::new()),
            function: RefCell::new(None),
            options: RefCell::new(Vec::new()),
        }
    }

    pub fn env(&self) -> &ScriptEnv {
        &self.env
    }

    pub fn registry(&self) -> &Arc<SyntaxRegistry> {
        &self.env.registry
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        self.env.registry.types()
    }

    pub fn functions(&self) -> &Arc<Functions> {
        &self.env.functions
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.env.settings
    }

    pub fn variable_names(&self) -> &Mutex<FxHashMap<String, Regex>> {
        &self.env.variable_names
    }

    pub fn logger(&self) -> &ParseLogger {
        &self.logger
    }

    pub fn script_name(&self) -> &str {
        &self.script
    }

    /// Attach the current line to every diagnostic logged from now on.
    pub fn set_line(&self, line: usize) {
        self.logger.set_location(Some(Location {
            script: self.script.clone(),
            line,
        }));
    }

    /// Whether a delay may have happened before the current line.
    pub fn has_delay_before(&self) -> Kleenean {
        self.delay.get()
    }

    pub fn set_has_delay_before(&self, delay: Kleenean) {
        self.delay.set(delay);
    }

    pub fn current_event(&self) -> Option<CurrentEvent> {
        self.event.borrow().clone()
    }

    pub fn set_current_event(&self, event: Option<CurrentEvent>) {
        *self.event.borrow_mut() = event;
    }

    /// Type of the event value `key` if the current event provides it.
    pub fn event_value_type(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        self.event.borrow().as_ref().and_then(|event| {
            event
                .values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, t)| t.clone())
        })
    }

    /// Innermost loop last.
    pub fn loops(&self) -> Vec<LoopScope> {
        self.loops.borrow().clone()
    }

    pub(crate) fn push_loop(&self, scope: LoopScope) {
        self.loops.borrow_mut().push(scope);
    }

    pub(crate) fn pop_loop(&self) {
        self.loops.borrow_mut().pop();
    }

    /// The function whose body is being parsed.
    pub fn current_function(&self) -> Option<Arc<Signature>> {
        self.function.borrow().clone()
    }

    pub fn set_current_function(&self, function: Option<Arc<Signature>>) {
        *self.function.borrow_mut() = function;
    }

    pub fn set_option(&self, key: &str, value: &str) {
        let mut options = self.options.borrow_mut();
        options.retain(|(k, _)| k != key);
        options.push((key.to_string(), value.to_string()));
    }

    /// Substitute `{@key}` for every option defined so far.
    pub fn replace_options(&self, line: &str) -> String {
        let options = self.options.borrow();
        if options.is_empty() || !line.contains("{@") {
            return line.to_string();
        }
        let mut out = line.to_string();
        for (key, value) in options.iter() {
            out = out.replace(&format!("{{@{key}}}"), value);
        }
        out
    }
}

/// Resolves one span of text.
pub struct SkriptParser<'a> {
    pub(crate) state: &'a ParserState,
    pub(crate) expr: String,
    pub(crate) chars: Vec<char>,
    pub(crate) flags: ParseFlags,
    pub(crate) context: ParseContext,
    suppress_missing_and_or: bool,
}

impl<'a> SkriptParser<'a> {
    pub fn new(state: &'a ParserState, expr: &str, flags: ParseFlags, context: ParseContext) -> Self {
        let expr = expr.trim().to_string();
        Self {
            state,
            chars: expr.chars().collect(),
            expr,
            flags,
            context,
            suppress_missing_and_or: false,
        }
    }

    /// A parser for another span with the same flags and context.
    pub(crate) fn sub(&self, expr: &str) -> Self {
        let mut parser = Self::new(self.state, expr, self.flags, self.context);
        parser.suppress_missing_and_or = self.suppress_missing_and_or;
        parser
    }

    #[must_use]
    pub fn suppress_missing_and_or_warnings(mut self) -> Self {
        self.suppress_missing_and_or = true;
        self
    }

    pub fn text(&self) -> &str {
        &self.expr
    }

    pub(crate) fn slice(&self, from: usize, to: usize) -> String {
        self.chars[from..to].iter().collect()
    }

    /// `(...)` where the brackets belong together.
    fn is_parenthesized(&self) -> bool {
        self.chars.len() >= 2
            && self.chars[0] == '('
            && self.chars[self.chars.len() - 1] == ')'
            && next(&self.chars, 0, self.context) == Some(self.chars.len())
    }

    fn inner_text(&self) -> String {
        self.slice(1, self.chars.len() - 1)
    }

    /// Parse as any number of expressions of the given types.
    pub fn parse_expression(&self, types: &[&str]) -> Option<ExprRef> {
        self.parse_expression_info(&ExprInfo::any_of(types))
    }

    /// Parse as what a placeholder accepts: a single expression, or a list
    /// of them joined with `,`, `and`, `or` or `nor`.
    ///
    /// Prints at most one error.
    pub fn parse_expression_info(&self, info: &ExprInfo) -> Option<ExprRef> {
        if self.expr.is_empty() {
            return None;
        }
        let logger = self.state.logger();
        let types = self.state.types();
        let code_names = info.code_names();
        let is_object = code_names.as_slice() == [OBJECT];
        let log = logger.start();

        if is_object && self.flags.contains(ParseFlags::PARSE_LITERALS) {
            // Numbers first, so `1, 2 and 3` is a list of numbers rather
            // than three unparsed literals.
            if types.get("number").is_some() {
                let blocking = logger.start_blocking();
                let numbers = Self::new(self.state, &self.expr, ParseFlags::PARSE_LITERALS, self.context)
                    .suppress_missing_and_or_warnings()
                    .parse_expression(&["number"]);
                drop(blocking);
                if let Some(numbers) = numbers {
                    log.print_log();
                    return Some(numbers);
                }
            }
        }

        if let Some(single) = self.parse_single_expr(false, None, info) {
            log.print_log();
            return Some(single);
        }
        log.clear();

        let Some(pieces) = self.split_list() else {
            log.print_error_with(
                &format!("Invalid brackets/variables/text in '{}'", self.expr),
                ErrorQuality::NotAnExpression,
            );
            return None;
        };

        if pieces.len() == 1 {
            if self.is_parenthesized() {
                log.clear();
                log.print_log();
                return self.sub(&self.inner_text()).parse_expression_info(info);
            }
            if is_object && self.flags.contains(ParseFlags::PARSE_LITERALS) {
                let error = log.error();
                log.clear();
                log.print_log();
                return Some(Arc::new(UnparsedLiteral::new(&self.expr, self.context, error)));
            }
            log.print_error(None);
            return None;
        }

        let mut members: Vec<ExprRef> = Vec::new();
        let mut and = Kleenean::Unknown;
        let mut b = 0;
        'outer: while b < pieces.len() {
            for a in (1..=pieces.len() - b).rev() {
                if b == 0 && a == pieces.len() {
                    continue;
                }
                let (x, _) = pieces[b];
                let (_, y) = pieces[b + a - 1];
                let span = self.slice(x, y);
                let parser = self.sub(&span);
                let member = if parser.is_parenthesized() {
                    parser.parse_expression_info(info)
                } else {
                    parser.parse_single_expr(a == 1, log.error(), info)
                };
                let Some(member) = member else {
                    continue;
                };
                members.push(member);
                if b != 0 {
                    let delimiter = self.slice(pieces[b - 1].1, x);
                    let word = delimiter.trim().trim_start_matches(',').trim();
                    if !word.is_empty() {
                        // `nor` counts as `and`
                        let is_and = Kleenean::from_bool(!word.eq_ignore_ascii_case("or"));
                        if and.is_unknown() {
                            and = is_and;
                        } else if and != is_and {
                            logger.warning(format!("{MULTIPLE_AND_OR} List: {}", self.expr));
                            and = Kleenean::True;
                        }
                    }
                }
                b += a;
                continue 'outer;
            }
            log.print_error(None);
            return None;
        }

        // A single value only takes an `or` list.
        if !info.types.first().is_some_and(|t| t.plural) && !and.is_false() {
            log.print_error(None);
            return None;
        }

        log.print_log();

        if members.len() == 1 {
            return members.pop();
        }

        if and.is_unknown()
            && !self.suppress_missing_and_or
            && !self.state.settings().disable_missing_and_or_warnings
        {
            logger.warning(format!("{MISSING_AND_OR}: {}", self.expr));
        }

        Some(Arc::new(ExpressionList::new(members, !and.is_false(), types)))
    }

    /// Split at top-level list delimiters. Returns `(start, end)` character
    /// spans of the pieces, or `None` if brackets, quotes or braces are
    /// unbalanced.
    fn split_list(&self) -> Option<Vec<(usize, usize)>> {
        let len = self.chars.len();
        let mut pieces = Vec::new();
        let mut start = 0;
        let mut i = Some(0);
        while let Some(pos) = i {
            if pos > len {
                break;
            }
            if pos == len {
                pieces.push((start, pos));
                return Some(pieces);
            }
            let rest = self.slice(pos, len);
            if let Some(found) = LIST_SPLIT.find(&rest) {
                pieces.push((start, pos));
                let end = pos + found.as_str().chars().count();
                start = end;
                i = next(&self.chars, end, self.context);
            } else {
                i = next(&self.chars, pos, self.context);
            }
        }
        None
    }

    /// Parse as exactly one expression, not a list.
    ///
    /// `allow_unparsed_literal` permits an [`UnparsedLiteral`] for `object`
    /// placeholders; `default_error` is attached to it if nothing better
    /// comes up.
    pub fn parse_single_expr(
        &self,
        allow_unparsed_literal: bool,
        default_error: Option<LogEntry>,
        info: &ExprInfo,
    ) -> Option<ExprRef> {
        if self.expr.is_empty() {
            return None;
        }
        if self.is_parenthesized() {
            return self
                .sub(&self.inner_text())
                .parse_single_expr(allow_unparsed_literal, default_error, info);
        }
        let logger = self.state.logger();
        let types = self.state.types();
        let code_names = info.code_names();
        let has_single = info.types.iter().any(|t| !t.plural);
        let log = logger.start();

        if matches!(self.context, ParseContext::Default | ParseContext::Event) {
            if let Some(variable) = self.parse_variable(&code_names) {
                if !self.flags.contains(ParseFlags::PARSE_EXPRESSIONS) {
                    logger.error("Variables cannot be used here.");
                    log.print_error(None);
                    return None;
                }
                if has_single && !variable.is_single() {
                    logger.error(format!(
                        "'{}' can only accept a single value of any type, not more",
                        self.expr
                    ));
                    log.print_error(None);
                    return None;
                }
                log.print_log();
                return Some(Arc::new(variable));
            }
            if log.has_error() {
                log.print_error(None);
                return None;
            }

            if let Some(call) = self.parse_function(Some(code_names.as_slice())) {
                log.print_log();
                return Some(Arc::new(call));
            }
            if log.has_error() {
                log.print_error(None);
                return None;
            }
        }
        log.clear();

        if self.flags.contains(ParseFlags::PARSE_EXPRESSIONS) {
            let parsed = if self.is_quoted()
                && code_names.iter().any(|t| *t == OBJECT || *t == "string")
            {
                match VariableString::new_instance(&self.inner_text(), StringMode::Message, self.state) {
                    Some(string) => Some(Arc::new(string) as ExprRef),
                    None => {
                        log.print_error(None);
                        return None;
                    }
                }
            } else {
                self.parse_registered_expression(&code_names)
            };

            if let Some(expr) = parsed {
                let return_type = expr.return_type().to_string();
                for placeholder in &info.types {
                    if types.is_assignable(&return_type, &placeholder.code_name) {
                        if !placeholder.plural && !expr.is_single() {
                            let name = types
                                .get(&placeholder.code_name)
                                .map_or_else(|| placeholder.code_name.clone(), |c| c.singular());
                            logger.error(format!(
                                "'{}' can only accept a single {name}, not more",
                                self.expr
                            ));
                            log.print_error(None);
                            return None;
                        }
                        log.print_log();
                        return Some(expr);
                    }
                }

                if code_names.len() > 1 && return_type == OBJECT {
                    log.print_log();
                    return Some(expr);
                }
                let description = expr.describe(None, false);
                if let Some(converted) = expr.get_converted(&code_names, types) {
                    log.print_log();
                    return Some(converted);
                }
                log.print_error_with(
                    &format!("{description} is {}", not_of_type(types, &code_names)),
                    ErrorQuality::NotAnExpression,
                );
                return None;
            }
            log.clear();
        }

        if !self.flags.contains(ParseFlags::PARSE_LITERALS) {
            log.print_error(None);
            return None;
        }

        if code_names.first() == Some(&OBJECT) {
            if !allow_unparsed_literal || types.parse_any(&self.expr, self.context).is_none() {
                log.print_error(None);
                return None;
            }
            log.clear();
            let error = match (log.error(), default_error) {
                (Some(own), Some(default)) if own.quality <= default.quality => Some(default),
                (Some(own), _) => Some(own),
                (None, default) => default,
            };
            log.print_log();
            return Some(Arc::new(UnparsedLiteral::new(&self.expr, self.context, error)));
        }

        for code_name in &code_names {
            log.clear();
            if let Some(value) = types.parse(&self.expr, code_name, self.context) {
                log.print_log();
                return Some(Arc::new(Literal::new(value)));
            }
        }
        log.print_error(None);
        None
    }

    fn is_quoted(&self) -> bool {
        self.chars.len() >= 2 && self.chars[0] == '"' && self.chars[self.chars.len() - 1] == '"'
    }

    /// Try every registered expression that can produce one of `types`.
    fn parse_registered_expression(&self, types: &[&str]) -> Option<ExprRef> {
        let registry = self.state.registry();
        let type_registry = self.state.types();
        let infos = registry.expressions().iter().filter(|info| {
            info.return_type == OBJECT
                || types.iter().any(|t| {
                    type_registry.can_convert(&info.return_type, t)
                        || type_registry.is_assignable(t, &info.return_type)
                })
        });
        self.parse_syntax(infos.map(|info| &info.syntax), None)
            .map(|(_, element)| element.into_expr())
    }

    /// `{name}`, `variable {name}` or `the variable {name}`.
    ///
    /// Prints errors if the text looks like a variable but its name is
    /// invalid.
    pub fn parse_variable(&self, types: &[&str]) -> Option<Variable> {
        if !VARIABLE.is_match(&self.expr) {
            return None;
        }
        let open = self.chars.iter().position(|&c| c == '{')?;
        let close = self.chars.iter().rposition(|&c| c == '}')?;
        Variable::new_instance(&self.slice(open + 1, close), types, self.state)
    }

    /// `name(arguments)`. `expected` are the types the call must return, or
    /// `None` if it is used as a statement.
    pub fn parse_function(&self, expected: Option<&[&str]>) -> Option<FunctionCall> {
        if !matches!(self.context, ParseContext::Default | ParseContext::Event) {
            return None;
        }
        let caps = FUNCTION_CALL.captures(&self.expr)?;
        let name = caps.get(1)?.as_str();
        let open = name.chars().count();
        // `f(a) + g(b)` is not a call of `f`.
        if next(&self.chars, open, self.context) != Some(self.chars.len()) {
            return None;
        }
        let logger = self.state.logger();
        let log = logger.start();
        if !self.flags.contains(ParseFlags::PARSE_EXPRESSIONS) {
            logger.error("Functions cannot be used here (or there is a problem with your arguments).");
            log.print_error(None);
            return None;
        }
        let args = self.slice(open + 1, self.chars.len() - 1);
        let args = if args.trim().is_empty() {
            Vec::new()
        } else {
            let parsed = Self::new(
                self.state,
                &args,
                self.flags | ParseFlags::PARSE_LITERALS,
                self.context,
            )
            .suppress_missing_and_or_warnings()
            .parse_expression(&[OBJECT]);
            let Some(parsed) = parsed else {
                log.print_error(None);
                return None;
            };
            match parsed.as_list() {
                Some(list) if !list.get_and() => {
                    logger.error(
                        "Function arguments must be separated by commas and optionally an 'and', but not an 'or'. \
                         Put the 'or' into a second set of parentheses if you want to make it a single parameter, \
                         e.g. 'give(player, (sword or axe))'",
                    );
                    log.print_error(None);
                    return None;
                }
                Some(list) => list.expressions().to_vec(),
                None => vec![parsed],
            }
        };

        let call = FunctionCall::new(name, args, expected, self.state);
        match call {
            Some(call) => {
                log.print_log();
                Some(call)
            }
            None => {
                log.print_error(None);
                None
            }
        }
    }
}

/// "not a number", "neither a number nor a text".
pub fn not_of_type(types: &TypeRegistry, code_names: &[&str]) -> String {
    let names: Vec<String> = code_names
        .iter()
        .map(|c| types.get(c).map_or_else(|| (*c).to_string(), |info| info.with_article()))
        .collect();
    match names.as_slice() {
        [only] => format!("not {only}"),
        [init @ .., last] => format!("neither {} nor {last}", init.join(", ")),
        [] => "not anything".to_string(),
    }
}

/// "1st", "2nd", "3rd", "11th".
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
