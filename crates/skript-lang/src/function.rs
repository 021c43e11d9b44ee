//! Script and native functions.
//!
//! A script declares `function name(params) :: type:` sections; the host
//! registers [`NativeFunction`]s. Both live in one [`Functions`] table per
//! environment. Signatures are declared before any trigger is built so calls
//! can be resolved before the body that implements them.

use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::error::RuntimeResult;
use crate::event::Event;
use crate::expr::{
    ExprRef, Expression, FunctionCall, Literal, StringMode, VariableString, is_valid_variable_name,
};
use crate::kleenean::Kleenean;
use crate::matcher::{ParseResult, next};
use crate::parser::{ParseContext, ParseFlags, ParserState, SkriptParser, ordinal};
use crate::syntax::{Effect, SyntaxElement};
use crate::trigger::{Trigger, WalkOutcome};
use crate::value::Value;

static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^function\s+(\p{Alphabetic}[\p{Alphabetic}\p{Nd}_]*)\((.*)\)(?:\s*::\s*(.+))?$")
        .expect("signature regex is valid")
});

static PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(.+?)\s*:\s*(.+?)(?:\s*=\s*(.+))?\s*$").expect("parameter regex is valid")
});

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    /// Code name of the accepted type.
    pub type_name: String,
    pub single: bool,
    /// Used when the caller passes fewer arguments.
    pub default: Option<ExprRef>,
}

impl Parameter {
    pub fn new(name: &str, type_name: &str, single: bool) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            single,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: ExprRef) -> Self {
        self.default = Some(default);
        self
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.type_name)?;
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// Code name and whether a single value is returned.
    pub return_type: Option<(String, bool)>,
    /// Declaring script, `None` for natives.
    pub script: Option<String>,
}

impl Signature {
    pub fn new(name: &str, parameters: Vec<Parameter>, return_type: Option<(&str, bool)>) -> Self {
        Self {
            name: name.to_string(),
            parameters,
            return_type: return_type.map(|(t, single)| (t.to_string(), single)),
            script: None,
        }
    }

    /// Arguments a call must pass: everything up to the last parameter
    /// without a default.
    pub fn min_parameters(&self) -> usize {
        self.parameters
            .iter()
            .rposition(|p| p.default.is_none())
            .map_or(0, |i| i + 1)
    }

    pub fn max_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// Parse a `function name(a: type, b: type = default) :: type` header.
    ///
    /// Prints errors and returns `None` if the header is malformed.
    pub fn parse(header: &str, state: &ParserState) -> Option<Self> {
        let logger = state.logger();
        let Some(caps) = SIGNATURE.captures(header.trim()) else {
            logger.error(
                "Invalid function definition. Please check for typos and that the function's name only \
                 contains letters and underscores. Refer to the documentation for more information.",
            );
            return None;
        };
        let name = caps.get(1)?.as_str();
        let args = caps.get(2).map_or("", |m| m.as_str());
        let chars: Vec<char> = args.chars().collect();

        let mut pieces = Vec::new();
        if !args.trim().is_empty() {
            let mut start = 0;
            let mut i = 0;
            while i <= chars.len() {
                if i == chars.len() || chars[i] == ',' {
                    pieces.push(chars[start..i].iter().collect::<String>());
                    start = i + 1;
                    i += 1;
                    continue;
                }
                match next(&chars, i, ParseContext::Default) {
                    Some(to) => i = to,
                    None => {
                        logger.error("Invalid text/variables/parentheses in the arguments of this function");
                        return None;
                    }
                }
            }
        }

        let mut parameters: Vec<Parameter> = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.iter().enumerate() {
            let Some(caps) = PARAMETER.captures(piece) else {
                logger.error(format!(
                    "The {} argument's definition is invalid. It should look like 'name: type' or \
                     'name: type = default value'.",
                    ordinal(index + 1)
                ));
                return None;
            };
            let param_name = caps.get(1)?.as_str();
            if parameters.iter().any(|p| p.name.eq_ignore_ascii_case(param_name)) {
                logger.error(format!(
                    "Each argument's name must be unique, but the name '{param_name}' occurs at least twice."
                ));
                return None;
            }
            let type_text = caps.get(2)?.as_str();
            let Some((class, plural)) = state.types().lookup(type_text) else {
                logger.error(format!("Cannot recognize the type '{type_text}'"));
                return None;
            };
            let valid_name = {
                let _silent = logger.start_blocking();
                is_valid_variable_name(param_name, false, state)
            };
            if !valid_name {
                logger.error("An argument's name must be a valid variable name, and cannot be a list variable.");
                return None;
            }
            let mut parameter = Parameter::new(param_name, class.code_name(), !plural);
            if let Some(default) = caps.get(3) {
                parameter.default = Some(parse_default(default.as_str(), &parameter, state)?);
            }
            parameters.push(parameter);
        }

        let return_type = match caps.get(3) {
            None => None,
            Some(text) => {
                let Some((class, plural)) = state.types().lookup(text.as_str()) else {
                    logger.error(format!("Cannot recognize the type '{}'", text.as_str()));
                    return None;
                };
                Some((class.code_name().to_string(), !plural))
            }
        };

        Some(Self {
            name: name.to_string(),
            parameters,
            return_type,
            script: Some(state.script_name().to_string()),
        })
    }
}

fn parse_default(text: &str, parameter: &Parameter, state: &ParserState) -> Option<ExprRef> {
    let logger = state.logger();
    if parameter.type_name == "string" {
        if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return VariableString::new_instance(inner, StringMode::Message, state)
                .map(|s| Arc::new(s) as ExprRef);
        }
        if text.contains(' ') {
            logger.warning(format!(
                "'{text}' contains spaces and is unquoted, which is discouraged"
            ));
        }
        return Some(Arc::new(Literal::new(Value::text(text))));
    }
    let log = logger.start();
    let parsed = SkriptParser::new(state, text, ParseFlags::PARSE_LITERALS, ParseContext::Default)
        .parse_expression(&[&parameter.type_name]);
    if parsed.is_none() {
        let described = state
            .types()
            .get(&parameter.type_name)
            .map_or_else(|| parameter.type_name.clone(), |c| c.with_article());
        log.print_error_with(&format!("'{text}' is not {described}"), crate::log::ErrorQuality::SemanticError);
        return None;
    }
    log.print_log();
    parsed
}

pub trait Function: Send + Sync {
    fn signature(&self) -> &Signature;

    /// Run with one value array per parameter. `Ok(None)` means nothing was
    /// returned.
    fn execute(&self, caller: &Event, args: Vec<Vec<Value>>) -> RuntimeResult<Option<Vec<Value>>>;
}

pub type NativeBody = Arc<dyn Fn(&[Vec<Value>]) -> RuntimeResult<Vec<Value>> + Send + Sync>;

/// A function implemented by the host.
#[derive(Clone)]
pub struct NativeFunction {
    signature: Signature,
    body: NativeBody,
}

impl NativeFunction {
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(&[Vec<Value>]) -> RuntimeResult<Vec<Value>> + Send + Sync + 'static,
    {
        Self {
            signature,
            body: Arc::new(body),
        }
    }
}

impl Function for NativeFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn execute(&self, _caller: &Event, args: Vec<Vec<Value>>) -> RuntimeResult<Option<Vec<Value>>> {
        let result = (self.body)(&args)?;
        Ok(self.signature.return_type.is_some().then_some(result))
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A function defined in a script. The body runs against a fresh event
/// whose locals are the parameters.
pub struct ScriptFunction {
    signature: Arc<Signature>,
    trigger: Arc<Trigger>,
}

impl ScriptFunction {
    pub fn new(signature: Arc<Signature>, trigger: Arc<Trigger>) -> Self {
        Self { signature, trigger }
    }

    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }
}

impl Function for ScriptFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn execute(&self, caller: &Event, args: Vec<Vec<Value>>) -> RuntimeResult<Option<Vec<Value>>> {
        let event = Arc::new(Event::for_function(caller, &self.signature.name));
        for (parameter, values) in self.signature.parameters.iter().zip(args) {
            let name = parameter.name.to_lowercase();
            if parameter.single {
                event.locals().set(&name, values.into_iter().next());
            } else {
                for (i, value) in values.into_iter().enumerate() {
                    event.locals().set(&format!("{name}::{}", i + 1), Some(value));
                }
            }
        }
        match self.trigger.execute(&event) {
            WalkOutcome::Failed(error) => Err(error),
            WalkOutcome::Completed | WalkOutcome::Stopped | WalkOutcome::Suspended => {
                Ok(event.take_return_value())
            }
        }
    }
}

struct Entry {
    signature: Arc<Signature>,
    implementation: Option<Arc<dyn Function>>,
}

/// Every function known to an environment, by name.
#[derive(Default)]
pub struct Functions {
    entries: RwLock<FxHashMap<String, Entry>>,
}

impl Functions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_natives(natives: &[Arc<NativeFunction>]) -> Self {
        let functions = Self::new();
        {
            let mut entries = functions.entries.write();
            for native in natives {
                entries.insert(
                    native.signature.name.clone(),
                    Entry {
                        signature: Arc::new(native.signature.clone()),
                        implementation: Some(Arc::clone(native) as Arc<dyn Function>),
                    },
                );
            }
        }
        functions
    }

    /// Make a signature callable. Returns `false` if the name is taken.
    pub fn declare(&self, signature: Arc<Signature>) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&signature.name) {
            return false;
        }
        entries.insert(
            signature.name.clone(),
            Entry {
                signature,
                implementation: None,
            },
        );
        true
    }

    /// Attach the body of a declared function.
    pub fn define(&self, name: &str, implementation: Arc<dyn Function>) {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) => entry.implementation = Some(implementation),
            None => {
                let signature = Arc::new(implementation.signature().clone());
                entries.insert(
                    name.to_string(),
                    Entry {
                        signature,
                        implementation: Some(implementation),
                    },
                );
            }
        }
    }

    pub fn signature(&self, name: &str) -> Option<Arc<Signature>> {
        self.entries
            .read()
            .get(name)
            .map(|e| Arc::clone(&e.signature))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.entries
            .read()
            .get(name)
            .and_then(|e| e.implementation.clone())
    }

    /// Forget every function declared by `script`.
    pub fn remove_script(&self, script: &str) {
        self.entries
            .write()
            .retain(|_, e| e.signature.script.as_deref() != Some(script));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// A function call used as a statement; its return value is discarded.
pub struct FunctionCallEffect {
    call: FunctionCall,
}

impl FunctionCallEffect {
    pub fn new(call: FunctionCall) -> Self {
        Self { call }
    }
}

impl SyntaxElement for FunctionCallEffect {
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

impl Effect for FunctionCallEffect {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        self.call.get_all(event)?;
        Ok(())
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        self.call.describe(event, debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ScriptEnv;
    use crate::registry::RegistryBuilder;
    use crate::types::ClassInfo;

    fn state() -> ParserState {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(
                ClassInfo::new("number")
                    .name("number", "numbers")
                    .parser(|s, _| s.parse().ok().map(Value::Number)),
            )
            .register_type(ClassInfo::new("string").name("text", "texts"));
        let registry = Arc::new(builder.build().unwrap());
        ParserState::new(&ScriptEnv::new(registry), "functions.sk")
    }

    #[test]
    fn test_parse_signature() {
        let state = state();
        let sig = Signature::parse("function add(a: number, b: numbers = 2) :: number", &state).unwrap();
        assert_eq!(sig.name, "add");
        assert_eq!(sig.parameters.len(), 2);
        assert!(sig.parameters[0].single);
        assert!(!sig.parameters[1].single);
        assert_eq!(sig.min_parameters(), 1);
        assert_eq!(sig.max_parameters(), 2);
        assert_eq!(sig.return_type, Some(("number".to_string(), true)));
        assert_eq!(sig.script.as_deref(), Some("functions.sk"));
        assert!(state.logger().take_diagnostics().is_empty());
    }

    #[test]
    fn test_parse_signature_commas_in_defaults() {
        let state = state();
        let sig = Signature::parse(r#"function greet(name: text = "a, b", n: number)"#, &state).unwrap();
        assert_eq!(sig.parameters.len(), 2);
        assert_eq!(sig.min_parameters(), 2);
        assert!(sig.return_type.is_none());
    }

    #[test]
    fn test_signature_errors() {
        let state = state();
        assert!(Signature::parse("function 1bad()", &state).is_none());
        assert!(Signature::parse("function f(a: number, a: number)", &state).is_none());
        assert!(Signature::parse("function f(a: thing)", &state).is_none());
        assert!(Signature::parse("function f(a)", &state).is_none());
        assert!(Signature::parse("function f(a: number = x)", &state).is_none());
        insta::assert_snapshot!(state.logger().take_diagnostics().render(), @r"
        error: Invalid function definition. Please check for typos and that the function's name only contains letters and underscores. Refer to the documentation for more information.
        error: Each argument's name must be unique, but the name 'a' occurs at least twice.
        error: Cannot recognize the type 'thing'
        error: The 1st argument's definition is invalid. It should look like 'name: type' or 'name: type = default value'.
        error: 'x' is not a number
        ");
    }

    #[test]
    fn test_native_call_through_table() {
        let native = NativeFunction::new(
            Signature::new("twice", vec![Parameter::new("n", "number", true)], Some(("number", true))),
            |args| Ok(args[0].iter().map(|v| Value::Number(v.as_number() * 2.0)).collect()),
        );
        let functions = Functions::with_natives(&[Arc::new(native)]);
        let f = functions.get("twice").unwrap();
        let event = Event::new("test");
        assert_eq!(
            f.execute(&event, vec![vec![Value::Number(4.0)]]).unwrap(),
            Some(vec![Value::Number(8.0)])
        );
        assert!(!functions.declare(Arc::new(Signature::new("twice", Vec::new(), None))));
    }
}
