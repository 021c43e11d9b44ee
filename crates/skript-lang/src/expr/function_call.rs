use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::Event;
use crate::expr::{ExprRef, Expression, ExpressionList};
use crate::function::{Functions, Signature};
use crate::parser::{ParserState, not_of_type, ordinal};
use crate::types::{OBJECT, TypeRegistry};
use crate::value::Value;

/// A call of a script or native function, `name(arguments)`.
///
/// The signature is resolved when the call is parsed; the implementation is
/// looked up each time the call runs, so a call may be parsed before the
/// function's body is.
pub struct FunctionCall {
    name: String,
    signature: Arc<Signature>,
    args: Vec<ExprRef>,
    functions: Arc<Functions>,
    types: Arc<TypeRegistry>,
    max_depth: usize,
    script: String,
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}

impl FunctionCall {
    /// Resolve and type-check a call. `expected` are the types the call must
    /// return, or `None` for a call used as a statement.
    ///
    /// Prints an error and returns `None` if the call does not fit.
    pub fn new(
        name: &str,
        mut args: Vec<ExprRef>,
        expected: Option<&[&str]>,
        state: &ParserState,
    ) -> Option<Self> {
        let logger = state.logger();
        let types = state.types();
        let Some(signature) = state.functions().signature(name) else {
            logger.error(format!("The function '{name}' does not exist."));
            return None;
        };

        if let Some(expected) = expected {
            let Some((return_type, _)) = &signature.return_type else {
                logger.error(format!("The function '{name}' doesn't return any value."));
                return None;
            };
            if !expected.iter().any(|t| types.can_convert(return_type, t)) {
                let described = types
                    .get(return_type)
                    .map_or_else(|| return_type.clone(), |c| c.singular());
                logger.error(format!(
                    "The returned value of the function '{name}', {described}, is {}.",
                    not_of_type(types, expected)
                ));
                return None;
            }
        }

        // A lone list parameter takes every argument.
        if let [only] = signature.parameters.as_slice() {
            if !only.single && args.len() > 1 {
                args = vec![Arc::new(ExpressionList::new(args, true, types))];
            }
        }

        let max = signature.max_parameters();
        let min = signature.min_parameters();
        if args.len() > max {
            if max == 0 {
                logger.error(format!(
                    "The function '{name}' has no arguments, but {} are given. To call a function without \
                     parameters, just write the function name followed by '()', e.g. 'func()'.",
                    args.len()
                ));
            } else {
                logger.error(format!(
                    "The function '{name}' has only {max} {}, but {} are given.",
                    plural(max, "argument"),
                    args.len()
                ));
            }
            return None;
        }
        if args.len() < min {
            logger.error(format!(
                "The function '{name}' requires at least {min} {}, but only {} {} given.",
                plural(min, "argument"),
                args.len(),
                if args.len() == 1 { "is" } else { "are" }
            ));
            return None;
        }

        let mut converted = Vec::with_capacity(args.len());
        for (i, (arg, parameter)) in args.into_iter().zip(&signature.parameters).enumerate() {
            let Some(arg) = arg.get_converted(&[parameter.type_name.as_str()], types) else {
                let type_name = types.get(&parameter.type_name).map_or_else(
                    || parameter.type_name.clone(),
                    |c| if parameter.single { c.singular() } else { c.plural() },
                );
                logger.error(format!(
                    "The {} argument given to the function '{name}' is not of the required type {type_name}. \
                     Check the correct order of the arguments and put lists into parentheses if appropriate \
                     (e.g. 'give(player, (iron ore and gold ore))'). Please note that storing the value in a \
                     variable and then using that variable as parameter will suppress this error, but it still \
                     won't work.",
                    ordinal(i + 1)
                ));
                return None;
            };
            if parameter.single && !arg.is_single() {
                logger.error(format!(
                    "The {} argument given to the function '{name}' is plural, but a single argument was expected",
                    ordinal(i + 1)
                ));
                return None;
            }
            converted.push(arg);
        }

        Some(Self {
            name: name.to_string(),
            signature,
            args: converted,
            functions: Arc::clone(state.functions()),
            types: Arc::clone(types),
            max_depth: state.settings().max_call_depth,
            script: state.script_name().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the arguments and run the function. `Ok(None)` if it
    /// returned nothing.
    pub fn call(&self, event: &Event) -> RuntimeResult<Option<Vec<Value>>> {
        if event.depth() >= self.max_depth {
            return Err(RuntimeError::ExcessiveRecursion {
                script: self.script.clone(),
            });
        }
        let function = self
            .functions
            .get(&self.name)
            .ok_or_else(|| RuntimeError::UnknownFunction(self.name.clone()))?;
        let mut args = Vec::with_capacity(self.signature.parameters.len());
        for (i, parameter) in self.signature.parameters.iter().enumerate() {
            let values = match (self.args.get(i), &parameter.default) {
                (Some(arg), _) | (None, Some(arg)) => arg.get_array(event)?,
                (None, None) => Vec::new(),
            };
            args.push(values);
        }
        function.execute(event, args)
    }
}

impl Expression for FunctionCall {
    fn return_type(&self) -> &str {
        self.signature
            .return_type
            .as_ref()
            .map_or(OBJECT, |(t, _)| t.as_str())
    }

    fn is_single(&self) -> bool {
        self.signature
            .return_type
            .as_ref()
            .is_none_or(|(_, single)| *single)
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        let values = self.call(event)?.unwrap_or_default();
        let return_type = self.return_type();
        Ok(values
            .iter()
            .filter_map(|v| self.types.convert(v, return_type))
            .collect())
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.describe(event, debug)).collect();
        format!("{}({})", self.name, args.join(", "))
    }
}
