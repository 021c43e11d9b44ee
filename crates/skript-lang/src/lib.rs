//! Skript language engine.
//!
//! Syntax is not hard-coded. A host registers types, effects, conditions,
//! expressions and events, each with one or more patterns, and scripts are
//! parsed by matching their lines against those patterns.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use skript_lang::{RegistryBuilder, ScriptEnv, ScriptLoader};
//!
//! let registry = RegistryBuilder::new().build().unwrap();
//! let loader = ScriptLoader::new(ScriptEnv::new(Arc::new(registry)));
//!
//! // Nothing is registered, so the trigger header is not understood.
//! let script = loader.load_str("hello.sk", "on join:\n    broadcast \"hi\"\n").unwrap();
//! assert!(script.triggers.is_empty());
//! assert!(script.diagnostics.has_errors());
//! ```

pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod expr;
pub mod function;
pub mod kleenean;
pub mod log;
pub mod matcher;
pub mod parser;
pub mod pattern;
pub mod registry;
pub mod script;
pub mod storage;
pub mod syntax;
pub mod trigger;
pub mod types;
pub mod value;
pub mod variables;

#[cfg(test)]
pub(crate) mod test_support;

pub use command::{CommandOutcome, Commands, ExecutableBy, ScriptCommand};
pub use config::{EntryNode, Node, SectionNode};
pub use dispatch::{Statement, parse_event};
pub use error::{
    ConfigError, LoadError, LoadResult, PatternError, RegistryError, RegistryResult, RuntimeError,
    RuntimeResult, StorageError, StorageResult,
};
pub use event::Event;
pub use expr::{ChangeMode, ExprRef, Expression};
pub use function::{Function, NativeFunction, Parameter, Signature};
pub use kleenean::Kleenean;
pub use log::{Diagnostics, ErrorQuality, LogEntry, ParseLogger, Severity};
pub use matcher::ParseResult;
pub use parser::{ParseContext, ParseFlags, ParserSettings, ParserState, ScriptEnv, SkriptParser};
pub use registry::{RegistryBuilder, SyntaxRegistry};
pub use script::{LoadedScript, ScriptLoader, ScriptTrigger};
pub use syntax::{AsyncTask, Condition, Effect, Flow, SkriptEvent, SyntaxElement};
pub use trigger::{Continuation, Scheduler, Trigger, WalkOutcome};
pub use types::{
    Article, ClassInfo, DefaultExpression, LiteralDefault, NounFormatter, OBJECT, TypeRegistry,
};
pub use value::Value;
pub use variables::Variables;
