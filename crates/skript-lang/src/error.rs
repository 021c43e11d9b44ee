//! Error types for the engine.
//!
//! User script errors are not represented here: they are diagnostics routed
//! through [`crate::log::ParseLogger`]. These types cover API misuse found
//! while building a registry, faults raised while walking a trigger, and I/O.

use std::path::PathBuf;

use thiserror::Error;

/// A pattern string that cannot be compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid pattern '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

impl PatternError {
    pub fn new(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

/// Configuration errors detected while building a [`crate::SyntaxRegistry`].
///
/// These are programming errors in whoever registers syntax, not script errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("unknown type '{name}' in pattern '{pattern}'")]
    UnknownType { pattern: String, name: String },

    #[error("type '{0}' is registered twice")]
    DuplicateType(String),

    #[error("converter references unknown type '{0}'")]
    UnknownConverterType(String),

    #[error(
        "the type '{type_name}' does not provide a default expression; either allow null \
         (with %-{type_name}%) or make it mandatory [pattern: {pattern}]"
    )]
    MissingDefault { type_name: String, pattern: String },

    #[error(
        "the default expression of '{type_name}' is not a literal; either allow null \
         (with %-*{type_name}%) or make it mandatory [pattern: {pattern}]"
    )]
    DefaultNotLiteral { type_name: String, pattern: String },

    #[error(
        "the default expression of '{type_name}' is a literal; either allow null \
         (with %-~{type_name}%) or make it mandatory [pattern: {pattern}]"
    )]
    DefaultIsLiteral { type_name: String, pattern: String },

    #[error(
        "the default expression of '{type_name}' is not a single-element expression \
         [pattern: {pattern}]"
    )]
    DefaultNotSingle { type_name: String, pattern: String },

    #[error("the default expression of '{type_name}' does not have distinct time states [pattern: {pattern}]")]
    DefaultWithoutTime { type_name: String, pattern: String },

    #[error("unknown event kind '{kind}' used by event '{event}'")]
    UnknownEventKind { event: String, kind: String },

    #[error("the event {event} registers with super/sub kinds '{first}' and '{second}'")]
    OverlappingEvents {
        event: String,
        first: String,
        second: String,
    },

    #[error("event kind '{0}' is registered twice")]
    DuplicateEventKind(String),

    #[error("function '{0}' is registered twice")]
    DuplicateFunction(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A fault raised while executing a trigger item.
///
/// The walker contains these: they abort the current walk and are logged, but
/// never reach the code that fired the event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{0}")]
    Fault(String),

    #[error("The script '{script}' infinitely (or excessively) repeated itself!")]
    ExcessiveRecursion { script: String },

    #[error("'{0}' cannot be changed that way")]
    UnsupportedChange(String),

    #[error("the function '{0}' is not defined")]
    UnknownFunction(String),

    #[error("'continue' used outside of a loop")]
    NoEnclosingLoop,
}

impl RuntimeError {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A malformed section tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (line {line})")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Failure to read a script from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Failure to read or write the saved variables file.
#[derive(Debug, Error)]
#[error("failed to access variable file {path}: {source}")]
pub struct StorageError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

pub type StorageResult<T> = Result<T, StorageError>;
