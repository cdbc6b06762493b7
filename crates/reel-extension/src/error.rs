//! Extension runtime error types.
//!
//! Load-time errors abort registration entirely. Invocation errors are
//! recovered at the typed adapter boundary and returned as values.
//! Capability errors are raised inside a sandbox when a binding is misused.

use thiserror::Error;

/// Errors raised while turning a descriptor into a registered extension.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("compile error: {0}")]
    CompileError(String),

    #[error("missing export: {0}")]
    MissingExport(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}

/// Errors raised while calling into a live sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("extension raised an exception in {function}: {message}")]
    Exception { function: String, message: String },

    #[error("unexpected return value from {function}: {message}")]
    ReturnType { function: String, message: String },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("call to {0} exceeded its deadline")]
    Timeout(String),

    #[error("resource limit exceeded in {function}: {message}")]
    ResourceLimit { function: String, message: String },

    #[error("extension panicked in {0}")]
    Panicked(String),

    #[error("sandbox is poisoned: {0}")]
    Poisoned(String),

    #[error("sandbox closed: {0}")]
    Closed(String),

    #[error("could not marshal arguments: {0}")]
    Marshal(String),
}

/// Misuse of a capability binding from inside a sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("selection is nil")]
    InvalidHandle,

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("type error: {0}")]
    TypeMismatch(String),
}

/// Umbrella error for host callers reaching extensions through the bank.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("extension not found: {0}")]
    NotFound(String),

    #[error("extension {id} is a {actual}, not a {expected}")]
    WrongType {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}
