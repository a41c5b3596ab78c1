//! Error taxonomy for the script runtime
//!
//! Canceled and truncated runs are not errors; they are terminal outcomes
//! reported through [`crate::script::ScriptOutcome`].

use std::path::PathBuf;
use thiserror::Error;

use crate::parser::ParseError;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// The dry run failed to compile or raised an error.
    #[error("syntax check failed for {script}: {detail}")]
    Syntax { script: String, detail: String },

    /// The dry run finished with intervals still pending.
    #[error("interval begun but never completed in {script}")]
    UnterminatedInterval { script: String },

    /// A command was invoked with fewer arguments than its minimum.
    #[error("invalid argument count for {command}: expected at least {required}, got {supplied}")]
    ParameterCount {
        command: String,
        required: usize,
        supplied: usize,
    },

    /// `complete_interval` was called with nothing pending.
    #[error("complete_interval called with no interval pending")]
    IntervalUnderflow,

    /// A gosub target file does not exist.
    #[error("gosub target not found: {}", path.display())]
    GosubTargetNotFound { path: PathBuf },

    /// A gosub class override did not resolve to a registered script type.
    #[error("unknown script type: {name}")]
    UnknownScriptType { name: String },

    /// The snippet does not define a `main` entry point.
    #[error("no main entry point defined in {script}")]
    EntryPointMissing { script: String },

    /// A child script failed; wraps the child's error as the chain unwinds.
    #[error("gosub {script} failed: {source}")]
    Gosub {
        script: String,
        #[source]
        source: Box<ScriptError>,
    },

    /// A name used in the snippet is neither a command, a variable, nor a
    /// local definition.
    #[error("unknown name: {name}")]
    UnknownName { name: String },

    /// A context variable was invoked as if it were a command.
    #[error("{name} is not callable")]
    NotCallable { name: String },

    /// An argument had the wrong type or shape for the command.
    #[error("invalid argument for {command}: {detail}")]
    InvalidArgument { command: String, detail: String },

    /// Local definitions recursed past the interpreter's depth limit.
    #[error("call depth limit of {limit} exceeded")]
    RecursionLimit { limit: usize },

    /// A host service invocation failed.
    #[error("service call failed: {0}")]
    Host(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
