//! Command registration
//!
//! Commands are registered in a statically-constructed table built once per
//! script at construction time: the script type's class-level entries first,
//! then the global vocabulary. On a name collision the later (global) entry
//! wins, so the shared vocabulary can override a subtype's rendering of
//! safety-critical commands such as `exit`.

use std::collections::HashMap;

use crate::error::ScriptError;
use crate::script::{Invocation, Script};
use crate::value::Value;

pub type CommandHandler = fn(&mut Script, &Invocation) -> Result<Value, ScriptError>;

/// Guard policy applied by the shared dispatch routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Do not run at all while testing, canceled, or truncated.
    Skip,
    /// Validate argument count, skip as above, log the call otherwise.
    VerboseSkip,
    /// Validate argument count; in test mode run the handler in calc-time
    /// mode so duration still accumulates; skip only when canceled or
    /// truncated.
    CountVerboseSkip,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub policy: DispatchPolicy,
    /// Minimum argument count: positional parameters minus those with
    /// defaults.
    pub required_args: usize,
    pub handler: CommandHandler,
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: Vec<CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.entries.push(spec);
    }

    /// Registration order, duplicates included.
    pub fn entries(&self) -> &[CommandSpec] {
        &self.entries
    }

    /// Collapse to a name table; later registrations win.
    pub fn resolve(&self) -> HashMap<&'static str, CommandSpec> {
        let mut table = HashMap::new();
        for spec in &self.entries {
            table.insert(spec.name, *spec);
        }
        table
    }

    pub fn lookup(&self, name: &str) -> Option<CommandSpec> {
        self.entries.iter().rev().find(|s| s.name == name).copied()
    }
}

/// Shared argument-count validation used by all dispatch policies.
pub fn check_arg_count(command: &str, required: usize, supplied: usize) -> Result<(), ScriptError> {
    if supplied < required {
        return Err(ScriptError::ParameterCount {
            command: command.to_string(),
            required,
            supplied,
        });
    }
    Ok(())
}
